// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod caption; // 图像描述 (后台线程 + ONNX模型)
pub mod compositor; // 叠加绘制
pub mod config; // 命令行参数与JSON配置
pub mod geometry; // 跟踪框与描述区域
pub mod input; // 图片序列输入
pub mod interaction; // 鼠标框选状态机
pub mod recorder; // 视频与逐帧图片输出
pub mod session; // 主循环编排
pub mod tracking; // 单目标跟踪器集合
pub mod viewer; // macroquad 窗口

pub use crate::caption::{CaptionConfig, CaptionText, Captioner, OnnxCaptioner};
pub use crate::config::{AppConfig, Args};
pub use crate::geometry::{BBox, CaptureRegion};
pub use crate::interaction::{InteractionState, Mode};
pub use crate::session::{Input, KeyCommand, Session, StepOutcome};
pub use crate::tracking::{CorrelationTracker, TrackError, Tracker, TrackerSet};

/// 输入目录的用例名 (目录名最后一段)
pub fn case_name(dir: &std::path::Path) -> String {
    dir.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .last()
        .unwrap_or_else(|| "default".to_string())
}
