// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 命令行参数与JSON配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::caption::CaptionConfig;
use crate::compositor::RenderConfig;
use crate::geometry::{BBox, RegionConfig};
use crate::recorder::RecordConfig;
use crate::tracking::TrackerConfig;

/// 默认模型文件名
pub const DEFAULT_MODEL_FILE: &str = "caption.onnx";

/// 跟踪 + 图像描述演示
#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "多目标跟踪 + 图像描述 (tracking & captioning demo)", long_about = None)]
pub struct Args {
    /// 输入目录 (包含 img/ 子目录)
    pub input: PathBuf,

    /// ONNX 描述模型路径
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// JSON 配置文件
    #[arg(short, long, default_value = "trackcap.json")]
    pub config: PathBuf,

    /// 逐帧结果输出目录 (启动时清空)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// 视频输出目录
    #[arg(long)]
    pub video_dir: Option<PathBuf>,

    /// 字体文件 (TTF/OTF)
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 最大处理帧数
    #[arg(long)]
    pub max_frames: Option<usize>,

    /// 视频帧率
    #[arg(long)]
    pub fps: Option<u32>,

    /// 使用 CUDA
    #[arg(long)]
    pub cuda: bool,

    /// 设备ID (缺省使用配置文件)
    #[arg(long)]
    pub device_id: Option<i32>,

    /// 无窗口运行 (需要 --box 指定初始目标)
    #[arg(long)]
    pub headless: bool,

    /// 初始跟踪框 x,y,w,h (可重复)
    #[arg(long = "box", value_parser = BBox::parse)]
    pub boxes: Vec<BBox>,
}

impl Args {
    /// 模型路径: 命令行 > ./models/caption.onnx > 用户数据目录
    pub fn resolve_model_path(&self) -> PathBuf {
        if let Some(path) = &self.model {
            return path.clone();
        }
        let local = Path::new("models").join(DEFAULT_MODEL_FILE);
        if local.exists() {
            return local;
        }
        dirs::data_dir()
            .map(|dir| dir.join("trackcap").join(DEFAULT_MODEL_FILE))
            .filter(|p| p.exists())
            .unwrap_or(local)
    }

    /// 命令行参数覆盖配置文件
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.output_dir {
            config.record.frame_dir = dir.clone();
        }
        if let Some(dir) = &self.video_dir {
            config.record.video_dir = dir.clone();
        }
        if let Some(font) = &self.font {
            config.render.font_path = Some(font.clone());
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = max_frames;
        }
        if let Some(fps) = self.fps {
            config.record.fps = fps;
        }
        // 只有显式给出的参数才覆盖配置文件
        if self.cuda {
            config.caption.cuda = true;
        }
        if let Some(device_id) = self.device_id {
            config.caption.device_id = device_id;
        }
    }
}

/// 框选参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub drag_threshold: i32, // 两个方向的拖拽距离都必须大于该值
    pub key_poll_ms: u64,    // 按键轮询间隔
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            drag_threshold: 10,
            key_poll_ms: 30,
        }
    }
}

/// 全局配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub max_frames: usize,
    pub selection: SelectionConfig,
    pub region: RegionConfig,
    pub tracker: TrackerConfig,
    pub caption: CaptionConfig,
    pub render: RenderConfig,
    pub record: RecordConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_frames: Self::DEFAULT_MAX_FRAMES,
            selection: SelectionConfig::default(),
            region: RegionConfig::default(),
            tracker: TrackerConfig::default(),
            caption: CaptionConfig::default(),
            render: RenderConfig::default(),
            record: RecordConfig::default(),
        }
    }
}

impl AppConfig {
    pub const DEFAULT_MAX_FRAMES: usize = 400;

    pub fn new() -> Self {
        Self::default()
    }

    /// 从JSON文件加载配置 (文件缺失或解析失败时使用默认值)
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match Self::from_json(&json) {
                Ok(config) => {
                    log::info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::new()
                }
            },
            Err(_) => {
                log::info!("ℹ️  未找到配置文件 {}, 使用默认值", path.display());
                Self::new()
            }
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        if config.max_frames == 0 {
            config.max_frames = Self::DEFAULT_MAX_FRAMES;
        }
        Ok(config)
    }

    /// 保存当前配置 (便于生成模板)
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
