// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 单目标跟踪器集合
//! One visual tracker per confirmed box

pub mod correlation;

pub use correlation::CorrelationTracker;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::BBox;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackError {
    #[error("invalid tracking region {0:?}")]
    InvalidRegion(BBox),
    #[error("tracker used before init")]
    NotInitialized,
    #[error("target lost (peak response {0:.3})")]
    Lost(f32),
}

/// 跟踪器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub padding: f32,          // 搜索区域相对目标的扩展倍数
    pub interp_factor: f32,    // 模板更新速率
    pub scale_step: f32,       // 多尺度搜索步长
    pub scale_weight: f32,     // 非当前尺度的响应惩罚
    pub template_size: u32,    // 模板长边 (像素)
    pub lost_threshold: f32,   // 峰值响应低于该值视为丢失
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            padding: 2.5,
            interp_factor: 0.075,
            scale_step: 1.05,
            scale_weight: 0.95,
            template_size: 48,
            lost_threshold: 0.2,
        }
    }
}

// ========== 跟踪器统一接口 ==========

/// 单目标跟踪器 Trait
///
/// 每个跟踪器绑定一个目标, 按帧调用 update
pub trait Tracker: Send {
    /// 在给定帧上用目标区域初始化
    fn init(&mut self, bbox: BBox, frame: &RgbImage) -> Result<(), TrackError>;

    /// 输入新帧, 返回目标新位置
    fn update(&mut self, frame: &RgbImage) -> Result<BBox, TrackError>;
}

/// 单个跟踪器的本帧结果
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Tracked(BBox),
    Lost(TrackError),
}

type TrackerFactory = Box<dyn Fn() -> Box<dyn Tracker> + Send>;

/// 跟踪器集合 (按创建顺序更新)
pub struct TrackerSet {
    factory: TrackerFactory,
    trackers: Vec<Box<dyn Tracker>>,
}

impl TrackerSet {
    /// 使用内置相关滤波跟踪器
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_factory(move || {
            Box::new(CorrelationTracker::new(config.clone())) as Box<dyn Tracker>
        })
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn Tracker> + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
            trackers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn clear(&mut self) {
        self.trackers.clear();
    }

    /// 为每个目标重新创建跟踪器
    ///
    /// 返回与 boxes 一一对应的结果, 初始化失败的目标不会进入集合
    pub fn initialize(&mut self, boxes: &[BBox], frame: &RgbImage) -> Vec<Result<(), TrackError>> {
        self.trackers.clear();
        boxes
            .iter()
            .map(|bbox| {
                let mut tracker = (self.factory)();
                tracker.init(*bbox, frame)?;
                self.trackers.push(tracker);
                Ok(())
            })
            .collect()
    }

    /// 更新所有跟踪器; 丢失或退化的目标从集合中移除
    pub fn update(&mut self, frame: &RgbImage) -> Vec<TrackOutcome> {
        let mut outcomes = Vec::with_capacity(self.trackers.len());
        let mut keep = Vec::with_capacity(self.trackers.len());

        for mut tracker in self.trackers.drain(..) {
            let outcome = match tracker.update(frame) {
                Ok(bbox) if bbox.is_degenerate() => TrackOutcome::Lost(TrackError::Lost(0.0)),
                Ok(bbox) => TrackOutcome::Tracked(bbox),
                Err(e) => TrackOutcome::Lost(e),
            };
            if matches!(outcome, TrackOutcome::Tracked(_)) {
                keep.push(tracker);
            }
            outcomes.push(outcome);
        }

        self.trackers = keep;
        outcomes
    }
}
