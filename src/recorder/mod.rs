// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 结果保存: 合成帧写入视频 (ez-ffmpeg) + 逐帧 JPEG
//!
//! - `<video_dir>/<case>.avi` (mjpeg), 帧率默认 20, 尺寸取第一帧
//! - `<frame_dir>/<case>_<index>.jpg`, 启动时清空 frame_dir
//! 写入失败返回错误, 由调用方记录日志, 不重试

pub mod ffmpeg;

pub use ffmpeg::FfmpegVideoWriter;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("video write failed: {0}")]
    Write(#[from] std::io::Error),
    #[error("jpeg encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("frame size {got:?} does not match video size {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("ffmpeg: {0}")]
    Ffmpeg(String),
    #[error("video already finished")]
    Finished,
}

/// 保存参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub frame_dir: PathBuf,
    pub video_dir: PathBuf,
    pub fps: u32,
    pub jpeg_quality: u8,
    pub save_frames: bool,
    pub save_video: bool,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            frame_dir: PathBuf::from("trackcap"),
            video_dir: PathBuf::from("video"),
            fps: 20,
            jpeg_quality: 90,
            save_frames: true,
            save_video: true,
        }
    }
}

/// 视频写入接口
pub trait VideoWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), RecordError>;

    /// 回填帧数与索引; 重复调用无副作用
    fn finish(&mut self) -> Result<(), RecordError>;

    fn frames(&self) -> u32;
}

pub struct Recorder {
    case: String,
    frame_dir: Option<PathBuf>,
    quality: u8,
    video: Option<Box<dyn VideoWriter>>,
    video_path: Option<PathBuf>,
}

impl Recorder {
    /// 准备输出目录并创建视频文件
    pub fn create(
        config: &RecordConfig,
        case: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, RecordError> {
        let frame_dir = if config.save_frames {
            reset_dir(&config.frame_dir)?;
            Some(config.frame_dir.clone())
        } else {
            None
        };

        let (video, video_path) = if config.save_video {
            fs::create_dir_all(&config.video_dir).map_err(|source| RecordError::Io {
                path: config.video_dir.clone(),
                source,
            })?;
            let path = config.video_dir.join(format!("{case}.avi"));
            let writer =
                FfmpegVideoWriter::create(&path, width, height, config.fps, config.jpeg_quality)?;
            log::info!(
                "🎬 视频输出: {} ({}x{} @ {} fps)",
                path.display(),
                width,
                height,
                config.fps
            );
            (Some(Box::new(writer) as Box<dyn VideoWriter>), Some(path))
        } else {
            (None, None)
        };

        Ok(Self {
            case: case.to_string(),
            frame_dir,
            quality: config.jpeg_quality,
            video,
            video_path,
        })
    }

    pub fn video_path(&self) -> Option<&Path> {
        self.video_path.as_deref()
    }

    pub fn frame_path(&self, index: usize) -> Option<PathBuf> {
        self.frame_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}_{}.jpg", self.case, index)))
    }

    pub fn frames_written(&self) -> u32 {
        self.video.as_ref().map_or(0, |v| v.frames())
    }

    /// 写入一帧; 视频与图片都会尝试, 返回第一个错误
    pub fn record(&mut self, index: usize, frame: &RgbImage) -> Result<(), RecordError> {
        let video_result = match self.video.as_mut() {
            Some(video) => video.write_frame(frame),
            None => Ok(()),
        };
        let image_result = match self.frame_path(index) {
            Some(path) => save_jpeg(&path, frame, self.quality),
            None => Ok(()),
        };
        video_result.and(image_result)
    }

    pub fn finish(&mut self) -> Result<(), RecordError> {
        match self.video.as_mut() {
            Some(video) => video.finish(),
            None => Ok(()),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("❌ 视频收尾失败: {}", e);
        }
    }
}

/// 删除并重建目录
fn reset_dir(dir: &Path) -> Result<(), RecordError> {
    let io_err = |source| RecordError::Io {
        path: dir.to_path_buf(),
        source,
    };
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(io_err)?;
    }
    fs::create_dir_all(dir).map_err(io_err)
}

fn save_jpeg(path: &Path, frame: &RgbImage, quality: u8) -> Result<(), RecordError> {
    let file = File::create(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(frame)?;
    out.flush()?;
    Ok(())
}
