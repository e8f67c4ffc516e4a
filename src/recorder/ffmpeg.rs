// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! FFmpeg 视频输出 (ez-ffmpeg)
//!
//! 合成帧先按序号写入暂存目录 `<video>.frames/000000.jpg ...`,
//! finish 时以 image2 序列为输入编码为 `<case>.avi` (mjpeg), 然后删除暂存目录

use std::fs;
use std::path::{Path, PathBuf};

use ez_ffmpeg::{FfmpegContext, Input, Output};
use image::RgbImage;

use super::{save_jpeg, RecordError, VideoWriter};

/// 暂存帧文件名 (image2 序列)
const STAGE_PATTERN: &str = "%06d.jpg";

pub struct FfmpegVideoWriter {
    path: PathBuf,
    stage_dir: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    quality: u8,
    frames: u32,
    finished: bool,
}

impl FfmpegVideoWriter {
    pub fn create(
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
        quality: u8,
    ) -> Result<Self, RecordError> {
        let stage_dir = stage_dir_for(path);
        super::reset_dir(&stage_dir)?;
        Ok(Self {
            path: path.to_path_buf(),
            stage_dir,
            width,
            height,
            fps: fps.max(1),
            quality,
            frames: 0,
            finished: false,
        })
    }

    pub fn stage_dir(&self) -> &Path {
        &self.stage_dir
    }

    fn stage_frame_path(&self, index: u32) -> PathBuf {
        self.stage_dir.join(format!("{:06}.jpg", index))
    }

    /// 暂存序列 → `<case>.avi`
    fn encode(&self) -> Result<(), RecordError> {
        let pattern = self.stage_dir.join(STAGE_PATTERN);
        let fps = self.fps.to_string();

        let input = Input::new(pattern.to_string_lossy().into_owned())
            .set_format("image2")
            .set_input_opts([("framerate", fps.as_str()), ("start_number", "0")].into());
        let output = Output::from(self.path.to_string_lossy().into_owned())
            .set_format("avi")
            .set_video_codec("mjpeg");

        let ctx = FfmpegContext::builder()
            .input(input)
            .output(output)
            .build()
            .map_err(|e| RecordError::Ffmpeg(format!("构建失败: {}", e)))?;
        let sch = ctx
            .start()
            .map_err(|e| RecordError::Ffmpeg(format!("启动失败: {}", e)))?;
        sch.wait()
            .map_err(|e| RecordError::Ffmpeg(format!("编码失败: {}", e)))?;
        Ok(())
    }
}

impl VideoWriter for FfmpegVideoWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), RecordError> {
        if self.finished {
            return Err(RecordError::Finished);
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(RecordError::FrameSize {
                expected: (self.width, self.height),
                got: frame.dimensions(),
            });
        }
        save_jpeg(&self.stage_frame_path(self.frames), frame, self.quality)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RecordError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let result = if self.frames == 0 {
            log::warn!("⚠️ 没有帧可写入, 跳过视频 {}", self.path.display());
            Ok(())
        } else {
            log::info!("🎬 编码视频: {} ({} 帧)", self.path.display(), self.frames);
            self.encode()
        };

        if let Err(e) = fs::remove_dir_all(&self.stage_dir) {
            log::warn!("⚠️ 清理暂存目录失败 {}: {}", self.stage_dir.display(), e);
        }
        result
    }

    fn frames(&self) -> u32 {
        self.frames
    }
}

/// `video/case.avi` → `video/case.frames`
fn stage_dir_for(path: &Path) -> PathBuf {
    path.with_extension("frames")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn frames_are_staged_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.avi");
        let mut writer = FfmpegVideoWriter::create(&path, 16, 12, 20, 90).unwrap();
        assert_eq!(writer.stage_dir(), dir.path().join("case.frames"));

        let frame = RgbImage::from_pixel(16, 12, Rgb([10, 200, 10]));
        writer.write_frame(&frame).unwrap();
        writer.write_frame(&frame).unwrap();
        assert_eq!(writer.frames(), 2);
        assert!(writer.stage_dir().join("000000.jpg").exists());
        assert!(writer.stage_dir().join("000001.jpg").exists());
    }

    #[test]
    fn frame_size_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            FfmpegVideoWriter::create(&dir.path().join("case.avi"), 16, 12, 20, 90).unwrap();
        assert!(matches!(
            writer.write_frame(&RgbImage::new(8, 8)),
            Err(RecordError::FrameSize {
                expected: (16, 12),
                got: (8, 8)
            })
        ));
        assert_eq!(writer.frames(), 0);
    }

    #[test]
    fn empty_video_cleans_up_without_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.avi");
        let mut writer = FfmpegVideoWriter::create(&path, 16, 12, 20, 90).unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();

        assert!(!writer.stage_dir().exists());
        assert!(!path.exists());
        assert!(matches!(
            writer.write_frame(&RgbImage::new(16, 12)),
            Err(RecordError::Finished)
        ));
    }
}
