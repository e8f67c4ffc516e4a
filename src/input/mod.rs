// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 图片序列输入 (Frame Source)
///
/// 读取 `<dir>/img/` 下的图片, 按文件名字典序逐帧解码
/// - 有限序列, 运行中不可重新开始
/// - 每帧以 `Arc<RgbImage>` 共享给跟踪器与描述线程
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

/// 支持的图片扩展名
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read frame directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no images found in {0}")]
    Empty(PathBuf),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// 单帧原始图像
#[derive(Clone)]
pub struct Frame {
    pub index: usize,
    pub path: PathBuf,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 按文件名排序的图片序列
pub struct FrameSource {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl FrameSource {
    /// 打开输入目录 (自动进入 img/ 子目录)
    pub fn open(input_dir: &Path) -> Result<Self, InputError> {
        let img_dir = input_dir.join("img");
        let dir = if img_dir.is_dir() {
            img_dir
        } else {
            input_dir.to_path_buf()
        };

        let entries = fs::read_dir(&dir).map_err(|source| InputError::Directory {
            path: dir.clone(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(InputError::Empty(dir));
        }

        log::info!("📂 输入目录: {} ({} 帧)", dir.display(), files.len());
        Ok(Self { files, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 第一帧的尺寸 (用于初始化视频输出)
    pub fn probe_size(&self) -> Result<(u32, u32), InputError> {
        let path = &self.files[0];
        image::image_dimensions(path).map_err(|source| InputError::Decode {
            path: path.clone(),
            source,
        })
    }

    /// 读取下一帧, 序列结束时返回 None
    pub fn next_frame(&mut self) -> Option<Result<Frame, InputError>> {
        let path = self.files.get(self.cursor)?.clone();
        let index = self.cursor;
        self.cursor += 1;

        Some(
            image::open(&path)
                .map(|img| Frame {
                    index,
                    path: path.clone(),
                    image: Arc::new(img.into_rgb8()),
                })
                .map_err(|source| InputError::Decode { path, source }),
        )
    }
}

impl Iterator for FrameSource {
    type Item = Result<Frame, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frame(dir: &Path, name: &str, value: u8) {
        let img = RgbImage::from_pixel(8, 6, Rgb([value, value, value]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn frames_are_read_in_lexicographic_order() {
        let root = tempfile::tempdir().unwrap();
        let img_dir = root.path().join("img");
        fs::create_dir(&img_dir).unwrap();
        write_frame(&img_dir, "0002.png", 20);
        write_frame(&img_dir, "0001.png", 10);
        write_frame(&img_dir, "0010.png", 100);
        fs::write(img_dir.join("notes.txt"), "skip me").unwrap();

        let source = FrameSource::open(root.path()).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.probe_size().unwrap(), (8, 6));

        let frames: Vec<Frame> = source.map(|f| f.unwrap()).collect();
        let values: Vec<u8> = frames.iter().map(|f| f.image.get_pixel(0, 0)[0]).collect();
        assert_eq!(values, vec![10, 20, 100]);
        assert_eq!(frames[2].index, 2);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("img")).unwrap();
        assert!(matches!(
            FrameSource::open(root.path()),
            Err(InputError::Empty(_))
        ));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            FrameSource::open(&root.path().join("missing")),
            Err(InputError::Directory { .. })
        ));
    }
}
