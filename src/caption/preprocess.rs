// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
// 描述模型预处理: 裁剪 → 缩放 → 去均值 → NCHW

use fast_image_resize as fr;
use image::RgbImage;
use ndarray::Array4;

use super::{CaptionError, ChannelOrder};
use crate::geometry::CaptureRegion;

/// 按描述区域裁剪 (左闭右开, 越界部分截断)
pub fn crop(frame: &RgbImage, region: &CaptureRegion) -> Result<RgbImage, CaptionError> {
    let left = region.left.max(0) as u32;
    let top = region.top.max(0) as u32;
    let right = (region.right.max(0) as u32).min(frame.width());
    let bottom = (region.bottom.max(0) as u32).min(frame.height());
    if right <= left || bottom <= top {
        return Err(CaptionError::EmptyRegion);
    }
    Ok(image::imageops::crop_imm(frame, left, top, right - left, bottom - top).to_image())
}

/// 缩放到 size x size (fast_image_resize, 双线性)
pub fn resize(image: &RgbImage, size: u32) -> Result<RgbImage, CaptionError> {
    if image.width() == size && image.height() == size {
        return Ok(image.clone());
    }
    let src = fr::images::Image::from_vec_u8(
        image.width(),
        image.height(),
        image.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| CaptionError::Preprocess(e.to_string()))?;
    let mut dst = fr::images::Image::new(size, size, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| CaptionError::Preprocess(e.to_string()))?;

    RgbImage::from_raw(size, size, dst.into_vec())
        .ok_or_else(|| CaptionError::Preprocess("resized buffer size mismatch".into()))
}

/// HWC u8 → NCHW f32, 每个通道减去对应均值
///
/// `mean_bgr` 为 (B, G, R) 顺序; 输出通道按 `order` 排列
pub fn to_tensor(image: &RgbImage, mean_bgr: [f32; 3], order: ChannelOrder) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    // RGB 通道对应的均值
    let mean_rgb = [mean_bgr[2], mean_bgr[1], mean_bgr[0]];
    let planes: [usize; 3] = match order {
        ChannelOrder::Rgb => [0, 1, 2],
        ChannelOrder::Bgr => [2, 1, 0],
    };

    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in image.enumerate_pixels() {
        for (c, &src) in planes.iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] = pixel[src] as f32 - mean_rgb[src];
        }
    }
    tensor
}

/// 完整预处理
pub fn prepare(
    frame: &RgbImage,
    size: u32,
    mean_bgr: [f32; 3],
    order: ChannelOrder,
) -> Result<Array4<f32>, CaptionError> {
    let resized = resize(frame, size)?;
    Ok(to_tensor(&resized, mean_bgr, order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const MEAN: [f32; 3] = [103.939, 116.779, 123.68];

    #[test]
    fn crop_excludes_right_and_bottom_edges() {
        let mut frame = RgbImage::new(100, 80);
        frame.put_pixel(10, 20, Rgb([255, 0, 0]));
        let region = CaptureRegion {
            left: 10,
            right: 30,
            top: 20,
            bottom: 50,
        };
        let cropped = crop(&frame, &region).unwrap();
        assert_eq!(cropped.dimensions(), (20, 30));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn crop_outside_frame_fails() {
        let frame = RgbImage::new(50, 50);
        let region = CaptureRegion {
            left: 60,
            right: 70,
            top: 0,
            bottom: 10,
        };
        assert!(matches!(crop(&frame, &region), Err(CaptionError::EmptyRegion)));
    }

    #[test]
    fn resize_to_model_size() {
        let frame = RgbImage::from_pixel(300, 200, Rgb([10, 20, 30]));
        let out = resize(&frame, 224).unwrap();
        assert_eq!(out.dimensions(), (224, 224));
        let px = out.get_pixel(100, 100);
        for (got, want) in px.0.iter().zip([10u8, 20, 30]) {
            assert!(got.abs_diff(want) <= 1);
        }
    }

    #[test]
    fn tensor_is_mean_subtracted_nchw() {
        let frame = RgbImage::from_pixel(4, 3, Rgb([124, 117, 104]));
        let rgb = to_tensor(&frame, MEAN, ChannelOrder::Rgb);
        assert_eq!(rgb.shape(), &[1, 3, 3, 4]);
        assert!((rgb[[0, 0, 2, 3]] - (124.0 - 123.68)).abs() < 1e-4);
        assert!((rgb[[0, 2, 0, 0]] - (104.0 - 103.939)).abs() < 1e-4);

        let bgr = to_tensor(&frame, MEAN, ChannelOrder::Bgr);
        assert_eq!(bgr[[0, 0, 1, 1]], rgb[[0, 2, 1, 1]]);
        assert_eq!(bgr[[0, 2, 1, 1]], rgb[[0, 0, 1, 1]]);
    }
}
