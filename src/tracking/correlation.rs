// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 相关滤波跟踪器 (归一化互相关 + 多尺度搜索)
//! Template tracker with KCF-style padding, interpolation and scale pool

use image::RgbImage;

use super::{TrackError, Tracker, TrackerConfig};
use crate::geometry::BBox;

/// 模板最小边长
const MIN_TEMPLATE_SIDE: usize = 4;

#[derive(Clone)]
struct TrackState {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
    tw: usize,
    th: usize,
    template: Vec<f32>,
}

impl TrackState {
    fn bbox(&self) -> BBox {
        BBox::new(
            (self.cx - self.w / 2.0).round() as i32,
            (self.cy - self.h / 2.0).round() as i32,
            self.w.round() as i32,
            self.h.round() as i32,
        )
    }
}

/// 单目标相关跟踪器
pub struct CorrelationTracker {
    config: TrackerConfig,
    state: Option<TrackState>,
}

impl CorrelationTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    fn scales(&self) -> [f32; 3] {
        let step = self.config.scale_step.max(1.0);
        [1.0, 1.0 / step, step]
    }
}

impl Tracker for CorrelationTracker {
    fn init(&mut self, bbox: BBox, frame: &RgbImage) -> Result<(), TrackError> {
        if !bbox.intersects_frame(frame.width(), frame.height()) {
            return Err(TrackError::InvalidRegion(bbox));
        }

        let (w, h) = (bbox.width as f32, bbox.height as f32);
        let (cx, cy) = bbox.center();
        let s = self.config.template_size.max(MIN_TEMPLATE_SIDE as u32) as f32 / w.max(h);
        let tw = ((w * s).round() as usize).max(MIN_TEMPLATE_SIDE);
        let th = ((h * s).round() as usize).max(MIN_TEMPLATE_SIDE);

        let template = sample_patch(frame, cx, cy, w, h, tw, th);
        self.state = Some(TrackState {
            cx,
            cy,
            w,
            h,
            tw,
            th,
            template,
        });
        Ok(())
    }

    fn update(&mut self, frame: &RgbImage) -> Result<BBox, TrackError> {
        let scales = self.scales();
        let padding = self.config.padding.max(1.0);
        let state = self.state.as_mut().ok_or(TrackError::NotInitialized)?;

        let (template, t_norm) = zero_mean(&state.template);
        if t_norm < 1e-3 {
            // 无纹理目标: 保持原位置
            return Ok(state.bbox());
        }

        let gw = ((state.tw as f32 * padding).round() as usize).max(state.tw);
        let gh = ((state.th as f32 * padding).round() as usize).max(state.th);

        let mut best: Option<(f32, f32, f32, f32)> = None; // (score, cx, cy, scale)
        let mut best_peak = f32::NEG_INFINITY;
        for scale in scales {
            let sw = state.w * scale;
            let sh = state.h * scale;
            let region = sample_patch(frame, state.cx, state.cy, sw * padding, sh * padding, gw, gh);
            let (peak, dx, dy) = ncc_search(&region, gw, gh, &template, state.tw, state.th);

            let score = if scale == 1.0 {
                peak
            } else {
                peak * self.config.scale_weight
            };
            if best.map_or(true, |(s, ..)| score > s) {
                let px = sw * padding / gw as f32;
                let py = sh * padding / gh as f32;
                let shift_x = dx as f32 + state.tw as f32 / 2.0 - gw as f32 / 2.0;
                let shift_y = dy as f32 + state.th as f32 / 2.0 - gh as f32 / 2.0;
                best = Some((score, state.cx + shift_x * px, state.cy + shift_y * py, scale));
                best_peak = peak;
            }
        }

        let Some((_, cx, cy, scale)) = best else {
            return Err(TrackError::Lost(0.0));
        };
        if best_peak < self.config.lost_threshold {
            return Err(TrackError::Lost(best_peak));
        }

        state.cx = cx;
        state.cy = cy;
        state.w *= scale;
        state.h *= scale;

        let bbox = state.bbox();
        if !bbox.intersects_frame(frame.width(), frame.height()) {
            return Err(TrackError::Lost(best_peak));
        }

        // 模板线性插值更新
        let patch = sample_patch(frame, cx, cy, state.w, state.h, state.tw, state.th);
        let eta = self.config.interp_factor.clamp(0.0, 1.0);
        for (t, p) in state.template.iter_mut().zip(patch) {
            *t = (1.0 - eta) * *t + eta * p;
        }

        Ok(bbox)
    }
}

/// 灰度值 (BT.601)
fn luma(frame: &RgbImage, x: u32, y: u32) -> f32 {
    let p = frame.get_pixel(x, y).0;
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// 双线性采样, 越界按边缘像素处理
fn sample_gray(frame: &RgbImage, x: f32, y: f32) -> f32 {
    let max_x = frame.width().saturating_sub(1) as f32;
    let max_y = frame.height().saturating_sub(1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = (x0 + 1.0).min(max_x);
    let y1 = (y0 + 1.0).min(max_y);
    let wx = x - x0;
    let wy = y - y0;

    let tl = luma(frame, x0 as u32, y0 as u32);
    let tr = luma(frame, x1 as u32, y0 as u32);
    let bl = luma(frame, x0 as u32, y1 as u32);
    let br = luma(frame, x1 as u32, y1 as u32);

    let top = tl + (tr - tl) * wx;
    let bottom = bl + (br - bl) * wx;
    top + (bottom - top) * wy
}

/// 以 (cx, cy) 为中心、(pw, ph) 大小的区域重采样为 out_w x out_h 网格
fn sample_patch(
    frame: &RgbImage,
    cx: f32,
    cy: f32,
    pw: f32,
    ph: f32,
    out_w: usize,
    out_h: usize,
) -> Vec<f32> {
    let left = cx - pw / 2.0;
    let top = cy - ph / 2.0;
    let step_x = pw / out_w as f32;
    let step_y = ph / out_h as f32;
    let mut out = Vec::with_capacity(out_w * out_h);
    for j in 0..out_h {
        let y = top + (j as f32 + 0.5) * step_y - 0.5;
        for i in 0..out_w {
            let x = left + (i as f32 + 0.5) * step_x - 0.5;
            out.push(sample_gray(frame, x, y));
        }
    }
    out
}

/// 去均值, 返回 (零均值模板, L2范数)
fn zero_mean(values: &[f32]) -> (Vec<f32>, f32) {
    let mean = values.iter().sum::<f32>() / values.len().max(1) as f32;
    let centered: Vec<f32> = values.iter().map(|v| v - mean).collect();
    let norm = centered.iter().map(|v| v * v).sum::<f32>().sqrt();
    (centered, norm)
}

/// 积分图 (和 / 平方和), 尺寸 (w+1) x (h+1)
fn integral_images(data: &[f32], w: usize, h: usize) -> (Vec<f64>, Vec<f64>) {
    let stride = w + 1;
    let mut sum = vec![0.0f64; stride * (h + 1)];
    let mut sq = vec![0.0f64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0.0f64;
        let mut row_sq = 0.0f64;
        for x in 0..w {
            let v = data[y * w + x] as f64;
            row_sum += v;
            row_sq += v * v;
            sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
            sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
        }
    }
    (sum, sq)
}

fn box_sum(table: &[f64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> f64 {
    table[(y + h) * stride + x + w] - table[y * stride + x + w] - table[(y + h) * stride + x]
        + table[y * stride + x]
}

/// 在搜索区域内滑动模板, 返回 (峰值, dx, dy)
///
/// 先以步长2粗搜索, 再在峰值邻域逐像素细化
fn ncc_search(
    region: &[f32],
    gw: usize,
    gh: usize,
    template: &[f32],
    tw: usize,
    th: usize,
) -> (f32, usize, usize) {
    let (sum, sq) = integral_images(region, gw, gh);
    let stride = gw + 1;
    let n = (tw * th) as f64;
    let t_norm = template.iter().map(|v| (v * v) as f64).sum::<f64>().sqrt();

    let score = |dx: usize, dy: usize| -> f32 {
        let s = box_sum(&sum, stride, dx, dy, tw, th);
        let s2 = box_sum(&sq, stride, dx, dy, tw, th);
        let var = s2 - s * s / n;
        if var <= 1e-6 || t_norm <= 1e-6 {
            return 0.0;
        }
        let mut acc = 0.0f64;
        for j in 0..th {
            let row = &region[(dy + j) * gw + dx..(dy + j) * gw + dx + tw];
            let trow = &template[j * tw..(j + 1) * tw];
            acc += row
                .iter()
                .zip(trow)
                .map(|(p, t)| (*p as f64) * (*t as f64))
                .sum::<f64>();
        }
        (acc / (var.sqrt() * t_norm)) as f32
    };

    let max_dx = gw - tw;
    let max_dy = gh - th;
    let mut best = (f32::NEG_INFINITY, max_dx / 2, max_dy / 2);

    for dy in (0..=max_dy).step_by(2) {
        for dx in (0..=max_dx).step_by(2) {
            let v = score(dx, dy);
            if v > best.0 {
                best = (v, dx, dy);
            }
        }
    }

    let (_, cx, cy) = best;
    for dy in cy.saturating_sub(1)..=(cy + 1).min(max_dy) {
        for dx in cx.saturating_sub(1)..=(cx + 1).min(max_dx) {
            let v = score(dx, dy);
            if v > best.0 {
                best = (v, dx, dy);
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const SIZE: i32 = 30;

    /// 黑色背景上绘制四象限目标
    fn scene(ox: i32, oy: i32) -> RgbImage {
        let mut img = RgbImage::from_pixel(160, 120, Rgb([20, 20, 20]));
        for y in 0..SIZE {
            for x in 0..SIZE {
                let v = match (x < SIZE / 2, y < SIZE / 2) {
                    (true, true) => 200,
                    (false, true) => 80,
                    (true, false) => 140,
                    (false, false) => 255,
                };
                let (px, py) = (ox + x, oy + y);
                if px >= 0 && py >= 0 && px < 160 && py < 120 {
                    img.put_pixel(px as u32, py as u32, Rgb([v, v, v]));
                }
            }
        }
        img
    }

    fn test_config() -> TrackerConfig {
        TrackerConfig {
            template_size: 24,
            ..Default::default()
        }
    }

    #[test]
    fn follows_moving_target() {
        let mut tracker = CorrelationTracker::new(test_config());
        tracker
            .init(BBox::new(40, 30, SIZE, SIZE), &scene(40, 30))
            .unwrap();

        let (mut ox, mut oy) = (40, 30);
        for _ in 0..8 {
            ox += 4;
            oy += 2;
            let bbox = tracker.update(&scene(ox, oy)).unwrap();
            assert!((bbox.x - ox).abs() <= 2, "x {} vs {}", bbox.x, ox);
            assert!((bbox.y - oy).abs() <= 2, "y {} vs {}", bbox.y, oy);
            assert!((bbox.width - SIZE).abs() <= 4);
        }
    }

    #[test]
    fn reports_loss_when_target_vanishes() {
        let mut tracker = CorrelationTracker::new(test_config());
        tracker
            .init(BBox::new(40, 30, SIZE, SIZE), &scene(40, 30))
            .unwrap();
        let empty = RgbImage::from_pixel(160, 120, Rgb([20, 20, 20]));
        assert!(matches!(tracker.update(&empty), Err(TrackError::Lost(_))));
    }

    #[test]
    fn rejects_invalid_regions() {
        let frame = scene(40, 30);
        let mut tracker = CorrelationTracker::new(test_config());
        assert!(matches!(
            tracker.update(&frame),
            Err(TrackError::NotInitialized)
        ));
        assert!(matches!(
            tracker.init(BBox::new(10, 10, 0, 20), &frame),
            Err(TrackError::InvalidRegion(_))
        ));
        assert!(matches!(
            tracker.init(BBox::new(500, 10, 20, 20), &frame),
            Err(TrackError::InvalidRegion(_))
        ));
    }

    #[test]
    fn ncc_finds_exact_offset() {
        let (gw, gh, tw, th) = (12usize, 10usize, 4usize, 3usize);
        let mut region = vec![0.0f32; gw * gh];
        let pattern = [1.0, 5.0, 2.0, 7.0, 3.0, 9.0, 4.0, 1.0, 8.0, 2.0, 6.0, 3.0];
        for j in 0..th {
            for i in 0..tw {
                region[(5 + j) * gw + 7 + i] = pattern[j * tw + i];
            }
        }
        let (template, _) = zero_mean(&pattern);
        let (peak, dx, dy) = ncc_search(&region, gw, gh, &template, tw, th);
        assert_eq!((dx, dy), (7, 5));
        assert!((peak - 1.0).abs() < 1e-4);
    }
}
