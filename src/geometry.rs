// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 跟踪框与描述区域
//! Bounding boxes and the caption capture window

use serde::{Deserialize, Serialize};

/// 跟踪框 (x, y, width, height), 像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 由两个角点构造 (顺序无关)
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    pub fn xmax(&self) -> i32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> i32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// 面积为零的框视为跟踪丢失
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// 框与画面是否有交集
    pub fn intersects_frame(&self, width: u32, height: u32) -> bool {
        !self.is_degenerate()
            && self.xmax() > 0
            && self.ymax() > 0
            && self.x < width as i32
            && self.y < height as i32
    }

    /// "x,y,w,h" 格式解析 (命令行 --box)
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<i32> = s
            .split(',')
            .map(|p| p.trim().parse::<i32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid box '{s}': {e}"))?;
        match parts.as_slice() {
            [x, y, w, h] if *w > 0 && *h > 0 => Ok(Self::new(*x, *y, *w, *h)),
            [_, _, _, _] => Err(format!("box '{s}' must have positive width and height")),
            _ => Err(format!("box '{s}' must be x,y,w,h")),
        }
    }
}

/// 描述区域 (left, right, top, bottom), 闭区间像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureRegion {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl CaptureRegion {
    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// 描述区域参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub min_side: f32,      // 最小边长
    pub box_scale: f32,     // 相对跟踪框长边的倍数
    pub max_frame_ratio: f32, // 不超过画面短边的比例
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            min_side: 200.0,
            box_scale: 3.0,
            max_frame_ratio: 0.75,
        }
    }
}

impl RegionConfig {
    /// 描述区域的目标边长
    pub fn side_length(&self, bbox: &BBox, frame_width: u32, frame_height: u32) -> f32 {
        let longest = bbox.width.max(bbox.height).max(0) as f32;
        let ceiling = self.max_frame_ratio * frame_width.min(frame_height) as f32;
        (self.min_side.max(self.box_scale * longest)).min(ceiling)
    }

    /// 以跟踪框为中心向外扩展为近似正方形, 并限制在画面内
    pub fn capture_region(
        &self,
        bbox: &BBox,
        frame_width: u32,
        frame_height: u32,
    ) -> CaptureRegion {
        let side = self.side_length(bbox, frame_width, frame_height);
        let ew = ((side - bbox.width as f32).max(0.0) / 2.0) as i32;
        let eh = ((side - bbox.height as f32).max(0.0) / 2.0) as i32;

        let max_x = frame_width.saturating_sub(1) as i32;
        let max_y = frame_height.saturating_sub(1) as i32;

        let left = (bbox.x - ew).clamp(0, max_x);
        let right = (bbox.xmax() + ew).clamp(left, max_x);
        let top = (bbox.y - eh).clamp(0, max_y);
        let bottom = (bbox.ymax() + eh).clamp(top, max_y);

        CaptureRegion {
            left,
            right,
            top,
            bottom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_box_gets_minimum_window() {
        let cfg = RegionConfig::default();
        let bbox = BBox::new(100, 100, 20, 20);
        assert_eq!(cfg.side_length(&bbox, 640, 480), 200.0);
        let region = cfg.capture_region(&bbox, 640, 480);
        assert_eq!(
            region,
            CaptureRegion {
                left: 10,
                right: 210,
                top: 10,
                bottom: 210
            }
        );
    }

    #[test]
    fn side_is_capped_by_frame() {
        let cfg = RegionConfig::default();
        let bbox = BBox::new(50, 50, 200, 150);
        // 3 * 200 = 600 > 0.75 * 480
        assert_eq!(cfg.side_length(&bbox, 640, 480), 360.0);
    }

    #[test]
    fn side_is_monotonic_in_box_size() {
        let cfg = RegionConfig::default();
        let mut last = 0.0;
        for size in 1..400 {
            let side = cfg.side_length(&BBox::new(0, 0, size, size / 2 + 1), 640, 480);
            assert!(side >= last, "size {size}: {side} < {last}");
            assert!(side <= 360.0);
            last = side;
        }
    }

    #[test]
    fn region_stays_inside_frame() {
        let cfg = RegionConfig::default();
        let (w, h) = (320u32, 240u32);
        for x in (0..w as i32).step_by(17) {
            for y in (0..h as i32).step_by(13) {
                for size in [1, 11, 40, 90, 200] {
                    let bbox = BBox::new(x, y, size, size);
                    let r = cfg.capture_region(&bbox, w, h);
                    assert!(r.left >= 0 && r.left <= r.right && r.right <= w as i32 - 1);
                    assert!(r.top >= 0 && r.top <= r.bottom && r.bottom <= h as i32 - 1);
                }
            }
        }
    }

    #[test]
    fn region_of_box_outside_frame_is_clamped() {
        let cfg = RegionConfig::default();
        let r = cfg.capture_region(&BBox::new(900, 700, 30, 30), 640, 480);
        assert_eq!(r.right, 639);
        assert_eq!(r.bottom, 479);
        assert!(r.left <= r.right && r.top <= r.bottom);
    }

    #[test]
    fn from_corners_normalises() {
        assert_eq!(BBox::from_corners(50, 80, 10, 20), BBox::new(10, 20, 40, 60));
    }

    #[test]
    fn parse_box_argument() {
        assert_eq!(BBox::parse("1, 2,30,40").unwrap(), BBox::new(1, 2, 30, 40));
        assert!(BBox::parse("1,2,3").is_err());
        assert!(BBox::parse("1,2,0,4").is_err());
        assert!(BBox::parse("a,b,c,d").is_err());
    }

    #[test]
    fn degenerate_boxes() {
        assert!(BBox::new(5, 5, 0, 10).is_degenerate());
        assert!(!BBox::new(5, 5, 1, 1).is_degenerate());
        assert!(!BBox::new(-50, 0, 20, 20).intersects_frame(100, 100));
        assert!(BBox::new(90, 90, 20, 20).intersects_frame(100, 100));
    }
}
