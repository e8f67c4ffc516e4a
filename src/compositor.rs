// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 画面合成: 在原始帧的副本上绘制跟踪框 / 拖拽框 / 描述区域 / 描述文字
//!
//! 原始帧只读, 跟踪器与描述线程始终看到未标注的图像

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::caption::CaptionText;
use crate::geometry::{BBox, CaptureRegion};

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const PURPLE: Rgb<u8> = Rgb([128, 0, 255]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// 未指定字体时依次尝试
const FALLBACK_FONTS: [&str; 4] = [
    "assets/font/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 取色条高度 (自动文字颜色)
const COLOR_STRIP_ROWS: u32 = 20;

/// 绘制参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub line_spacing: i32,
    pub box_thickness: i32,
    pub drag_thickness: i32,
    pub region_thickness: i32,
    pub auto_text_color: bool, // 文字颜色取描述区域顶部的互补色
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: 13.0,
            line_spacing: 12,
            box_thickness: 2,
            drag_thickness: 2,
            region_thickness: 1,
            auto_text_color: false,
        }
    }
}

pub struct Compositor {
    config: RenderConfig,
    font: Option<FontVec>,
}

impl Compositor {
    pub fn new(config: RenderConfig) -> Self {
        let font = load_font(config.font_path.as_deref());
        Self::with_font(config, font)
    }

    pub fn with_font(config: RenderConfig, font: Option<FontVec>) -> Self {
        Self { config, font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 框选阶段: 已有目标 + 正在拖拽的矩形
    pub fn draw_selection(
        &self,
        raw: &RgbImage,
        boxes: &[BBox],
        drag: Option<((i32, i32), (i32, i32))>,
    ) -> RgbImage {
        let mut canvas = raw.clone();
        self.draw_boxes(&mut canvas, boxes);
        if let Some(((x0, y0), (x1, y1))) = drag {
            let rect = BBox::from_corners(x0, y0, x1, y1);
            draw_thick_rect(&mut canvas, &rect, PURPLE, self.config.drag_thickness);
        }
        canvas
    }

    /// 跟踪阶段: 跟踪框 + 描述区域 + 描述文字
    pub fn draw_tracking(
        &self,
        raw: &RgbImage,
        boxes: &[BBox],
        region: Option<&CaptureRegion>,
        caption: Option<&CaptionText>,
    ) -> RgbImage {
        let mut canvas = raw.clone();
        self.draw_boxes(&mut canvas, boxes);

        if let Some(region) = region {
            // 闭区间: 右 / 下边落在 right / bottom 上
            let rect = BBox::new(
                region.left,
                region.top,
                region.width() as i32 + 1,
                region.height() as i32 + 1,
            );
            draw_thick_rect(&mut canvas, &rect, CYAN, self.config.region_thickness);

            if let Some(caption) = caption {
                let color = if self.config.auto_text_color {
                    strip_complement(raw, region)
                } else {
                    WHITE
                };
                self.draw_caption(&mut canvas, region, caption, color);
            }
        }
        canvas
    }

    fn draw_boxes(&self, canvas: &mut RgbImage, boxes: &[BBox]) {
        for bbox in boxes {
            draw_thick_rect(canvas, bbox, GREEN, self.config.box_thickness);
        }
    }

    /// 描述文字锚定在区域左上角 (left + 2, top), 逐行下移
    fn draw_caption(
        &self,
        canvas: &mut RgbImage,
        region: &CaptureRegion,
        caption: &CaptionText,
        color: Rgb<u8>,
    ) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(self.config.font_size);
        let x = region.left + 2;
        for (i, line) in caption.lines.iter().enumerate() {
            let y = region.top + 1 + i as i32 * self.config.line_spacing;
            draw_text_mut(canvas, color, x, y, scale, font, line);
        }
    }
}

/// 按线宽向内外扩展绘制空心矩形
fn draw_thick_rect(canvas: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: i32) {
    let thickness = thickness.max(1);
    let half = thickness / 2;
    for i in 0..thickness {
        let offset = i - half;
        let w = bbox.width + offset * 2;
        let h = bbox.height + offset * 2;
        if w <= 0 || h <= 0 {
            continue;
        }
        let rect = Rect::at(bbox.x - offset, bbox.y - offset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// 加载字体; 找不到时只警告一次, 之后不再绘制文字
fn load_font(path: Option<&Path>) -> Option<FontVec> {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![p.to_path_buf()],
        None => FALLBACK_FONTS.iter().map(PathBuf::from).collect(),
    };

    for candidate in &candidates {
        let Ok(bytes) = std::fs::read(candidate) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                log::info!("✅ 字体加载成功: {}", candidate.display());
                return Some(font);
            }
            Err(e) => log::warn!("⚠️ 字体加载失败 {}: {}", candidate.display(), e),
        }
    }

    log::warn!("⚠️ 未找到可用字体, 描述文字将不会绘制 (使用 --font 指定)");
    None
}

/// min + max
pub fn hilo(a: u8, b: u8, c: u8) -> u16 {
    let lo = a.min(b).min(c);
    let hi = a.max(b).max(c);
    lo as u16 + hi as u16
}

/// 互补色: 每个通道取 (min + max) - v
pub fn complement(color: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = color.0;
    let k = hilo(r, g, b);
    Rgb([(k - r as u16) as u8, (k - g as u16) as u8, (k - b as u16) as u8])
}

/// 描述区域顶部条带平均色的互补色
fn strip_complement(raw: &RgbImage, region: &CaptureRegion) -> Rgb<u8> {
    let right = (region.right.max(0) as u32).min(raw.width());
    let left = (region.left.max(0) as u32).min(right);
    let top = (region.top.max(0) as u32).min(raw.height());
    let bottom = (top + COLOR_STRIP_ROWS).min(region.bottom.max(0) as u32).min(raw.height());

    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for y in top..bottom {
        for x in left..right {
            let p = raw.get_pixel(x, y).0;
            for c in 0..3 {
                sum[c] += p[c] as u64;
            }
            count += 1;
        }
    }
    if count == 0 {
        return WHITE;
    }
    let mean = Rgb([
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
    ]);
    complement(mean)
}
