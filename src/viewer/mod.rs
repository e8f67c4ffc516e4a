// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! macroquad 交互窗口
//!
//! - 画面等比缩放居中显示, 鼠标坐标换算回图像坐标
//! - 左键拖拽框选, C 继续 / E 重置 / Q, Esc 退出
//! - egui 状态面板
//! 每隔 key_poll_ms 推进一次 Session, 等待描述时窗口保持响应

use std::time::Instant;

use egui_macroquad::egui;
use image::RgbImage;
use macroquad::prelude::*;

use crate::session::{Input, KeyCommand, Session, StepOutcome};

/// 默认窗口配置
pub fn window_conf(width: u32, height: u32) -> Conf {
    Conf {
        window_title: "trackcap - 跟踪 + 图像描述".to_owned(),
        window_width: width.clamp(320, 1600) as i32,
        window_height: height.clamp(240, 1000) as i32,
        window_resizable: true,
        ..Default::default()
    }
}

/// 画面在窗口中的位置: (左上角 x, 左上角 y, 缩放)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

impl Viewport {
    /// 等比缩放居中
    pub fn fit(screen: (f32, f32), image: (u32, u32)) -> Self {
        let (iw, ih) = (image.0.max(1) as f32, image.1.max(1) as f32);
        let scale = (screen.0 / iw).min(screen.1 / ih).max(f32::EPSILON);
        Self {
            x: (screen.0 - iw * scale) / 2.0,
            y: (screen.1 - ih * scale) / 2.0,
            scale,
        }
    }

    /// 窗口坐标 → 图像坐标 (限制在图像范围内)
    pub fn to_image(&self, mouse: (f32, f32), image: (u32, u32)) -> (i32, i32) {
        let x = ((mouse.0 - self.x) / self.scale).round() as i32;
        let y = ((mouse.1 - self.y) / self.scale).round() as i32;
        (
            x.clamp(0, image.0.saturating_sub(1) as i32),
            y.clamp(0, image.1.saturating_sub(1) as i32),
        )
    }
}

struct Viewer {
    session: Session,
    texture: Option<Texture2D>,
    viewport: Viewport,
    last_step: Instant,
    last_mouse: (i32, i32),
    mouse_over_ui: bool,
    status: StepOutcome,
}

impl Viewer {
    fn new(session: Session) -> Self {
        Self {
            session,
            texture: None,
            viewport: Viewport {
                x: 0.0,
                y: 0.0,
                scale: 1.0,
            },
            last_step: Instant::now(),
            last_mouse: (-1, -1),
            mouse_over_ui: false,
            status: StepOutcome::Paused,
        }
    }

    fn image_size(&self) -> (u32, u32) {
        self.session.display().dimensions()
    }

    /// 鼠标与键盘 → Session 输入
    fn handle_input(&mut self) {
        let size = self.image_size();
        self.viewport = Viewport::fit((screen_width(), screen_height()), size);

        if !self.mouse_over_ui {
            let (x, y) = self.viewport.to_image(mouse_position(), size);
            if is_mouse_button_pressed(MouseButton::Left) {
                self.send(Input::MouseDown(x, y));
            } else if is_mouse_button_released(MouseButton::Left) {
                self.send(Input::MouseUp(x, y));
            } else if is_mouse_button_down(MouseButton::Left) && (x, y) != self.last_mouse {
                self.send(Input::MouseMove(x, y));
            }
            self.last_mouse = (x, y);
        }

        if is_key_pressed(KeyCode::C) {
            self.send(Input::Key(KeyCommand::Continue));
        }
        if is_key_pressed(KeyCode::E) {
            self.send(Input::Key(KeyCommand::Reset));
        }
        if is_key_pressed(KeyCode::Q) || is_key_pressed(KeyCode::Escape) {
            self.send(Input::Key(KeyCommand::Quit));
        }
    }

    fn send(&mut self, input: Input) {
        self.session.handle(input);
        self.upload();
    }

    /// 按轮询间隔推进一帧
    fn tick(&mut self) -> bool {
        if self.last_step.elapsed() < self.session.key_poll_interval() {
            return true;
        }
        self.last_step = Instant::now();

        self.status = self.session.step();
        self.upload();
        self.status != StepOutcome::Finished
    }

    /// 合成画面上传为纹理 (尺寸不变时原地更新)
    fn upload(&mut self) {
        let display = self.session.display();
        let (w, h) = display.dimensions();
        let bytes = to_rgba(display);

        match &self.texture {
            Some(tex) if tex.width() == w as f32 && tex.height() == h as f32 => {
                tex.update(&Image {
                    bytes,
                    width: w as u16,
                    height: h as u16,
                });
            }
            _ => {
                let texture = Texture2D::from_rgba8(w as u16, h as u16, &bytes);
                texture.set_filter(FilterMode::Linear);
                self.texture = Some(texture);
            }
        }
    }

    fn draw(&self) {
        clear_background(BLACK);
        if let Some(texture) = &self.texture {
            let vp = self.viewport;
            draw_texture_ex(
                texture,
                vp.x,
                vp.y,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(texture.width() * vp.scale, texture.height() * vp.scale)),
                    ..Default::default()
                },
            );
        }
    }

    fn draw_panel(&mut self) {
        let session = &self.session;
        let status = self.status;
        let mut over_ui = false;

        egui_macroquad::ui(|egui_ctx| {
            over_ui = egui_ctx.wants_pointer_input();

            egui::Window::new("状态")
                .default_pos(egui::pos2(10.0, 10.0))
                .default_width(260.0)
                .show(egui_ctx, |ui| {
                    ui.colored_label(
                        egui::Color32::GREEN,
                        format!("模式: {}", session.mode().name()),
                    );
                    let frame = session
                        .frame_index()
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "-".into());
                    ui.label(format!("帧: {} / {}", frame, session.frame_count()));
                    ui.label(format!("已保存: {}", session.processed()));
                    ui.label(format!("目标: {}", session.boxes().len()));
                    if status == StepOutcome::AwaitingCaption {
                        ui.colored_label(egui::Color32::YELLOW, "⏳ 等待描述...");
                    }

                    ui.separator();
                    for line in session.caption_lines() {
                        ui.colored_label(egui::Color32::LIGHT_BLUE, line.as_str());
                    }

                    ui.separator();
                    ui.small("拖拽: 框选目标  C: 继续  E: 重置  Q/Esc: 退出");
                });
        });
        egui_macroquad::draw();

        self.mouse_over_ui = over_ui;
    }
}

fn to_rgba(image: &RgbImage) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(image.as_raw().len() / 3 * 4);
    for chunk in image.as_raw().chunks_exact(3) {
        rgba.extend_from_slice(chunk);
        rgba.push(255);
    }
    rgba
}

/// 窗口主循环, 序列结束或退出时返回
pub async fn run(session: Session) {
    let mut viewer = Viewer::new(session);
    viewer.upload();

    loop {
        viewer.handle_input();
        if !viewer.tick() {
            break;
        }
        viewer.draw();
        viewer.draw_panel();
        next_frame().await;
    }
    log::info!("🪟 窗口关闭, 已保存 {} 帧", viewer.session.processed());
}
