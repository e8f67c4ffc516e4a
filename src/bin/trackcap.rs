// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 交互式多目标跟踪 + 图像描述
///
/// 线程划分:
/// 1. 描述线程: 按固定间隔对最新描述区域运行 ONNX 模型
/// 2. 主线程:   读帧 / 跟踪 / 合成 / 保存, macroquad 窗口显示
///
/// 用法:
///   trackcap data/Basketball --model models/caption.onnx
///   trackcap data/Basketball --headless --box 198,214,34,81
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use trackcap::caption::{CaptionWorker, OnnxCaptioner};
use trackcap::config::{AppConfig, Args};
use trackcap::input::FrameSource;
use trackcap::recorder::Recorder;
use trackcap::viewer;
use trackcap::{case_name, Session, StepOutcome, TrackerSet};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 无窗口模式下单帧描述的最长等待
const HEADLESS_CAPTION_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.headless && args.boxes.is_empty() {
        bail!("--headless 需要至少一个 --box x,y,w,h");
    }

    let mut config = AppConfig::load(&args.config);
    args.apply(&mut config);

    // ========== 描述模型 ==========
    let model_path = args.resolve_model_path();
    log::info!("📦 描述模型: {}", model_path.display());
    let captioner = OnnxCaptioner::load(&model_path, config.caption.clone())
        .with_context(|| format!("加载描述模型失败: {}", model_path.display()))?;

    // ========== 输入与输出 ==========
    let frames = FrameSource::open(&args.input)
        .with_context(|| format!("打开输入目录失败: {}", args.input.display()))?;
    let (width, height) = frames.probe_size()?;
    let case = case_name(&args.input);
    let recorder = Recorder::create(&config.record, &case, width, height)
        .context("创建输出目录失败")?;

    // ========== 启动描述线程 ==========
    let captions = CaptionWorker::spawn(
        captioner,
        Duration::from_millis(config.caption.interval_ms),
        config.caption.words_per_line,
    );
    let trackers = TrackerSet::new(config.tracker.clone());

    let mut session = Session::new(config, frames, trackers, captions, Some(recorder))?;
    for bbox in &args.boxes {
        session.add_box(*bbox);
    }

    println!("🚀 trackcap 启动: {} ({}x{}, {} 帧)", case, width, height, session.frame_count());

    if args.headless {
        run_headless(&mut session);
    } else {
        println!("🖱  拖拽框选目标, C 开始跟踪, E 重置, Q/Esc 退出");
        macroquad::Window::from_config(viewer::window_conf(width, height), viewer::run(session));
    }
    Ok(())
}

/// 无窗口: 预设目标直接开始, 暂停时自动继续
fn run_headless(session: &mut Session) {
    loop {
        match session.step() {
            StepOutcome::Finished => break,
            StepOutcome::Paused => {
                session.handle(trackcap::Input::Key(trackcap::KeyCommand::Continue));
            }
            StepOutcome::AwaitingCaption => {
                if !session.wait_for_caption(HEADLESS_CAPTION_TIMEOUT) {
                    log::warn!("⚠️ 等待描述超时, 继续等待");
                }
            }
            StepOutcome::Advanced(index) => {
                if let Some(line) = session.caption_lines().first() {
                    log::debug!("帧 {}: {}", index, line);
                }
            }
        }
    }
    println!("✅ 完成, 共保存 {} 帧", session.processed());
}
