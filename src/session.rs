// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 主循环编排 (与界面无关)
//!
//! 每次 UI 刷新调用一次 `step()`:
//! 1. 取下一帧; 没有目标时暂停等待框选 (按 C 继续)
//! 2. 初始化 / 更新跟踪器, 丢失的目标被移除
//! 3. 提交描述任务, 等待当前目标集合的描述到达
//! 4. 合成画面并写入视频 / 图片

use std::time::Duration;

use image::RgbImage;

use crate::caption::{CaptionHandle, CaptureJob};
use crate::compositor::Compositor;
use crate::config::AppConfig;
use crate::geometry::{BBox, CaptureRegion};
use crate::input::{Frame, FrameSource, InputError};
use crate::interaction::{InteractionState, Mode};
use crate::recorder::Recorder;
use crate::tracking::{TrackOutcome, TrackerSet};

/// 键盘命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Continue, // C
    Reset,    // E
    Quit,     // Q / Esc
}

/// 界面输入 (图像坐标)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    MouseDown(i32, i32),
    MouseMove(i32, i32),
    MouseUp(i32, i32),
    Key(KeyCommand),
}

/// 单步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 暂停在当前帧等待框选
    Paused,
    /// 当前帧已跟踪, 等待描述
    AwaitingCaption,
    /// 该帧已合成并保存
    Advanced(usize),
    /// 序列结束或用户退出
    Finished,
}

/// 已完成跟踪、等待描述的帧
struct PendingFrame {
    boxes: Vec<BBox>,
    region: Option<CaptureRegion>,
    generation: u64,
}

pub struct Session {
    config: AppConfig,
    frames: FrameSource,
    state: InteractionState,
    trackers: TrackerSet,
    captions: CaptionHandle,
    compositor: Compositor,
    recorder: Option<Recorder>,
    current: Option<Frame>,
    pending: Option<PendingFrame>,
    paused: bool,
    finished: bool,
    display: RgbImage,
    processed: usize,
}

impl Session {
    pub fn new(
        config: AppConfig,
        frames: FrameSource,
        trackers: TrackerSet,
        captions: CaptionHandle,
        recorder: Option<Recorder>,
    ) -> Result<Self, InputError> {
        let (width, height) = frames.probe_size()?;
        let compositor = Compositor::new(config.render.clone());
        let state = InteractionState::new(config.selection.drag_threshold);
        Ok(Self {
            config,
            frames,
            state,
            trackers,
            captions,
            compositor,
            recorder,
            current: None,
            pending: None,
            paused: false,
            finished: false,
            display: RgbImage::new(width, height),
            processed: 0,
        })
    }

    /// 预设初始目标 (无窗口模式)
    pub fn add_box(&mut self, bbox: BBox) {
        self.state.add_box(bbox);
    }

    // ========== 状态查询 (界面显示用) ==========

    pub fn display(&self) -> &RgbImage {
        &self.display
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn boxes(&self) -> &[BBox] {
        self.state.boxes()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn frame_index(&self) -> Option<usize> {
        self.current.as_ref().map(|f| f.index)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn caption_lines(&self) -> &[String] {
        self.captions
            .latest()
            .map(|t| t.lines.as_slice())
            .unwrap_or(&[])
    }

    pub fn key_poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.selection.key_poll_ms)
    }

    // ========== 输入 ==========

    pub fn handle(&mut self, input: Input) {
        match input {
            Input::MouseDown(x, y) => self.state.press(x, y),
            Input::MouseMove(x, y) => self.state.drag(x, y),
            Input::MouseUp(x, y) => {
                self.state.release(x, y);
            }
            Input::Key(KeyCommand::Continue) => {
                if self.paused {
                    self.paused = false;
                }
            }
            Input::Key(KeyCommand::Reset) => self.clean(),
            Input::Key(KeyCommand::Quit) => {
                log::info!("👋 用户退出");
                self.finish();
            }
        }
        if self.paused {
            self.redraw_selection();
        }
    }

    /// 清空全部目标与描述任务
    fn clean(&mut self) {
        self.state.reset();
        self.trackers.clear();
        self.captions.clear();
        // 等待中的帧不再需要描述
        if let Some(pending) = self.pending.as_mut() {
            pending.region = None;
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.captions.clear();
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.finish() {
                log::error!("❌ 视频收尾失败: {}", e);
            }
        }
        log::info!("🏁 处理完成: {} 帧", self.processed);
    }

    fn redraw_selection(&mut self) {
        if let Some(frame) = &self.current {
            self.display =
                self.compositor
                    .draw_selection(&frame.image, self.state.boxes(), self.state.drag_rect());
        }
    }

    // ========== 主循环 ==========

    pub fn step(&mut self) -> StepOutcome {
        if self.finished {
            return StepOutcome::Finished;
        }

        if self.current.is_none() {
            if !self.load_next() {
                self.finish();
                return StepOutcome::Finished;
            }
            if self.state.needs_selection() {
                self.clean();
                self.paused = true;
            }
        }

        if self.paused {
            self.redraw_selection();
            return StepOutcome::Paused;
        }

        if self.pending.is_none() {
            self.pending = Some(self.track_current());
        }

        self.captions.poll();
        if self.captions.is_disconnected() && self.awaiting_caption() {
            log::error!("❌ 描述线程已退出, 无法继续等待描述, 结束处理");
            self.finish();
            return StepOutcome::Finished;
        }
        self.compose_and_record()
    }

    /// 当前帧有描述区域且对应描述尚未到达
    fn awaiting_caption(&self) -> bool {
        match &self.pending {
            Some(PendingFrame {
                region: Some(_),
                generation,
                ..
            }) => self.captions.latest_for(*generation).is_none(),
            _ => false,
        }
    }

    /// 阻塞等待当前帧的描述 (无窗口模式)
    ///
    /// 返回 false 表示超时; 描述线程退出时返回 true, 由下一次 `step()` 结束处理
    pub fn wait_for_caption(&mut self, timeout: Duration) -> bool {
        match &self.pending {
            Some(PendingFrame {
                region: Some(_),
                generation,
                ..
            }) => match self.captions.wait_for(*generation, timeout) {
                Ok(text) => text.is_some(),
                Err(_) => true,
            },
            _ => true,
        }
    }

    /// 读取下一帧, 超过帧数上限或序列结束返回 false
    fn load_next(&mut self) -> bool {
        loop {
            match self.frames.next_frame() {
                None => return false,
                Some(Ok(frame)) => {
                    if frame.index > self.config.max_frames {
                        log::info!("⏹ 达到最大帧数 {}", self.config.max_frames);
                        return false;
                    }
                    self.current = Some(frame);
                    return true;
                }
                Some(Err(e)) => log::error!("❌ 跳过无法读取的帧: {}", e),
            }
        }
    }

    /// 初始化或更新跟踪器, 提交描述任务
    fn track_current(&mut self) -> PendingFrame {
        let Some(frame) = self.current.as_ref() else {
            return PendingFrame {
                boxes: Vec::new(),
                region: None,
                generation: self.state.generation(),
            };
        };
        let image = frame.image.clone();

        if self.state.mode() == Mode::Initializing {
            let boxes = self.state.boxes().to_vec();
            let results = self.trackers.initialize(&boxes, &image);
            for (index, result) in results.iter().enumerate().rev() {
                if let Err(e) = result {
                    log::warn!("⚠️ 跟踪器初始化失败: {}", e);
                    self.state.lose(index);
                }
            }
            if self.state.mark_tracking() {
                log::info!("🚀 开始跟踪 {} 个目标", self.trackers.len());
            }
        }

        if self.state.mode() == Mode::Tracking {
            let outcomes = self.trackers.update(&image);
            let mut boxes = self.state.boxes().to_vec();
            let mut lost = Vec::new();
            for (index, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    TrackOutcome::Tracked(bbox) => {
                        if let Some(slot) = boxes.get_mut(index) {
                            *slot = bbox;
                        }
                    }
                    TrackOutcome::Lost(e) => {
                        log::debug!("目标 #{} 丢失: {}", index + 1, e);
                        lost.push(index);
                    }
                }
            }
            self.state.set_boxes(boxes);
            for index in lost.into_iter().rev() {
                self.state.lose(index);
            }
        }

        let boxes = self.state.boxes().to_vec();
        let generation = self.state.generation();
        let region = (self.state.mode() == Mode::Tracking)
            .then(|| boxes.first())
            .flatten()
            .map(|first| {
                self.config
                    .region
                    .capture_region(first, image.width(), image.height())
            });

        match region {
            Some(region) => self.captions.submit(CaptureJob {
                frame: image,
                region,
                generation,
            }),
            None => self.captions.clear(),
        }

        PendingFrame {
            boxes,
            region,
            generation,
        }
    }

    /// 描述就绪后合成并保存当前帧
    fn compose_and_record(&mut self) -> StepOutcome {
        let (Some(frame), Some(pending)) = (self.current.as_ref(), self.pending.as_ref()) else {
            return StepOutcome::Paused;
        };

        let caption = match pending.region {
            Some(_) => match self.captions.latest_for(pending.generation) {
                Some(text) => Some(text),
                None => {
                    self.display = self.compositor.draw_tracking(
                        &frame.image,
                        &pending.boxes,
                        pending.region.as_ref(),
                        None,
                    );
                    return StepOutcome::AwaitingCaption;
                }
            },
            None => None,
        };

        self.display = self.compositor.draw_tracking(
            &frame.image,
            &pending.boxes,
            pending.region.as_ref(),
            caption,
        );

        let index = frame.index;
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record(index, &self.display) {
                log::error!("❌ 帧 {} 保存失败: {}", index, e);
            }
        }

        self.current = None;
        self.pending = None;
        self.processed += 1;
        StepOutcome::Advanced(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::worker::tests::SizeCaptioner;
    use crate::caption::CaptionWorker;
    use crate::compositor::{CYAN, GREEN};
    use crate::recorder::RecordConfig;
    use crate::tracking::tests::scripted_set;
    use crate::tracking::TrackError;
    use image::Rgb;
    use std::path::Path;

    const WAIT: Duration = Duration::from_secs(5);

    fn write_frames(dir: &Path, count: usize) {
        let img_dir = dir.join("img");
        std::fs::create_dir_all(&img_dir).unwrap();
        for i in 0..count {
            RgbImage::from_pixel(64, 48, Rgb([30, 30, 30]))
                .save(img_dir.join(format!("{:04}.png", i)))
                .unwrap();
        }
    }

    fn session(
        root: &Path,
        frames: usize,
        script: Vec<Result<BBox, TrackError>>,
        config: AppConfig,
    ) -> Session {
        let captions = CaptionWorker::spawn(SizeCaptioner, Duration::from_millis(5), 5);
        session_with(root, frames, script, config, captions)
    }

    fn session_with(
        root: &Path,
        frames: usize,
        script: Vec<Result<BBox, TrackError>>,
        mut config: AppConfig,
        captions: CaptionHandle,
    ) -> Session {
        write_frames(root, frames);
        // 不绘制文字, 便于检查像素
        config.render.font_path = Some(root.join("no-font.ttf"));
        let source = FrameSource::open(root).unwrap();
        let record = RecordConfig {
            frame_dir: root.join("trackcap"),
            video_dir: root.join("video"),
            save_video: false,
            ..Default::default()
        };
        let recorder = Recorder::create(&record, "case", 64, 48).unwrap();
        Session::new(config, source, scripted_set(script), captions, Some(recorder)).unwrap()
    }

    /// 推进到下一帧保存完成
    fn advance(session: &mut Session) -> StepOutcome {
        loop {
            match session.step() {
                StepOutcome::AwaitingCaption => {
                    assert!(session.wait_for_caption(WAIT));
                }
                other => return other,
            }
        }
    }

    fn select(session: &mut Session, x0: i32, y0: i32, x1: i32, y1: i32) {
        session.handle(Input::MouseDown(x0, y0));
        session.handle(Input::MouseMove(x1, y1));
        session.handle(Input::MouseUp(x1, y1));
    }

    #[test]
    fn select_track_and_caption() {
        let root = tempfile::tempdir().unwrap();
        let moved = BBox::new(12, 11, 20, 20);
        let mut s = session(root.path(), 3, vec![Ok(moved), Ok(moved)], AppConfig::new());

        assert_eq!(s.step(), StepOutcome::Paused);
        assert_eq!(s.mode(), Mode::Idle);

        select(&mut s, 10, 10, 30, 30);
        assert_eq!(s.mode(), Mode::Initializing);
        // 暂停时显示拖拽结果
        assert_eq!(s.display().get_pixel(10, 20), &GREEN);
        assert_eq!(s.step(), StepOutcome::Paused);

        s.handle(Input::Key(KeyCommand::Continue));
        assert_eq!(advance(&mut s), StepOutcome::Advanced(0));
        assert_eq!(s.mode(), Mode::Tracking);
        assert_eq!(s.boxes(), &[moved]);
        // 区域: side = min(200, 0.75 * 48) = 36
        assert_eq!(s.caption_lines(), &["a patch of 36 by", "36 pixels seen here"]);
        assert_eq!(s.display().get_pixel(12, 20), &GREEN);

        assert_eq!(advance(&mut s), StepOutcome::Advanced(1));
        assert!(root.path().join("trackcap/case_0.jpg").exists());
        assert!(root.path().join("trackcap/case_1.jpg").exists());
    }

    #[test]
    fn lost_target_pauses_next_frame() {
        let root = tempfile::tempdir().unwrap();
        let mut s = session(
            root.path(),
            3,
            vec![Ok(BBox::new(10, 10, 20, 20)), Err(TrackError::Lost(0.05))],
            AppConfig::new(),
        );
        assert_eq!(s.step(), StepOutcome::Paused);
        select(&mut s, 10, 10, 30, 30);
        s.handle(Input::Key(KeyCommand::Continue));
        assert_eq!(advance(&mut s), StepOutcome::Advanced(0));

        // 第二帧跟踪丢失: 帧照常保存, 没有描述
        assert_eq!(advance(&mut s), StepOutcome::Advanced(1));
        assert_eq!(s.mode(), Mode::Idle);
        assert!(s.boxes().is_empty());

        assert_eq!(s.step(), StepOutcome::Paused);
        assert_eq!(s.frame_index(), Some(2));
    }

    #[test]
    fn reset_during_tracking_returns_to_selection() {
        let root = tempfile::tempdir().unwrap();
        let bbox = BBox::new(10, 10, 20, 20);
        let mut s = session(root.path(), 3, vec![Ok(bbox), Ok(bbox)], AppConfig::new());
        s.add_box(bbox);
        assert_eq!(advance(&mut s), StepOutcome::Advanced(0));
        assert_eq!(s.mode(), Mode::Tracking);

        s.handle(Input::Key(KeyCommand::Reset));
        assert_eq!(s.mode(), Mode::Idle);
        assert_eq!(s.step(), StepOutcome::Paused);
        assert!(s.boxes().is_empty());
    }

    #[test]
    fn frame_limit_and_quit() {
        let root = tempfile::tempdir().unwrap();
        let config = AppConfig {
            max_frames: 1,
            ..AppConfig::new()
        };
        let mut s = session(root.path(), 5, Vec::new(), config);
        for expected in 0..=1 {
            assert_eq!(s.step(), StepOutcome::Paused);
            s.handle(Input::Key(KeyCommand::Continue));
            assert_eq!(advance(&mut s), StepOutcome::Advanced(expected));
        }
        assert_eq!(s.step(), StepOutcome::Finished);
        assert_eq!(s.processed(), 2);

        let root = tempfile::tempdir().unwrap();
        let mut s = session(root.path(), 5, Vec::new(), AppConfig::new());
        assert_eq!(s.step(), StepOutcome::Paused);
        s.handle(Input::Key(KeyCommand::Quit));
        assert_eq!(s.step(), StepOutcome::Finished);
        assert!(s.is_finished());
    }

    #[test]
    fn small_drag_keeps_waiting() {
        let root = tempfile::tempdir().unwrap();
        let mut s = session(root.path(), 2, Vec::new(), AppConfig::new());
        assert_eq!(s.step(), StepOutcome::Paused);
        select(&mut s, 10, 10, 15, 40);
        assert_eq!(s.mode(), Mode::Idle);
        assert!(s.boxes().is_empty());
        assert_eq!(s.step(), StepOutcome::Paused);
    }

    #[test]
    fn caption_follows_first_box_and_new_box_reinitialises() {
        let root = tempfile::tempdir().unwrap();
        let first = BBox::new(2, 2, 13, 13);
        let moved = BBox::new(3, 3, 13, 13);
        let second = BBox::new(40, 30, 13, 13);
        // 节拍足够长: 新任务不会在提交的同一步内完成
        let captions = CaptionWorker::spawn(SizeCaptioner, Duration::from_millis(300), 5);
        let mut s = session_with(
            root.path(),
            3,
            vec![Ok(first), Ok(moved), Ok(second)],
            AppConfig::new(),
            captions,
        );

        assert_eq!(s.step(), StepOutcome::Paused);
        select(&mut s, 2, 2, 15, 15);
        s.handle(Input::Key(KeyCommand::Continue));
        assert_eq!(advance(&mut s), StepOutcome::Advanced(0));
        assert_eq!(s.trackers.len(), 1);
        // 区域 (0, 26, 0, 26) 裁剪为 26x26
        assert_eq!(s.caption_lines(), &["a patch of 26 by", "26 pixels seen here"]);
        assert_eq!(s.display().get_pixel(26, 20), &CYAN);

        // 跟踪中再框选一个目标: 回到初始化, 描述版本更新
        let generation = s.state.generation();
        select(&mut s, 40, 30, 53, 43);
        assert_eq!(s.mode(), Mode::Initializing);
        assert!(s.state.generation() > generation);

        assert_eq!(s.step(), StepOutcome::AwaitingCaption);
        assert_eq!(s.mode(), Mode::Tracking);
        assert_eq!(s.trackers.len(), 2);
        assert_eq!(s.boxes(), &[moved, second]);
        let expected = s.config.region.capture_region(&moved, 64, 48);
        assert_eq!(s.pending.as_ref().unwrap().region, Some(expected));
        // 旧版本的描述不能放行当前帧
        assert_eq!(s.step(), StepOutcome::AwaitingCaption);

        assert_eq!(advance(&mut s), StepOutcome::Advanced(1));
        assert_eq!(s.caption_lines(), &["a patch of 27 by", "27 pixels seen here"]);
        // 第二个目标的区域不绘制
        assert_eq!(s.display().get_pixel(29, 35), &Rgb([30, 30, 30]));
    }

    #[test]
    fn stopped_caption_worker_ends_the_run() {
        let root = tempfile::tempdir().unwrap();
        let bbox = BBox::new(10, 10, 20, 20);
        let mut s = session_with(
            root.path(),
            3,
            vec![Ok(bbox)],
            AppConfig::new(),
            CaptionHandle::stopped(),
        );
        s.add_box(bbox);

        assert_eq!(s.step(), StepOutcome::Finished);
        assert!(s.is_finished());
        assert_eq!(s.processed(), 0);
        assert!(s.wait_for_caption(WAIT));
    }
}
