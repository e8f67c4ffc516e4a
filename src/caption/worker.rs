// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 后台描述线程
//!
//! 主线程写入最新任务槽 (只保留最新一帧), 描述线程按固定节拍读取,
//! 结果以不可变快照通过 channel 返回. 推理失败或 panic 时返回空描述, 线程不退出.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use image::RgbImage;

use super::{preprocess, CaptionError, CaptionText, Captioner};
use crate::geometry::CaptureRegion;

/// 描述任务: 原始帧 + 描述区域
#[derive(Clone)]
pub struct CaptureJob {
    pub frame: Arc<RgbImage>,
    pub region: CaptureRegion,
    pub generation: u64,
}

type JobSlot = Arc<Mutex<Option<CaptureJob>>>;

pub struct CaptionWorker;

impl CaptionWorker {
    /// 启动描述线程, 返回主线程侧句柄
    pub fn spawn<C>(captioner: C, interval: Duration, words_per_line: usize) -> CaptionHandle
    where
        C: Captioner + 'static,
    {
        let slot: JobSlot = Arc::new(Mutex::new(None));
        let (text_tx, text_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let worker_slot = slot.clone();
        let thread = std::thread::spawn(move || {
            log::info!("📝 描述线程启动 (间隔 {:?})", interval);
            run(captioner, worker_slot, text_tx, stop_rx, interval, words_per_line);
            log::info!("📝 描述线程退出");
        });

        CaptionHandle {
            slot,
            texts: text_rx,
            stop: Some(stop_tx),
            thread: Some(thread),
            latest: None,
            disconnected: false,
        }
    }
}

fn run<C: Captioner>(
    mut captioner: C,
    slot: JobSlot,
    texts: Sender<CaptionText>,
    stop: Receiver<()>,
    interval: Duration,
    words_per_line: usize,
) {
    loop {
        // 只在取任务时持锁, 推理期间主线程可以继续写入
        let job = match slot.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => break,
        };

        if let Some(job) = job {
            let text = describe(&mut captioner, &job, words_per_line);
            if texts.send(text).is_err() {
                break;
            }
        }

        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }
}

/// 裁剪 + 推理 + 折行; 任何失败 (包括 panic) 都返回空描述
fn describe<C: Captioner>(captioner: &mut C, job: &CaptureJob, words_per_line: usize) -> CaptionText {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        preprocess::crop(&job.frame, &job.region).and_then(|patch| captioner.caption(&patch))
    }))
    .unwrap_or_else(|payload| Err(CaptionError::Panicked(panic_message(payload.as_ref()))));
    match result {
        Ok(text) => {
            log::debug!("📝 [gen {}] {}", job.generation, text);
            CaptionText::new(job.generation, &text, words_per_line)
        }
        Err(e) => {
            log::warn!("⚠️ 描述失败 (gen {}): {}", job.generation, e);
            CaptionText::empty(job.generation)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// 主线程持有的描述句柄
pub struct CaptionHandle {
    slot: JobSlot,
    texts: Receiver<CaptionText>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    latest: Option<CaptionText>,
    disconnected: bool, // 描述线程已退出, 不会再有新结果
}

impl CaptionHandle {
    /// 替换最新任务
    pub fn submit(&self, job: CaptureJob) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = Some(job);
        }
    }

    /// 清空任务 (没有跟踪目标时)
    pub fn clear(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
    }

    /// 非阻塞读取, 只保留最新结果
    pub fn poll(&mut self) -> Option<&CaptionText> {
        loop {
            match self.texts.try_recv() {
                Ok(text) => self.latest = Some(text),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.mark_disconnected();
                    break;
                }
            }
        }
        self.latest.as_ref()
    }

    /// 描述线程是否已退出
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn mark_disconnected(&mut self) {
        if !self.disconnected {
            log::error!("❌ 描述线程已退出");
            self.disconnected = true;
        }
    }

    pub fn latest(&self) -> Option<&CaptionText> {
        self.latest.as_ref()
    }

    /// 当前目标集合对应的最新描述
    pub fn latest_for(&self, generation: u64) -> Option<&CaptionText> {
        self.latest.as_ref().filter(|t| t.generation == generation)
    }

    /// 阻塞等待指定版本的描述
    ///
    /// 超时返回 `Ok(None)`, 描述线程已退出返回 `CaptionError::WorkerStopped`
    pub fn wait_for(
        &mut self,
        generation: u64,
        timeout: Duration,
    ) -> Result<Option<&CaptionText>, CaptionError> {
        self.poll();
        let deadline = Instant::now() + timeout;
        while self.latest_for(generation).is_none() {
            if self.disconnected {
                return Err(CaptionError::WorkerStopped);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.texts.recv_timeout(remaining) {
                Ok(text) => self.latest = Some(text),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => self.mark_disconnected(),
            }
        }
        Ok(self.latest_for(generation))
    }

    /// 没有后台线程的句柄 (线程已退出的状态)
    #[cfg(test)]
    pub(crate) fn stopped() -> Self {
        let (_, texts) = crossbeam_channel::unbounded();
        Self {
            slot: Arc::new(Mutex::new(None)),
            texts,
            stop: None,
            thread: None,
            latest: None,
            disconnected: false,
        }
    }
}

impl Drop for CaptionHandle {
    fn drop(&mut self) {
        self.clear();
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("❌ 描述线程异常退出");
            }
        }
    }
}
