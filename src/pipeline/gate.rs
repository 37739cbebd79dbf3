//! 帧准入门
//!
//! 保证同一时刻最多只有一帧在分析，并且分析线程空闲时拿到的总是最新的帧。
//! 门内只保存一帧待分析的帧；新帧到达时直接替换旧帧，旧帧立即归还给采集端。
//! 会话切换期间门关闭，此时到达的帧直接丢弃。
//!
//! 门同时充当分析工作线程的任务队列：会话安装任务优先于帧分析任务。

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{Result, SegError};
use crate::segment::{Frame, ModelInfo, ModelSession};

/// `submit` 的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 帧已进入待分析槽位
    Admitted,
    /// 帧已进入待分析槽位，并替换掉了一帧尚未开始分析的旧帧
    Superseded,
    /// 门已关闭，帧被直接释放
    Dropped,
}

/// 等待分析线程执行的会话安装
pub(crate) struct InstallJob {
    pub session: ModelSession,
    pub reply: oneshot::Sender<ModelInfo>,
}

pub(crate) enum WorkerTask {
    Install(InstallJob),
    Analyze(Frame),
}

struct GateState {
    pending: Option<Frame>,
    installs: VecDeque<InstallJob>,
    busy: bool,
    open: bool,
    shutdown: bool,
}

pub struct FrameAdmissionGate {
    state: Mutex<GateState>,
    ready: Condvar,
}

impl Default for FrameAdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAdmissionGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                pending: None,
                installs: VecDeque::new(),
                busy: false,
                open: true,
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 提交一帧
    ///
    /// 被替换或被拒绝的帧在释放锁之后才归还，释放回调不会在锁内执行。
    pub fn submit(&self, frame: Frame) -> Admission {
        let (admission, displaced) = {
            let mut state = self.lock();
            if !state.open || state.shutdown {
                (Admission::Dropped, Some(frame))
            } else {
                match state.pending.replace(frame) {
                    Some(old) => (Admission::Superseded, Some(old)),
                    None => (Admission::Admitted, None),
                }
            }
        };
        if admission != Admission::Dropped {
            self.ready.notify_one();
        }
        drop(displaced);
        admission
    }

    /// 关闭准入，并释放尚未开始分析的帧
    pub fn close(&self) {
        let displaced = {
            let mut state = self.lock();
            state.open = false;
            state.pending.take()
        };
        drop(displaced);
    }

    /// 重新开放准入
    pub fn reopen(&self) {
        let mut state = self.lock();
        if !state.shutdown {
            state.open = true;
        }
    }

    pub fn is_open(&self) -> bool {
        let state = self.lock();
        state.open && !state.shutdown
    }

    /// 是否有帧正在分析
    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub(crate) fn push_install(&self, job: InstallJob) -> Result<()> {
        {
            let mut state = self.lock();
            if state.shutdown {
                return Err(SegError::PipelineClosed);
            }
            state.installs.push_back(job);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// 分析线程取下一个任务，没有任务时阻塞；关闭后返回 `None`
    pub(crate) fn next_task(&self) -> Option<WorkerTask> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(job) = state.installs.pop_front() {
                return Some(WorkerTask::Install(job));
            }
            if let Some(frame) = state.pending.take() {
                state.busy = true;
                return Some(WorkerTask::Analyze(frame));
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 当前帧分析结束
    pub(crate) fn finish(&self) {
        self.lock().busy = false;
    }

    /// 关闭门并唤醒分析线程
    ///
    /// 排队中的帧和安装任务留在门内，等分析线程退出后由 [`Self::drain`] 释放。
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutdown = true;
            state.open = false;
        }
        self.ready.notify_all();
    }

    /// 释放门内剩余的帧和安装任务，等待中的切换请求收到 `PipelineClosed`
    pub(crate) fn drain(&self) {
        let (pending, installs) = {
            let mut state = self.lock();
            (state.pending.take(), std::mem::take(&mut state.installs))
        };
        drop(pending);
        drop(installs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::PixelFormat;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn frame(tag: usize, released: &Arc<Mutex<Vec<usize>>>) -> Frame {
        let released = Arc::clone(released);
        Frame::new(1, 1, PixelFormat::Luma8, Duration::from_millis(tag as u64), vec![0])
            .with_release(move || released.lock().unwrap().push(tag))
    }

    #[test]
    fn newer_frame_replaces_pending_one() {
        let gate = FrameAdmissionGate::new();
        let released = Arc::new(Mutex::new(Vec::new()));

        assert_eq!(gate.submit(frame(1, &released)), Admission::Admitted);
        assert_eq!(gate.submit(frame(2, &released)), Admission::Superseded);
        assert_eq!(*released.lock().unwrap(), vec![1]);

        match gate.next_task() {
            Some(WorkerTask::Analyze(f)) => assert_eq!(f.timestamp(), Duration::from_millis(2)),
            _ => panic!("expected frame 2"),
        }
        assert!(gate.is_busy());
        gate.finish();
        assert!(!gate.is_busy());
    }

    #[test]
    fn closed_gate_drops_frames() {
        let gate = FrameAdmissionGate::new();
        let released = Arc::new(Mutex::new(Vec::new()));

        gate.submit(frame(1, &released));
        gate.close();
        assert_eq!(*released.lock().unwrap(), vec![1]);
        assert_eq!(gate.submit(frame(2, &released)), Admission::Dropped);
        assert_eq!(*released.lock().unwrap(), vec![1, 2]);
        assert!(!gate.has_pending());

        gate.reopen();
        assert_eq!(gate.submit(frame(3, &released)), Admission::Admitted);
    }

    #[test]
    fn pending_frame_outlives_shutdown_until_drained() {
        let gate = FrameAdmissionGate::new();
        let released = Arc::new(Mutex::new(Vec::new()));

        gate.submit(frame(1, &released));
        gate.shutdown();
        assert!(gate.next_task().is_none());
        assert!(released.lock().unwrap().is_empty());

        gate.drain();
        assert_eq!(*released.lock().unwrap(), vec![1]);
        assert!(!gate.has_pending());
    }

    #[test]
    fn shutdown_wakes_worker_and_drops_late_frames() {
        let gate = Arc::new(FrameAdmissionGate::new());
        let released = Arc::new(Mutex::new(Vec::new()));

        let worker_gate = Arc::clone(&gate);
        let worker = std::thread::spawn(move || worker_gate.next_task().is_none());
        std::thread::sleep(Duration::from_millis(20));
        gate.shutdown();
        assert!(worker.join().unwrap());

        assert_eq!(gate.submit(frame(9, &released)), Admission::Dropped);
        assert_eq!(*released.lock().unwrap(), vec![9]);
        gate.reopen();
        assert!(!gate.is_open());
    }

    #[test]
    fn every_frame_is_released_exactly_once() {
        let gate = FrameAdmissionGate::new();
        let count = Arc::new(AtomicUsize::new(0));
        for i in 0..100 {
            let count = Arc::clone(&count);
            let f = Frame::new(1, 1, PixelFormat::Luma8, Duration::ZERO, vec![0])
                .with_release(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            if i == 50 {
                gate.close();
            }
            if i == 70 {
                gate.reopen();
            }
            gate.submit(f);
        }
        if let Some(WorkerTask::Analyze(f)) = gate.next_task() {
            drop(f);
        }
        gate.shutdown();
        gate.drain();
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }
}
