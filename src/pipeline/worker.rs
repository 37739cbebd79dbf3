//! 分析工作线程
//!
//! 单线程串行执行会话安装和帧分析。活动会话只归这个线程所有，
//! 因此安装天然排在正在进行的分析之后，分析也总能看到完整安装的会话。

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Sender;
use std::thread;

use tracing::{debug, info, warn};

use crate::error::SegError;
use crate::pipeline::Shared;
use crate::pipeline::gate::{InstallJob, WorkerTask};
use crate::pipeline::sink::SinkEvent;
use crate::segment::{Frame, FrameAnalyzer, ModelSession, ResultPostprocessor};

pub(crate) struct AnalysisWorker {
    shared: Arc<Shared>,
    analyzer: FrameAnalyzer,
    postprocessor: ResultPostprocessor,
    events: Sender<SinkEvent>,
    session: Option<ModelSession>,
    generation: u64,
    /// 已上报过的 (期望, 实际) 尺寸组合，安装新会话时清空
    reported_mismatches: HashSet<(String, String)>,
}

impl AnalysisWorker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        analyzer: FrameAnalyzer,
        postprocessor: ResultPostprocessor,
        events: Sender<SinkEvent>,
    ) -> Self {
        Self {
            shared,
            analyzer,
            postprocessor,
            events,
            session: None,
            generation: 0,
            reported_mismatches: HashSet::new(),
        }
    }

    pub(crate) fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("segstream-analysis".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        while let Some(task) = self.shared.gate.next_task() {
            match task {
                WorkerTask::Install(job) => self.install(job),
                WorkerTask::Analyze(frame) => {
                    self.analyze(frame);
                    self.shared.gate.finish();
                }
            }
        }

        if let Some(session) = self.session.take() {
            info!(model = %session.info().model_id, "分析线程退出，释放模型会话");
        }
        *self.shared.active_write() = None;
    }

    fn install(&mut self, job: InstallJob) {
        let InstallJob {
            mut session,
            reply,
        } = job;
        self.generation += 1;
        session.set_generation(self.generation);
        let info = session.info().clone();

        let previous = self.session.replace(session);
        *self.shared.active_write() = Some(info.clone());
        self.reported_mismatches.clear();
        if let Some(previous) = previous {
            debug!(model = %previous.info().model_id, "释放旧模型会话");
        }

        self.shared.gate.reopen();
        info!(
            model = %info.model_id,
            generation = info.generation,
            size = %format!("{}x{}", info.input_width, info.input_height),
            "模型会话已安装"
        );
        if reply.send(info).is_err() {
            debug!("切换请求方已放弃等待");
        }
    }

    fn analyze(&mut self, frame: Frame) {
        let timestamp = frame.timestamp();
        let analyzer = &self.analyzer;
        let session = self.session.as_mut();
        // 推理后端的 panic 只丢弃当前帧，帧在栈展开时归还
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || analyzer.analyze(frame, session)))
            .unwrap_or_else(|payload| Err(SegError::Inference(panic_message(payload.as_ref()))));
        match outcome {
            Ok(result) => {
                let rendered = self.postprocessor.render(&result);
                self.shared.stats.analyzed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "帧 {:?} 分析完成，推理耗时 {} ms，{} 个类别",
                    timestamp,
                    rendered.inference_ms(),
                    rendered.legend.len()
                );
                self.emit(SinkEvent::Result(rendered));
            }
            Err(error) => {
                self.shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.report(error);
            }
        }
    }

    fn report(&mut self, error: SegError) {
        if let SegError::ShapeMismatch { expected, actual } = &error {
            if !self
                .reported_mismatches
                .insert((expected.clone(), actual.clone()))
            {
                debug!("重复的尺寸错误: {}", error);
                return;
            }
        }
        warn!("丢弃当前帧: {}", error);
        self.emit(SinkEvent::Error(error));
    }

    fn emit(&self, event: SinkEvent) {
        if self.events.send(event).is_err() {
            debug!("分发线程已退出");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知原因".to_string());
    format!("推理线程 panic: {}", detail)
}
