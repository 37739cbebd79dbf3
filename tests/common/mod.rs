#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ndarray::{Array4, ArrayD, IxDyn};
use segstream::{
    ChannelSink, ColorPolicy, Frame, LabelCatalog, MemoryAssetLoader, Pipeline, PipelineConfig,
    PixelFormat, Result, SegError, SegmentationModel, SessionFactory, SinkEvent,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// 记录每次推理看到的 (模型名, 帧标记)
pub type SeenLog = Arc<Mutex<Vec<(String, u8)>>>;

/// 1x1 输入的标记模型：帧标记写在唯一像素的亮度里
pub struct TagModel {
    name: String,
    seen: SeenLog,
    started: Option<Sender<u8>>,
    proceed: Option<Receiver<()>>,
    fail_on: Option<u8>,
    panic_on: Option<u8>,
    delay: Duration,
}

impl TagModel {
    pub fn new(name: &str, seen: &SeenLog) -> Self {
        Self {
            name: name.to_string(),
            seen: Arc::clone(seen),
            started: None,
            proceed: None,
            fail_on: None,
            panic_on: None,
            delay: Duration::ZERO,
        }
    }

    /// 每次推理开始时通知，并阻塞到收到放行信号
    pub fn gated(mut self) -> (Self, Receiver<u8>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (proceed_tx, proceed_rx) = mpsc::channel();
        self.started = Some(started_tx);
        self.proceed = Some(proceed_rx);
        (self, started_rx, proceed_tx)
    }

    pub fn failing_on(mut self, tag: u8) -> Self {
        self.fail_on = Some(tag);
        self
    }

    /// 推理后端内部崩溃
    pub fn panicking_on(mut self, tag: u8) -> Self {
        self.panic_on = Some(tag);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl SegmentationModel for TagModel {
    fn input_size(&self) -> (usize, usize) {
        (1, 1)
    }

    fn run(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let tag = (input[[0, 0, 0, 0]] * 255.0).round() as u8;
        self.seen.lock().unwrap().push((self.name.clone(), tag));
        if let Some(started) = &self.started {
            let _ = started.send(tag);
        }
        if let Some(proceed) = &self.proceed {
            let _ = proceed.recv_timeout(WAIT);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic_on == Some(tag) {
            panic!("no output named `logits`");
        }
        if self.fail_on == Some(tag) {
            return Err(SegError::Inference(format!("frame {} exploded", tag)));
        }

        let mut out = ArrayD::zeros(IxDyn(&[1, 3, 1, 1]));
        out[[0, (tag % 3) as usize, 0, 0]] = 1.0;
        Ok(out)
    }
}

/// 按调用顺序依次交出预先准备好的构建结果
pub struct ScriptedFactory {
    script: Mutex<VecDeque<Result<Box<dyn SegmentationModel>>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn then_model(self, model: impl SegmentationModel) -> Self {
        self.script.lock().unwrap().push_back(Ok(Box::new(model)));
        self
    }

    pub fn then_error(self, error: SegError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }
}

impl SessionFactory for ScriptedFactory {
    fn build(&self, _model_bytes: &[u8]) -> Result<Box<dyn SegmentationModel>> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SegError::SessionCompile("script exhausted".into())))
    }
}

pub fn loader() -> MemoryAssetLoader {
    MemoryAssetLoader::new()
        .with_model("first", vec![1])
        .with_model("second", vec![2])
        .with_model("third", vec![3])
        .with_model("broken", vec![0xde, 0xad])
}

pub fn catalog() -> LabelCatalog {
    LabelCatalog::from_lines(["background", "road", "sky"], ColorPolicy::Seeded(11)).unwrap()
}

pub fn pipeline(factory: ScriptedFactory) -> (Pipeline, Receiver<SinkEvent>) {
    pipeline_with(PipelineConfig::default().with_input_size(1, 1), factory)
}

pub fn pipeline_with(
    config: PipelineConfig,
    factory: ScriptedFactory,
) -> (Pipeline, Receiver<SinkEvent>) {
    let (sink, events) = ChannelSink::new();
    let pipeline = Pipeline::builder(config)
        .with_loader(loader())
        .with_factory(factory)
        .with_catalog(catalog())
        .with_sink(sink)
        .build()
        .unwrap();
    (pipeline, events)
}

/// 释放顺序记录
#[derive(Clone, Default)]
pub struct ReleaseLog {
    order: Arc<Mutex<Vec<u8>>>,
    count: Arc<AtomicUsize>,
}

impl ReleaseLog {
    pub fn frame(&self, tag: u8) -> Frame {
        let order = Arc::clone(&self.order);
        let count = Arc::clone(&self.count);
        Frame::new(
            1,
            1,
            PixelFormat::Luma8,
            Duration::from_millis(tag as u64),
            vec![tag],
        )
        .with_release(move || {
            order.lock().unwrap().push(tag);
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn order(&self) -> Vec<u8> {
        self.order.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.order.lock().unwrap().contains(&tag)
    }
}

pub fn tags(seen: &SeenLog) -> Vec<u8> {
    seen.lock().unwrap().iter().map(|(_, tag)| *tag).collect()
}

pub fn expect_result(events: &Receiver<SinkEvent>) -> segstream::RenderedFrame {
    match events.recv_timeout(WAIT) {
        Ok(SinkEvent::Result(frame)) => frame,
        other => panic!("expected a result, got {:?}", other),
    }
}

pub fn expect_error(events: &Receiver<SinkEvent>) -> SegError {
    match events.recv_timeout(WAIT) {
        Ok(SinkEvent::Error(error)) => error,
        other => panic!("expected an error, got {:?}", other),
    }
}

/// 轮询直到条件成立
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}
