//! 实时分割流水线
//!
//! [`Pipeline`] 持有准入门、分析工作线程和结果分发线程：
//!
//! - 采集线程调用 [`Pipeline::submit`] 提交帧，永远不会被推理阻塞
//! - 分析线程 `segstream-analysis` 串行执行会话安装与帧分析
//! - 分发线程 `segstream-sink` 依次把结果交给 [`ResultSink`]
//!
//! 模型会话通过 [`Pipeline::swap_session`] 异步切换：读取字节和编译都在
//! tokio 的阻塞线程池中完成，切换期间准入门关闭，安装在当前分析结束后执行。

pub mod gate;
pub mod sink;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::thread::JoinHandle;

use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, info, warn};

use crate::assets::AssetLoader;
use crate::config::PipelineConfig;
use crate::error::{Result, SegError};
use crate::segment::{
    Frame, FrameAnalyzer, LabelCatalog, ModelInfo, ModelSession, OrtSessionFactory,
    ResultPostprocessor, SessionFactory,
};

pub use gate::{Admission, FrameAdmissionGate};
pub use sink::{ChannelSink, ResultSink, SinkEvent};

use gate::InstallJob;
use worker::AnalysisWorker;

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    submitted: AtomicU64,
    admitted: AtomicU64,
    superseded: AtomicU64,
    dropped: AtomicU64,
    pub(crate) analyzed: AtomicU64,
    pub(crate) failed: AtomicU64,
}

/// 流水线计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// 提交的帧数
    pub submitted: u64,
    /// 进入待分析槽位的帧数（含替换旧帧的情况）
    pub admitted: u64,
    /// 尚未分析就被新帧替换的帧数
    pub superseded: u64,
    /// 准入关闭时被丢弃的帧数
    pub dropped: u64,
    /// 成功分析的帧数
    pub analyzed: u64,
    /// 分析失败的帧数
    pub failed: u64,
}

pub(crate) struct Shared {
    pub(crate) gate: FrameAdmissionGate,
    pub(crate) stats: StatsCounters,
    active: RwLock<Option<ModelInfo>>,
}

impl Shared {
    pub(crate) fn active_write(&self) -> RwLockWriteGuard<'_, Option<ModelInfo>> {
        self.active.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 切换期间暂停准入，提前退出（出错或被取消）时自动恢复
struct AdmissionPause<'a> {
    gate: &'a FrameAdmissionGate,
    armed: bool,
}

impl<'a> AdmissionPause<'a> {
    fn new(gate: &'a FrameAdmissionGate) -> Self {
        gate.close();
        Self { gate, armed: true }
    }

    /// 安装任务已入队，由分析线程负责重新开放
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AdmissionPause<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.reopen();
        }
    }
}

pub struct Pipeline {
    shared: Arc<Shared>,
    config: PipelineConfig,
    catalog: Arc<LabelCatalog>,
    loader: Arc<dyn AssetLoader>,
    factory: Arc<dyn SessionFactory>,
    swap_turn: AsyncMutex<()>,
    worker: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// 提交一帧，返回准入结果
    pub fn submit(&self, frame: Frame) -> Admission {
        let stats = &self.shared.stats;
        stats.submitted.fetch_add(1, Ordering::Relaxed);
        let admission = self.shared.gate.submit(frame);
        match admission {
            Admission::Admitted => {
                stats.admitted.fetch_add(1, Ordering::Relaxed);
            }
            Admission::Superseded => {
                stats.admitted.fetch_add(1, Ordering::Relaxed);
                stats.superseded.fetch_add(1, Ordering::Relaxed);
            }
            Admission::Dropped => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("准入关闭，丢弃帧");
            }
        }
        admission
    }

    /// 切换到指定模型
    ///
    /// 多个切换请求按到达顺序依次执行，同一时刻最多一个切换在进行。
    ///
    /// # 参数
    /// * `model_id` - 模型资源标识
    ///
    /// # 返回值
    /// 新安装会话的描述信息
    ///
    /// # 错误处理
    /// 读取或编译失败时返回 `AssetLoad` / `SessionCompile`，原会话保持不变；
    /// 流水线已关闭时返回 `PipelineClosed`
    pub async fn swap_session(&self, model_id: &str) -> Result<ModelInfo> {
        let _turn = self.swap_turn.lock().await;
        let pause = AdmissionPause::new(&self.shared.gate);
        info!(model = %model_id, "开始切换模型会话");

        let session = match self.prepare_session(model_id).await {
            Ok(session) => session,
            Err(error) => {
                warn!(model = %model_id, "模型会话切换失败，保留原会话: {}", error);
                return Err(error);
            }
        };

        let (reply, installed) = oneshot::channel();
        self.shared
            .gate
            .push_install(InstallJob { session, reply })?;
        pause.disarm();

        installed.await.map_err(|_| SegError::PipelineClosed)
    }

    /// 切换到配置中的默认模型
    pub async fn load_default_session(&self) -> Result<ModelInfo> {
        let model_id = self.config.model_id.clone();
        self.swap_session(&model_id).await
    }

    async fn prepare_session(&self, model_id: &str) -> Result<ModelSession> {
        let loader = Arc::clone(&self.loader);
        let id = model_id.to_string();
        let bytes = tokio::task::spawn_blocking(move || loader.model_bytes(&id))
            .await
            .map_err(|e| SegError::asset(model_id, e))??;
        debug!(model = %model_id, bytes = bytes.len(), "模型字节读取完成");

        let factory = Arc::clone(&self.factory);
        let model = tokio::task::spawn_blocking(move || factory.build(&bytes))
            .await
            .map_err(|e| SegError::SessionCompile(e.to_string()))??;

        let session = ModelSession::new(model_id, model);
        let (width, height) = session.input_size();
        if width == 0 || height == 0 {
            return Err(SegError::SessionCompile(format!(
                "模型输入尺寸无效: {}x{}",
                width, height
            )));
        }
        Ok(session)
    }

    /// 当前活动会话
    pub fn active_model(&self) -> Option<ModelInfo> {
        self.shared
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_admitting(&self) -> bool {
        self.shared.gate.is_open()
    }

    pub fn stats(&self) -> PipelineStats {
        let stats = &self.shared.stats;
        PipelineStats {
            submitted: stats.submitted.load(Ordering::Relaxed),
            admitted: stats.admitted.load(Ordering::Relaxed),
            superseded: stats.superseded.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            analyzed: stats.analyzed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
        }
    }

    pub fn catalog(&self) -> &Arc<LabelCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 关闭流水线
    ///
    /// 等待正在进行的任务完成后退出分析线程并释放会话，之后才归还尚未分析的帧
    /// 和排队中的切换请求，最后等待分发线程处理完剩余结果。
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.gate.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("分析线程异常退出");
            }
        }
        self.shared.gate.drain();
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("分发线程异常退出");
            }
        }
        info!("流水线已关闭");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.worker.is_some() || self.dispatcher.is_some() {
            self.stop();
        }
    }
}

/// [`Pipeline`] 构建器
pub struct PipelineBuilder {
    config: PipelineConfig,
    catalog: Option<Arc<LabelCatalog>>,
    loader: Option<Arc<dyn AssetLoader>>,
    factory: Option<Arc<dyn SessionFactory>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            catalog: None,
            loader: None,
            factory: None,
            sink: None,
        }
    }

    pub fn with_loader(mut self, loader: impl AssetLoader) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// 默认使用 [`OrtSessionFactory`]
    pub fn with_factory(mut self, factory: impl SessionFactory) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// 默认通过资源加载器读取 `labels_id`
    pub fn with_catalog(mut self, catalog: impl Into<Arc<LabelCatalog>>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn with_sink(mut self, sink: impl ResultSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        config.validate()?;

        let loader = self
            .loader
            .ok_or_else(|| SegError::Config("缺少资源加载器".to_string()))?;
        let sink = self
            .sink
            .ok_or_else(|| SegError::Config("缺少结果接收端".to_string()))?;
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(OrtSessionFactory::from_config(&config)));
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => Arc::new(LabelCatalog::load(
                loader.as_ref(),
                &config.labels_id,
                config.color_seed.into(),
            )?),
        };

        let shared = Arc::new(Shared {
            gate: FrameAdmissionGate::new(),
            stats: StatsCounters::default(),
            active: RwLock::new(None),
        });

        let (events, dispatcher) =
            sink::spawn_dispatcher(sink).map_err(|e| SegError::Spawn(e.to_string()))?;
        let worker = AnalysisWorker::new(
            Arc::clone(&shared),
            FrameAnalyzer::from_config(&config),
            ResultPostprocessor::new(Arc::clone(&catalog)).with_overlay_alpha(config.overlay_alpha),
            events,
        )
        .spawn()
        .map_err(|e| SegError::Spawn(e.to_string()))?;

        info!(labels = catalog.len(), "流水线已启动");
        Ok(Pipeline {
            shared,
            config,
            catalog,
            loader,
            factory,
            swap_turn: AsyncMutex::new(()),
            worker: Some(worker),
            dispatcher: Some(dispatcher),
        })
    }
}
