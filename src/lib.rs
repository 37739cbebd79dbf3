pub mod assets;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod segment;

// 重新导出常用类型
pub use assets::{AssetLoader, FsAssetLoader, MemoryAssetLoader};
pub use config::{Normalization, PipelineConfig, ResizePolicy};
pub use error::{Result, SegError};
pub use pipeline::{Admission, ChannelSink, Pipeline, PipelineBuilder, PipelineStats, ResultSink, SinkEvent};
pub use segment::{
    ColorPolicy, Frame, FrameAnalyzer, LabelCatalog, LegendEntry, ModelInfo, ModelSession,
    OrtSessionFactory, PixelFormat, RenderedFrame, ResultPostprocessor, SegmentationModel,
    SegmentationResult, SessionFactory,
};
