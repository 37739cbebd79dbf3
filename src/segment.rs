//! Segment模块 - 语义分割的单帧处理
//!
//! 该模块提供一帧图像从输入到可显示结果的全部步骤：
//! - 标签与颜色目录
//! - 帧缓冲区与释放回调
//! - 图像预处理
//! - 模型会话与 ONNX Runtime 后端
//! - 输出 argmax 与类别网格
//! - 彩色掩码、叠加图与图例渲染
//!
//! # 工作流程
//!
//! 1. 使用 `LabelCatalog` 加载标签并生成类别颜色
//! 2. 使用 `OrtSessionFactory` 编译模型得到 `ModelSession`
//! 3. `FrameAnalyzer::analyze` 把 `Frame` 转换为 `SegmentationResult`
//! 4. `ResultPostprocessor::render` 生成 `RenderedFrame`
//!
//! # 示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use segstream::segment::{
//!     ColorPolicy, Frame, FrameAnalyzer, LabelCatalog, ModelSession, OrtSessionFactory,
//!     ResultPostprocessor,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Arc::new(LabelCatalog::from_file("cityscapes_labels.txt", ColorPolicy::Seeded(0))?);
//! let bytes = std::fs::read("pspnet_cityscapes.onnx")?;
//! let model = OrtSessionFactory::new(1024, 512).load_model(&bytes)?;
//! let mut session = ModelSession::new("pspnet", Box::new(model));
//!
//! let image = image::open("street.jpg")?;
//! let frame = Frame::from_image(&image, Duration::ZERO);
//! let result = FrameAnalyzer::new().analyze(frame, Some(&mut session))?;
//! let rendered = ResultPostprocessor::new(catalog).render(&result);
//! println!("{} 个类别, {} ms", rendered.legend.len(), rendered.inference_ms());
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod frame;
pub mod image;
pub mod infer;
pub mod labels;
pub mod model;
pub mod posts;
pub mod render;

pub use analyzer::{FrameAnalyzer, SegmentationResult};
pub use frame::{Frame, PixelFormat};
pub use infer::{OrtSegmenter, OrtSessionFactory};
pub use labels::{ColorPolicy, LabelCatalog};
pub use model::{ModelInfo, ModelSession, SegmentationModel, SessionFactory};
pub use posts::ClassGrid;
pub use render::{LegendEntry, RenderedFrame, ResultPostprocessor};
