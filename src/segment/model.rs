//! 模型会话
//!
//! [`SegmentationModel`] 抽象了"输入 NCHW 张量、输出类别分数"的推理后端，
//! [`SessionFactory`] 负责把原始模型字节编译成可运行的后端。流水线只依赖这两个
//! trait，ONNX Runtime 的实现见 [`crate::segment::infer`]。

use std::fmt;

use ndarray::{Array4, ArrayD};

use crate::error::Result;

/// 可执行的分割模型
pub trait SegmentationModel: Send + 'static {
    /// 模型输入尺寸 (宽, 高)
    fn input_size(&self) -> (usize, usize);

    /// 同步执行一次推理
    ///
    /// # 参数
    /// * `input` - 形状为 (1, 3, height, width) 的输入张量
    ///
    /// # 返回值
    /// 形状为 (1, C, height, width) 的类别分数，或 (1, height, width) 的类别图
    fn run(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>>;
}

/// 从模型字节构建分割模型
pub trait SessionFactory: Send + Sync + 'static {
    fn build(&self, model_bytes: &[u8]) -> Result<Box<dyn SegmentationModel>>;
}

impl<F> SessionFactory for F
where
    F: Fn(&[u8]) -> Result<Box<dyn SegmentationModel>> + Send + Sync + 'static,
{
    fn build(&self, model_bytes: &[u8]) -> Result<Box<dyn SegmentationModel>> {
        self(model_bytes)
    }
}

/// 活动会话的描述信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub model_id: String,
    pub input_width: usize,
    pub input_height: usize,
    /// 安装序号，每次切换递增
    pub generation: u64,
}

/// 已编译、可直接推理的模型会话
pub struct ModelSession {
    info: ModelInfo,
    model: Box<dyn SegmentationModel>,
}

impl ModelSession {
    pub fn new(model_id: impl Into<String>, model: Box<dyn SegmentationModel>) -> Self {
        let (input_width, input_height) = model.input_size();
        Self {
            info: ModelInfo {
                model_id: model_id.into(),
                input_width,
                input_height,
                generation: 0,
            },
            model,
        }
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.info.generation = generation;
    }

    pub fn input_size(&self) -> (usize, usize) {
        (self.info.input_width, self.info.input_height)
    }

    pub fn run(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        self.model.run(input)
    }
}

impl fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSession").field("info", &self.info).finish()
    }
}
