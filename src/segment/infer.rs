//! ONNX Runtime 推理后端

use ndarray::{Array4, ArrayD, IxDyn};
use ort::{
    inputs,
    session::{Session, builder::GraphOptimizationLevel},
    tensor::TensorElementType,
    value::{Tensor, ValueType},
};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{Result, SegError};
use crate::segment::model::{SegmentationModel, SessionFactory};

/// 基于 ONNX Runtime 的分割模型
pub struct OrtSegmenter {
    session: Session,
    input_width: usize,
    input_height: usize,
    input_name: String,
    output_name: String,
}

impl OrtSegmenter {
    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }
}

impl SegmentationModel for OrtSegmenter {
    fn input_size(&self) -> (usize, usize) {
        (self.input_width, self.input_height)
    }

    fn run(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        run_inference(&mut self.session, &self.input_name, &self.output_name, input)
    }
}

/// 运行模型推理
///
/// # 参数
/// * `session` - ONNX 模型会话
/// * `input_name` - 输入张量名
/// * `output_name` - 输出张量名
/// * `input` - 输入张量，形状为 (1, 3, height, width)
///
/// # 返回值
/// 返回模型原始输出。整型输出（模型内部已做 argmax）会转换为 f32
pub fn run_inference(
    session: &mut Session,
    input_name: &str,
    output_name: &str,
    input: &Array4<f32>,
) -> Result<ArrayD<f32>> {
    let shape: Vec<usize> = input.shape().to_vec();
    let data: Vec<f32> = input.iter().copied().collect();
    let input_tensor =
        Tensor::from_array(([shape[0], shape[1], shape[2], shape[3]], data)).map_err(inference_error)?;
    let outputs = session
        .run(inputs![input_name => input_tensor])
        .map_err(inference_error)?;

    let output = outputs
        .get(output_name)
        .ok_or_else(|| SegError::Inference(format!("模型没有名为 `{}` 的输出", output_name)))?;
    let (shape, data): (Vec<usize>, Vec<f32>) = match output.dtype() {
        ValueType::Tensor {
            ty: TensorElementType::Int64,
            ..
        } => {
            let (shape, data) = output.try_extract_tensor::<i64>().map_err(inference_error)?;
            (
                shape.iter().map(|d| *d as usize).collect(),
                data.iter().map(|v| *v as f32).collect(),
            )
        }
        _ => {
            let (shape, data) = output.try_extract_tensor::<f32>().map_err(inference_error)?;
            (shape.iter().map(|d| *d as usize).collect(), data.to_vec())
        }
    };

    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| SegError::Inference(e.to_string()))
}

/// 把模型字节编译为 [`OrtSegmenter`]
#[derive(Debug, Clone)]
pub struct OrtSessionFactory {
    input_width: usize,
    input_height: usize,
    input_name: Option<String>,
    output_name: Option<String>,
    intra_threads: usize,
    optimization_level: u8,
}

impl OrtSessionFactory {
    pub fn new(input_width: usize, input_height: usize) -> Self {
        Self {
            input_width,
            input_height,
            input_name: None,
            output_name: None,
            intra_threads: crate::config::DEFAULT_INTRA_THREADS,
            optimization_level: crate::config::DEFAULT_OPTIMIZATION_LEVEL,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            input_width: config.input_width,
            input_height: config.input_height,
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            intra_threads: config.intra_threads,
            optimization_level: config.optimization_level,
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self
    }

    pub fn with_optimization_level(mut self, level: u8) -> Self {
        self.optimization_level = level;
        self
    }

    fn graph_level(&self) -> GraphOptimizationLevel {
        match self.optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        }
    }

    /// 加载模型并应用优化配置
    pub fn load_model(&self, model_bytes: &[u8]) -> Result<OrtSegmenter> {

        let session = Session::builder()
            .map_err(compile_error)?
            .with_optimization_level(self.graph_level())
            .map_err(compile_error)?
            .with_intra_threads(self.intra_threads)
            .map_err(compile_error)?
            .commit_from_memory(model_bytes)
            .map_err(compile_error)?;

        let input_name = match &self.input_name {
            Some(name) if session.inputs.iter().any(|input| &input.name == name) => name.clone(),
            Some(name) => {
                return Err(SegError::SessionCompile(format!("模型没有名为 `{}` 的输入", name)));
            }
            None => session
                .inputs
                .first()
                .map(|input| input.name.clone())
                .ok_or_else(|| SegError::SessionCompile("模型没有输入".to_string()))?,
        };
        let output_name = match &self.output_name {
            Some(name) if session.outputs.iter().any(|output| &output.name == name) => name.clone(),
            Some(name) => {
                return Err(SegError::SessionCompile(format!("模型没有名为 `{}` 的输出", name)));
            }
            None => session
                .outputs
                .first()
                .map(|output| output.name.clone())
                .ok_or_else(|| SegError::SessionCompile("模型没有输出".to_string()))?,
        };
        debug!(
            input = %input_name,
            output = %output_name,
            size = %format!("{}x{}", self.input_width, self.input_height),
            "ONNX 会话编译完成"
        );

        Ok(OrtSegmenter {
            session,
            input_width: self.input_width,
            input_height: self.input_height,
            input_name,
            output_name,
        })
    }
}

fn inference_error(e: impl std::fmt::Display) -> SegError {
    SegError::Inference(e.to_string())
}

fn compile_error(e: impl std::fmt::Display) -> SegError {
    SegError::SessionCompile(e.to_string())
}

impl SessionFactory for OrtSessionFactory {
    fn build(&self, model_bytes: &[u8]) -> Result<Box<dyn SegmentationModel>> {
        Ok(Box::new(self.load_model(model_bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_fail_to_compile() {
        let factory = OrtSessionFactory::new(4, 4).with_intra_threads(1);
        match factory.build(b"definitely not an onnx graph") {
            Err(SegError::SessionCompile(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("garbage compiled"),
        }
    }

    #[test]
    fn optimization_levels_map() {
        let factory = OrtSessionFactory::new(1, 1);
        assert!(matches!(
            factory.clone().with_optimization_level(0).graph_level(),
            GraphOptimizationLevel::Disable
        ));
        assert!(matches!(
            factory.with_optimization_level(9).graph_level(),
            GraphOptimizationLevel::Level3
        ));
    }
}
