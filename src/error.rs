//! 错误类型
//!
//! 流水线中所有可能出现的错误都汇总在 [`SegError`] 中。
//! 单帧错误（`NoActiveSession`、`Inference`、`ShapeMismatch`）只影响当前帧，
//! 会话切换错误（`AssetLoad`、`SessionCompile`）只返回给发起切换的调用方。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegError {
    #[error("资源加载失败 `{id}`: {reason}")]
    AssetLoad { id: String, reason: String },

    #[error("模型会话编译失败: {0}")]
    SessionCompile(String),

    #[error("当前没有可用的模型会话")]
    NoActiveSession,

    #[error("推理失败: {0}")]
    Inference(String),

    #[error("尺寸不匹配: 期望 {expected}, 实际 {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("流水线已关闭")]
    PipelineClosed,

    #[error("线程启动失败: {0}")]
    Spawn(String),
}

impl SegError {
    pub(crate) fn asset(id: &str, reason: impl ToString) -> Self {
        SegError::AssetLoad {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn shape(expected: impl ToString, actual: impl ToString) -> Self {
        SegError::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// 是否为单帧错误（丢弃当前帧后流水线继续运行）
    pub fn is_per_frame(&self) -> bool {
        matches!(
            self,
            SegError::NoActiveSession | SegError::Inference(_) | SegError::ShapeMismatch { .. }
        )
    }
}

pub type Result<T, E = SegError> = std::result::Result<T, E>;
