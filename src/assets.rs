//! 资源加载
//!
//! 流水线不关心模型和标签存放在哪里，只通过 [`AssetLoader`] 按标识取回
//! 原始字节和文本行。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, SegError};

/// 模型 / 标签资源提供者
///
/// 两个方法都是阻塞调用，流水线会在 tokio 的阻塞线程池中调用它们。
pub trait AssetLoader: Send + Sync + 'static {
    /// 读取模型的原始字节
    fn model_bytes(&self, model_id: &str) -> Result<Vec<u8>>;

    /// 读取标签文件的全部行
    fn label_lines(&self, labels_id: &str) -> Result<Vec<String>>;
}

/// 从本地目录读取资源，标识即相对路径
#[derive(Debug, Clone)]
pub struct FsAssetLoader {
    root: PathBuf,
}

impl FsAssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

impl AssetLoader for FsAssetLoader {
    fn model_bytes(&self, model_id: &str) -> Result<Vec<u8>> {
        let path = self.resolve(model_id);
        std::fs::read(&path).map_err(|e| SegError::asset(model_id, e))
    }

    fn label_lines(&self, labels_id: &str) -> Result<Vec<String>> {
        let path = self.resolve(labels_id);
        let text = std::fs::read_to_string(&path).map_err(|e| SegError::asset(labels_id, e))?;
        Ok(text.lines().map(str::to_string).collect())
    }
}

/// 内存中的资源表，相当于打包进程序的原始资源
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetLoader {
    models: HashMap<String, Vec<u8>>,
    labels: HashMap<String, Vec<String>>,
}

impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.models.insert(model_id.into(), bytes);
        self
    }

    pub fn with_labels<S: Into<String>>(
        mut self,
        labels_id: impl Into<String>,
        lines: impl IntoIterator<Item = S>,
    ) -> Self {
        self.labels
            .insert(labels_id.into(), lines.into_iter().map(Into::into).collect());
        self
    }
}

impl AssetLoader for MemoryAssetLoader {
    fn model_bytes(&self, model_id: &str) -> Result<Vec<u8>> {
        self.models
            .get(model_id)
            .cloned()
            .ok_or_else(|| SegError::asset(model_id, "未找到模型资源"))
    }

    fn label_lines(&self, labels_id: &str) -> Result<Vec<String>> {
        self.labels
            .get(labels_id)
            .cloned()
            .ok_or_else(|| SegError::asset(labels_id, "未找到标签资源"))
    }
}
