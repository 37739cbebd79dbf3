use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegError};

// 分割模型默认参数（cityscapes PSPNet）
pub const DEFAULT_INPUT_WIDTH: usize = 1024;
pub const DEFAULT_INPUT_HEIGHT: usize = 512;
pub const DEFAULT_MODEL_ID: &str = "pspnet_cityscapes.onnx";
pub const DEFAULT_LABELS_ID: &str = "cityscapes_labels.txt";

pub const DEFAULT_INTRA_THREADS: usize = 4;
pub const DEFAULT_OPTIMIZATION_LEVEL: u8 = 3;
pub const BACKGROUND_CLASS_ID: usize = 0;

/// 输入帧尺寸与模型输入不一致时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// 最近邻拉伸到模型输入尺寸
    #[default]
    Nearest,
    /// 要求帧尺寸与模型输入完全一致，否则丢弃该帧
    Exact,
}

/// 像素归一化参数，先缩放到 [0, 1] 再按通道做 (x - mean) / std
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub const UNIT: Normalization = Normalization {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
    };

    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };
}

impl Default for Normalization {
    fn default() -> Self {
        Self::UNIT
    }
}

/// 流水线配置
///
/// 所有字段都有默认值，TOML 中只需写出需要覆盖的项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 模型资源标识，交给 `AssetLoader` 解析
    pub model_id: String,
    /// 标签资源标识
    pub labels_id: String,
    /// 模型输入宽度
    pub input_width: usize,
    /// 模型输入高度
    pub input_height: usize,
    /// 输入张量名，为空时取模型的第一个输入
    pub input_name: Option<String>,
    /// 输出张量名，为空时取模型的第一个输出
    pub output_name: Option<String>,
    pub resize: ResizePolicy,
    pub normalization: Normalization,
    /// 类别颜色的随机种子，为空时每个进程随机生成
    pub color_seed: Option<u64>,
    /// 叠加图的掩码透明度 (0.0 - 1.0)，为空时不生成叠加图
    pub overlay_alpha: Option<f32>,
    /// ONNX Runtime 算子内线程数
    pub intra_threads: usize,
    /// ONNX Runtime 图优化等级 (0 - 3)
    pub optimization_level: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            labels_id: DEFAULT_LABELS_ID.to_string(),
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
            input_name: None,
            output_name: None,
            resize: ResizePolicy::default(),
            normalization: Normalization::default(),
            color_seed: None,
            overlay_alpha: None,
            intra_threads: DEFAULT_INTRA_THREADS,
            optimization_level: DEFAULT_OPTIMIZATION_LEVEL,
        }
    }
}

impl PipelineConfig {
    /// 从 TOML 文本解析配置并校验
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| SegError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SegError::Config(format!("无法读取 {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_width == 0 || self.input_height == 0 {
            return Err(SegError::Config(format!(
                "模型输入尺寸无效: {}x{}",
                self.input_width, self.input_height
            )));
        }
        if self.normalization.std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(SegError::Config("归一化 std 不能为 0".to_string()));
        }
        if let Some(alpha) = self.overlay_alpha {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(SegError::Config(format!("overlay_alpha 超出范围: {}", alpha)));
            }
        }
        if self.optimization_level > 3 {
            return Err(SegError::Config(format!(
                "optimization_level 超出范围: {}",
                self.optimization_level
            )));
        }
        if self.intra_threads == 0 {
            return Err(SegError::Config("intra_threads 至少为 1".to_string()));
        }
        Ok(())
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_input_size(mut self, width: usize, height: usize) -> Self {
        self.input_width = width;
        self.input_height = height;
        self
    }

    pub fn with_color_seed(mut self, seed: u64) -> Self {
        self.color_seed = Some(seed);
        self
    }

    pub fn with_overlay_alpha(mut self, alpha: f32) -> Self {
        self.overlay_alpha = Some(alpha);
        self
    }

    pub fn with_resize(mut self, resize: ResizePolicy) -> Self {
        self.resize = resize;
        self
    }
}
