use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::debug;

use crate::config::{Normalization, PipelineConfig, ResizePolicy};
use crate::error::{Result, SegError};
use crate::segment::frame::Frame;
use crate::segment::image::{fit_to_input, image_to_tensor};
use crate::segment::model::ModelSession;
use crate::segment::posts::{ClassGrid, class_grid};

/// 单帧分析结果
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    /// 类别网格，尺寸为 input_height x input_width
    grid: ClassGrid,
    /// 推理耗时
    inference_time: Duration,
    /// 源帧时间戳
    timestamp: Duration,
    /// 缩放后的模型输入图像，仅在需要叠加图时保留
    input: Option<RgbImage>,
}

impl SegmentationResult {
    pub fn new(grid: ClassGrid, inference_time: Duration, timestamp: Duration) -> Self {
        Self {
            grid,
            inference_time,
            timestamp,
            input: None,
        }
    }

    pub fn with_input(mut self, input: RgbImage) -> Self {
        self.input = Some(input);
        self
    }

    pub fn grid(&self) -> &ClassGrid {
        &self.grid
    }

    pub fn inference_time(&self) -> Duration {
        self.inference_time
    }

    /// 推理耗时（毫秒）
    pub fn inference_ms(&self) -> u64 {
        self.inference_time.as_millis() as u64
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn input(&self) -> Option<&RgbImage> {
        self.input.as_ref()
    }

    /// (高, 宽)
    pub fn dim(&self) -> (usize, usize) {
        self.grid.dim()
    }
}

/// 帧分析器
///
/// 每次调用 [`FrameAnalyzer::analyze`] 处理一帧：预处理、推理、argmax。
/// 分析器本身不做并发控制，调用方（分析工作线程）保证同一时刻只有一次调用。
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    resize: ResizePolicy,
    normalization: Normalization,
    keep_input: bool,
}

impl Default for FrameAnalyzer {
    fn default() -> Self {
        Self {
            resize: ResizePolicy::default(),
            normalization: Normalization::default(),
            keep_input: false,
        }
    }
}

impl FrameAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            resize: config.resize,
            normalization: config.normalization,
            keep_input: config.overlay_alpha.is_some(),
        }
    }

    pub fn with_resize(mut self, resize: ResizePolicy) -> Self {
        self.resize = resize;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// 是否在结果中保留模型输入图像（生成叠加图时需要）
    pub fn with_keep_input(mut self, keep_input: bool) -> Self {
        self.keep_input = keep_input;
        self
    }

    /// 分析一帧
    ///
    /// 预处理生成输入张量后立即释放帧缓冲区，然后同步执行推理。
    ///
    /// # 参数
    /// * `frame` - 待分析的帧，函数返回前一定会被释放
    /// * `session` - 当前活动的模型会话
    ///
    /// # 错误处理
    /// * `NoActiveSession` - 尚未安装会话
    /// * `ShapeMismatch` - 帧或模型输出尺寸不符
    /// * `Inference` - 推理运行时错误
    pub fn analyze(
        &self,
        frame: Frame,
        session: Option<&mut ModelSession>,
    ) -> Result<SegmentationResult> {
        let session = session.ok_or(SegError::NoActiveSession)?;
        let (width, height) = session.input_size();

        let timestamp = frame.timestamp();
        let rgb = frame.to_rgb_image()?;
        frame.release();

        let input = fit_to_input(rgb, width, height, self.resize)?;
        let tensor = image_to_tensor(&input, &self.normalization);

        let start = Instant::now();
        let output = session.run(&tensor)?;
        let inference_time = start.elapsed();
        debug!("推理耗时: {:?}", inference_time);

        let grid = class_grid(&output, height, width)?;
        let result = SegmentationResult::new(grid, inference_time, timestamp);
        Ok(if self.keep_input {
            result.with_input(input)
        } else {
            result
        })
    }
}
