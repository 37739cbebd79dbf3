use image::{RgbImage, imageops::FilterType};
use ndarray::{Array, Array4};

use crate::config::{Normalization, ResizePolicy};
use crate::error::{Result, SegError};

/// 将图像调整为模型输入尺寸
///
/// 尺寸一致时原样返回；`Nearest` 策略使用最近邻插值拉伸，保证同一输入
/// 在不同帧之间得到完全相同的结果；`Exact` 策略拒绝尺寸不符的帧。
///
/// # 参数
/// * `img` - 原始 RGB 图像
/// * `width` - 模型输入宽度
/// * `height` - 模型输入高度
/// * `policy` - 尺寸处理策略
///
/// # 错误处理
/// `Exact` 策略下尺寸不符返回 `ShapeMismatch`
pub fn fit_to_input(
    img: RgbImage,
    width: usize,
    height: usize,
    policy: ResizePolicy,
) -> Result<RgbImage> {
    let (w, h) = (width as u32, height as u32);
    if img.dimensions() == (w, h) {
        return Ok(img);
    }
    match policy {
        ResizePolicy::Nearest => Ok(image::imageops::resize(&img, w, h, FilterType::Nearest)),
        ResizePolicy::Exact => Err(SegError::shape(
            format!("{}x{}", w, h),
            format!("{}x{}", img.width(), img.height()),
        )),
    }
}

/// 将图像转换为模型输入张量
///
/// 1. 像素值缩放到 [0, 1]
/// 2. 按通道做 (x - mean) / std
/// 3. 维度顺序为 NCHW
///
/// # 返回值
/// 返回形状为 (1, 3, height, width) 的四维张量
pub fn image_to_tensor(img: &RgbImage, normalization: &Normalization) -> Array4<f32> {
    let (width, height) = img.dimensions();
    let mut tensor = Array::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for channel in 0..3 {
            let value = pixel.0[channel] as f32 / 255.0;
            tensor[[0, channel, y, x]] =
                (value - normalization.mean[channel]) / normalization.std[channel];
        }
    }

    tensor
}
