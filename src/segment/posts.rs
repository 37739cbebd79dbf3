//! 模型输出后处理
//!
//! 把模型原始输出转换为逐像素类别网格。网格约定为 `grid[[row, col]]`，
//! `row < input_height`，`col < input_width`，与模型 NCHW 输出的轴顺序一致，
//! 渲染时像素坐标为 `(x = col, y = row)`，全程不做转置。

use ndarray::{Array2, ArrayD, ArrayView3, Axis, Ix3, Zip};

use crate::error::{Result, SegError};

/// 逐像素类别网格
pub type ClassGrid = Array2<u32>;

/// 类别图中无法解释为类别 ID 的值（负数、NaN、无穷）
pub const INVALID_CLASS: u32 = u32::MAX;

/// 将模型输出转换为类别网格
///
/// 支持的输出形状：
/// * `(1, C, H, W)` - 类别分数，沿类别维取 argmax
/// * `(1, H, W)` / `(H, W)` - 模型已输出类别图，直接使用
///
/// # 参数
/// * `output` - 模型原始输出
/// * `height` - 模型输入高度
/// * `width` - 模型输入宽度
///
/// # 错误处理
/// 其他形状或空间尺寸不符时返回 `ShapeMismatch`
pub fn class_grid(output: &ArrayD<f32>, height: usize, width: usize) -> Result<ClassGrid> {
    let shape = output.shape();
    let mismatch = || {
        SegError::shape(
            format!("[1, C, {}, {}] 或 [1, {}, {}]", height, width, height, width),
            format!("{:?}", shape),
        )
    };

    match *shape {
        [1, classes, h, w] if h == height && w == width && classes > 0 => {
            let scores = output
                .index_axis(Axis(0), 0)
                .into_dimensionality::<Ix3>()
                .map_err(|_| mismatch())?;
            Ok(argmax_classes(scores))
        }
        [1, h, w] if h == height && w == width => {
            let map = output.index_axis(Axis(0), 0);
            Ok(Array2::from_shape_fn((h, w), |(row, col)| {
                to_class_id(map[[row, col]])
            }))
        }
        [h, w] if h == height && w == width => {
            Ok(Array2::from_shape_fn((h, w), |(row, col)| {
                to_class_id(output[[row, col]])
            }))
        }
        _ => Err(mismatch()),
    }
}

/// 类别图中的值转换为类别 ID，忽略标签 (-1) 等无效值映射为 [`INVALID_CLASS`]
fn to_class_id(value: f32) -> u32 {
    if value.is_finite() && value >= 0.0 {
        value as u32
    } else {
        INVALID_CLASS
    }
}

/// 沿类别维取 argmax
///
/// 分数相同时取较小的类别 ID，NaN 永远不会胜出。
pub fn argmax_classes(scores: ArrayView3<f32>) -> ClassGrid {
    let (_, height, width) = scores.dim();
    let mut grid = Array2::<u32>::zeros((height, width));

    Zip::indexed(&mut grid).par_for_each(|(row, col), class| {
        let mut best = f32::NEG_INFINITY;
        let mut best_class = 0u32;
        for (c, &score) in scores.slice(ndarray::s![.., row, col]).iter().enumerate() {
            if score > best {
                best = score;
                best_class = c as u32;
            }
        }
        *class = best_class;
    });

    grid
}
