//! 结果渲染
//!
//! 把类别网格渲染为彩色掩码，并统计当前帧出现过的类别生成图例。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use raqote::{DrawOptions, DrawTarget};

use crate::segment::analyzer::SegmentationResult;
use crate::segment::labels::LabelCatalog;
use crate::segment::posts::ClassGrid;

/// 没有标签的类别 ID 使用透明色绘制
pub const UNKNOWN_COLOR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// 图例项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendEntry {
    pub class_id: usize,
    pub label: String,
    pub color: Rgba<u8>,
}

/// 渲染完成、可直接显示的一帧
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// 彩色掩码，尺寸与类别网格一致
    pub mask: RgbaImage,
    /// 掩码叠加到模型输入图像上的结果
    pub overlay: Option<RgbaImage>,
    /// 按首次出现顺序排列的图例
    pub legend: Vec<LegendEntry>,
    pub inference_time: Duration,
    pub timestamp: Duration,
    /// 类别 ID 超出标签范围的像素数
    pub unknown_pixels: usize,
}

impl RenderedFrame {
    pub fn inference_ms(&self) -> u64 {
        self.inference_time.as_millis() as u64
    }
}

/// 结果后处理器
#[derive(Debug, Clone)]
pub struct ResultPostprocessor {
    catalog: Arc<LabelCatalog>,
    overlay_alpha: Option<f32>,
}

impl ResultPostprocessor {
    pub fn new(catalog: Arc<LabelCatalog>) -> Self {
        Self {
            catalog,
            overlay_alpha: None,
        }
    }

    /// 设置叠加图中掩码的透明度
    pub fn with_overlay_alpha(mut self, alpha: Option<f32>) -> Self {
        self.overlay_alpha = alpha.map(|a| a.clamp(0.0, 1.0));
        self
    }

    pub fn catalog(&self) -> &Arc<LabelCatalog> {
        &self.catalog
    }

    /// 渲染一帧分析结果
    ///
    /// 像素 (x, y) 取 `grid[[y, x]]` 的类别颜色；图例只扫描一遍网格。
    pub fn render(&self, result: &SegmentationResult) -> RenderedFrame {
        let grid = result.grid();
        let (mask, unknown_pixels) = self.paint(grid);
        let legend = self.legend(grid);

        let overlay = match (self.overlay_alpha, result.input()) {
            (Some(alpha), Some(input)) => Some(blend_overlay(input, &mask, alpha)),
            _ => None,
        };

        RenderedFrame {
            mask,
            overlay,
            legend,
            inference_time: result.inference_time(),
            timestamp: result.timestamp(),
            unknown_pixels,
        }
    }

    fn paint(&self, grid: &ClassGrid) -> (RgbaImage, usize) {
        let (height, width) = grid.dim();
        let mut mask = RgbaImage::new(width as u32, height as u32);
        let mut unknown = 0;
        for ((row, col), &class_id) in grid.indexed_iter() {
            let color = match self.catalog.color(class_id as usize) {
                Some(color) => color,
                None => {
                    unknown += 1;
                    UNKNOWN_COLOR
                }
            };
            mask.put_pixel(col as u32, row as u32, color);
        }
        (mask, unknown)
    }

    /// 按首次出现顺序收集类别，重复类别只记录一次
    pub fn legend(&self, grid: &ClassGrid) -> Vec<LegendEntry> {
        let mut seen = HashSet::new();
        let mut legend = Vec::new();
        let mut last = None;

        for &class_id in grid.iter() {
            // 相邻像素多为同一类别，跳过哈希查找
            if last == Some(class_id) {
                continue;
            }
            last = Some(class_id);

            let class_id = class_id as usize;
            if !seen.insert(class_id) {
                continue;
            }
            if let (Some(label), Some(color)) =
                (self.catalog.label(class_id), self.catalog.color(class_id))
            {
                legend.push(LegendEntry {
                    class_id,
                    label: label.to_string(),
                    color,
                });
            }
        }

        legend
    }
}

/// 将彩色掩码按透明度叠加到图像上
///
/// # 参数
/// * `base` - 底图，与掩码尺寸一致时逐像素对齐，否则掩码拉伸到底图尺寸
/// * `mask` - 彩色掩码
/// * `alpha` - 掩码透明度 (0.0 - 1.0)
pub fn blend_overlay(base: &RgbImage, mask: &RgbaImage, alpha: f32) -> RgbaImage {
    let (width, height) = base.dimensions();
    let mut dt = DrawTarget::new(width as i32, height as i32);

    let base_data: Vec<u32> = base
        .pixels()
        .map(|Rgb([r, g, b])| u32::from_le_bytes([*b, *g, *r, 0xFF]))
        .collect();
    let base_img = raqote::Image {
        width: width as i32,
        height: height as i32,
        data: &base_data,
    };
    dt.draw_image_at(0.0, 0.0, &base_img, &DrawOptions::new());

    // raqote 使用预乘 alpha
    let mask_data: Vec<u32> = mask
        .pixels()
        .map(|Rgba([r, g, b, a])| {
            let premul = |c: u8| ((c as u16 * *a as u16 + 127) / 255) as u8;
            u32::from_le_bytes([premul(*b), premul(*g), premul(*r), *a])
        })
        .collect();
    let mask_img = raqote::Image {
        width: mask.width() as i32,
        height: mask.height() as i32,
        data: &mask_data,
    };
    dt.draw_image_with_size_at(
        width as f32,
        height as f32,
        0.0,
        0.0,
        &mask_img,
        &DrawOptions {
            alpha,
            ..DrawOptions::new()
        },
    );

    let pixels: Vec<u8> = dt
        .get_data()
        .iter()
        .flat_map(|&pixel| {
            let bytes = pixel.to_le_bytes();
            [bytes[2], bytes[1], bytes[0], bytes[3]]
        })
        .collect();

    RgbaImage::from_raw(width, height, pixels).unwrap_or_else(|| RgbaImage::new(width, height))
}
