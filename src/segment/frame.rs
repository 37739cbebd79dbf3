//! 相机帧
//!
//! [`Frame`] 持有一帧图像缓冲区和它的元数据。采集端可以附加一个释放回调，
//! 流水线用完这一帧（分析完成或被丢弃）时回调恰好执行一次。回调绑定在
//! `Drop` 上，所以无论帧走哪条路径都不会泄漏，也不会重复释放。

use std::fmt;
use std::time::Duration;

use image::{DynamicImage, RgbImage};

use crate::error::{Result, SegError};

/// 帧缓冲区的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Bgr8,
    Bgra8,
    Luma8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Luma8 => 1,
        }
    }
}

type ReleaseHandle = Box<dyn FnOnce() + Send + 'static>;

pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    /// 单调时钟时间戳
    timestamp: Duration,
    data: Vec<u8>,
    release: Option<ReleaseHandle>,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp: Duration,
        data: Vec<u8>,
    ) -> Self {
        Self {
            width,
            height,
            format,
            timestamp,
            data,
            release: None,
        }
    }

    /// 由已解码的图像构造 RGB 帧
    pub fn from_image(image: &DynamicImage, timestamp: Duration) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(width, height, PixelFormat::Rgb8, timestamp, rgb.into_raw())
    }

    /// 附加释放回调，帧被释放时调用
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 立即归还缓冲区
    pub fn release(self) {
        drop(self);
    }

    /// 将缓冲区转换为 RGB 图像
    ///
    /// # 错误处理
    /// 尺寸为 0 或缓冲区长度与宽高、格式不符时返回 `ShapeMismatch`
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let expected = self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        if self.width == 0 || self.height == 0 || self.data.len() != expected {
            return Err(SegError::shape(
                format!(
                    "{}x{} {:?} 帧需要 {} 字节",
                    self.width, self.height, self.format, expected
                ),
                format!("{} 字节", self.data.len()),
            ));
        }

        let rgb: Vec<u8> = match self.format {
            PixelFormat::Rgb8 => self.data.clone(),
            PixelFormat::Rgba8 => self
                .data
                .chunks_exact(4)
                .flat_map(|p| [p[0], p[1], p[2]])
                .collect(),
            PixelFormat::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|p| [p[2], p[1], p[0]])
                .collect(),
            PixelFormat::Bgra8 => self
                .data
                .chunks_exact(4)
                .flat_map(|p| [p[2], p[1], p[0]])
                .collect(),
            PixelFormat::Luma8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        };

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| SegError::shape("完整的 RGB 缓冲区", "长度不足"))
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(frame: Frame, counter: &Arc<AtomicUsize>) -> Frame {
        let counter = Arc::clone(counter);
        frame.with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn release_runs_once_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let frame = counted(
            Frame::new(1, 1, PixelFormat::Luma8, Duration::ZERO, vec![0]),
            &counter,
        );
        drop(frame);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_release_does_not_double_fire() {
        let counter = Arc::new(AtomicUsize::new(0));
        let frame = counted(
            Frame::new(1, 1, PixelFormat::Luma8, Duration::ZERO, vec![0]),
            &counter,
        );
        frame.release();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn converts_pixel_formats_to_rgb() {
        let bgra = Frame::new(2, 1, PixelFormat::Bgra8, Duration::ZERO, vec![1, 2, 3, 255, 4, 5, 6, 255]);
        assert_eq!(bgra.to_rgb_image().unwrap().into_raw(), vec![3, 2, 1, 6, 5, 4]);

        let luma = Frame::new(1, 2, PixelFormat::Luma8, Duration::ZERO, vec![7, 8]);
        assert_eq!(luma.to_rgb_image().unwrap().into_raw(), vec![7, 7, 7, 8, 8, 8]);

        let rgba = Frame::new(1, 1, PixelFormat::Rgba8, Duration::ZERO, vec![9, 8, 7, 0]);
        assert_eq!(rgba.to_rgb_image().unwrap().into_raw(), vec![9, 8, 7]);
    }

    #[test]
    fn short_buffer_is_a_shape_mismatch() {
        let frame = Frame::new(4, 4, PixelFormat::Rgb8, Duration::ZERO, vec![0; 10]);
        assert!(matches!(frame.to_rgb_image(), Err(SegError::ShapeMismatch { .. })));

        let empty = Frame::new(0, 4, PixelFormat::Rgb8, Duration::ZERO, Vec::new());
        assert!(matches!(empty.to_rgb_image(), Err(SegError::ShapeMismatch { .. })));
    }
}
