//! 类别标签与显示颜色
//!
//! 标签文件每行一个类别名，行号即类别 ID。每个类别对应一个固定颜色：
//! 0 号类别（背景）固定为不透明黑色，其余类别的颜色在构造时按 [`ColorPolicy`]
//! 随机生成一次，之后在目录的整个生命周期内保持不变。

use std::path::Path;

use image::Rgba;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::assets::AssetLoader;
use crate::config::BACKGROUND_CLASS_ID;
use crate::error::{Result, SegError};

/// 背景颜色：不透明黑色
pub const BACKGROUND_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// 类别颜色的生成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorPolicy {
    /// 固定种子，多次运行颜色一致
    Seeded(u64),
    /// 每个进程随机
    Entropy,
}

impl From<Option<u64>> for ColorPolicy {
    fn from(seed: Option<u64>) -> Self {
        seed.map_or(ColorPolicy::Entropy, ColorPolicy::Seeded)
    }
}

/// 标签目录
#[derive(Debug, Clone)]
pub struct LabelCatalog {
    labels: Vec<String>,
    colors: Vec<Rgba<u8>>,
}

impl LabelCatalog {
    /// 由标签行构造目录
    ///
    /// # 参数
    /// * `lines` - 标签行，顺序即类别 ID
    /// * `policy` - 颜色生成方式
    ///
    /// # 错误处理
    /// 标签为空时返回 `AssetLoad`
    pub fn from_lines<S: AsRef<str>>(
        lines: impl IntoIterator<Item = S>,
        policy: ColorPolicy,
    ) -> Result<Self> {
        let labels: Vec<String> = lines
            .into_iter()
            .map(|line| line.as_ref().trim_end_matches('\r').to_string())
            .collect();
        if labels.is_empty() {
            return Err(SegError::asset("labels", "标签文件为空"));
        }
        let colors = generate_colors(labels.len(), policy);
        Ok(Self { labels, colors })
    }

    /// 解析整段标签文本，末尾换行不会产生空标签
    pub fn from_text(text: &str, policy: ColorPolicy) -> Result<Self> {
        Self::from_lines(text.lines(), policy)
    }

    pub fn from_file(path: impl AsRef<Path>, policy: ColorPolicy) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SegError::asset(&path.display().to_string(), e))?;
        Self::from_text(&text, policy)
    }

    /// 通过资源加载器读取标签
    pub fn load(loader: &dyn AssetLoader, labels_id: &str, policy: ColorPolicy) -> Result<Self> {
        let lines = loader.label_lines(labels_id)?;
        Self::from_lines(lines, policy).map_err(|e| match e {
            SegError::AssetLoad { reason, .. } => SegError::asset(labels_id, reason),
            other => other,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    pub fn color(&self, class_id: usize) -> Option<Rgba<u8>> {
        self.colors.get(class_id).copied()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn colors(&self) -> &[Rgba<u8>] {
        &self.colors
    }
}

fn generate_colors(count: usize, policy: ColorPolicy) -> Vec<Rgba<u8>> {
    let mut rng = match policy {
        ColorPolicy::Seeded(seed) => StdRng::seed_from_u64(seed),
        ColorPolicy::Entropy => StdRng::from_entropy(),
    };
    (0..count)
        .map(|class_id| {
            if class_id == BACKGROUND_CLASS_ID {
                BACKGROUND_COLOR
            } else {
                Rgba([rng.r#gen(), rng.r#gen(), rng.r#gen(), 255])
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssetLoader;

    #[test]
    fn three_line_catalog() {
        let catalog =
            LabelCatalog::from_text("background\nroad\nsky\n", ColorPolicy::Seeded(1)).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.colors().len(), 3);
        assert_eq!(catalog.color(0), Some(BACKGROUND_COLOR));
        assert_eq!(catalog.label(1), Some("road"));
        assert_eq!(catalog.label(3), None);
        assert!(catalog.colors().iter().all(|c| c.0[3] == 255));
    }

    #[test]
    fn blank_lines_keep_their_class_id() {
        let catalog = LabelCatalog::from_text("background\r\n\r\nsky", ColorPolicy::Entropy).unwrap();
        assert_eq!(catalog.labels(), ["background", "", "sky"]);
    }

    #[test]
    fn empty_resource_is_an_error() {
        assert!(matches!(
            LabelCatalog::from_text("", ColorPolicy::Entropy),
            Err(SegError::AssetLoad { .. })
        ));
    }

    #[test]
    fn seeded_colors_are_reproducible() {
        let lines = ["background", "a", "b", "c", "d"];
        let first = LabelCatalog::from_lines(lines, ColorPolicy::Seeded(42)).unwrap();
        let second = LabelCatalog::from_lines(lines, ColorPolicy::Seeded(42)).unwrap();
        assert_eq!(first.colors(), second.colors());
    }

    #[test]
    fn load_through_asset_loader() {
        let loader = MemoryAssetLoader::new()
            .with_labels("cityscapes", ["road", "sidewalk"])
            .with_labels("empty", Vec::<String>::new());
        let catalog = LabelCatalog::load(&loader, "cityscapes", ColorPolicy::Seeded(0)).unwrap();
        assert_eq!(catalog.label(0), Some("road"));

        match LabelCatalog::load(&loader, "empty", ColorPolicy::Seeded(0)) {
            Err(SegError::AssetLoad { id, .. }) => assert_eq!(id, "empty"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
