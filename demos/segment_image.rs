use std::time::Duration;

use anyhow::Context;
use segstream::{ChannelSink, Frame, FsAssetLoader, Pipeline, PipelineConfig, SinkEvent};
use tracing_subscriber::EnvFilter;

/// 用法: segment_image [图像路径] [配置文件]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("Segstream 语义分割示例");
    println!("========================");

    let mut args = std::env::args().skip(1);
    let image_path = args
        .next()
        .unwrap_or_else(|| "data/test/street.jpg".to_string());
    let config = match args.next() {
        Some(path) => PipelineConfig::from_file(&path)?,
        None => PipelineConfig::default().with_overlay_alpha(0.5),
    };

    // 模型和标签文件放在 module/segment 目录下
    let (sink, events) = ChannelSink::new();
    let pipeline = Pipeline::builder(config)
        .with_loader(FsAssetLoader::new("module/segment"))
        .with_sink(sink)
        .build()?;

    let info = pipeline.load_default_session().await?;
    println!(
        "模型 {} 已加载，输入尺寸 {}x{}",
        info.model_id, info.input_width, info.input_height
    );

    let image = image::open(&image_path).with_context(|| format!("无法打开 {}", image_path))?;
    println!("原始图像尺寸: {}x{}", image.width(), image.height());
    pipeline.submit(Frame::from_image(&image, Duration::ZERO));

    let rendered = match events.recv_timeout(Duration::from_secs(30))? {
        SinkEvent::Result(rendered) => rendered,
        SinkEvent::Error(error) => return Err(error.into()),
    };
    println!("推理耗时: {} ms", rendered.inference_ms());

    println!("\n图例:");
    for entry in &rendered.legend {
        let [r, g, b, _] = entry.color.0;
        println!("- {:>3} {:<16} #{:02x}{:02x}{:02x}", entry.class_id, entry.label, r, g, b);
    }
    if rendered.unknown_pixels > 0 {
        println!("未知类别像素: {}", rendered.unknown_pixels);
    }

    std::fs::create_dir_all("results")?;
    rendered.mask.save("results/segment_mask.png")?;
    println!("掩码已保存到: results/segment_mask.png");
    if let Some(overlay) = &rendered.overlay {
        overlay.save("results/segment_overlay.png")?;
        println!("叠加图已保存到: results/segment_overlay.png");
    }

    pipeline.shutdown();
    Ok(())
}
