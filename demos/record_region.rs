use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use mondup::{CaptureEngine, CaptureTarget, Framerate};

fn save_bgra_png(bgra: &[u8], width: u32, height: u32, path: &Path) -> Result<()> {
    let mut rgba = bgra.to_vec();
    for pixel in rgba.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
    image::save_buffer(path, &rgba, width, height, image::ColorType::Rgba8)
        .map_err(|e| anyhow::anyhow!("failed to write PNG to {}: {e}", path.display()))
}

/// Usage: record_region [x y width height] [frames] [fps]
fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let number = |index: usize| -> Result<Option<i64>> {
        args.get(index)
            .map(|raw| raw.parse::<i64>().with_context(|| format!("invalid number {raw:?}")))
            .transpose()
    };

    let mut builder = CaptureEngine::builder().target(CaptureTarget::WholeDesktop);
    if let (Some(x), Some(y), Some(width), Some(height)) =
        (number(0)?, number(1)?, number(2)?, number(3)?)
    {
        builder = builder
            .offset(i32::try_from(x)?, i32::try_from(y)?)
            .capture_size(u32::try_from(width)?, u32::try_from(height)?);
    }
    let frames = number(4)?.unwrap_or(60).max(1);
    if let Some(raw) = args.get(5) {
        builder = builder.framerate(Framerate::parse(raw)?);
    }

    let begin = Instant::now();
    let mut engine = builder.build().context("failed to open capture engine")?;
    let info = engine.info();
    println!(
        "Opened {}x{} capture at {} fps in {:.3} ms",
        info.width,
        info.height,
        info.framerate,
        begin.elapsed().as_secs_f64() * 1000.0
    );

    let mut fresh = 0;
    let mut last = Vec::new();
    for _ in 0..frames {
        let frame = engine.next_frame().context("capture failed")?;
        if frame.is_new {
            fresh += 1;
        }
        last.clear();
        last.extend_from_slice(frame.data);
    }
    println!("Captured {frames} frames ({fresh} with new content)");

    let path = Path::new("./record-region.png");
    save_bgra_png(&last, info.width, info.height, path)?;
    println!("Saved last frame to {}", path.display());

    engine.close();
    Ok(())
}
