use anyhow::{Context, Result};

fn main() -> Result<()> {
    env_logger::init();

    let sources = mondup::list_sources().context("failed to enumerate capture sources")?;
    if sources.is_empty() {
        println!("No capture sources found");
        return Ok(());
    }

    for source in &sources {
        println!(
            "{}: {} {}x{}{}",
            source.id,
            source.rect,
            source.rect.width(),
            source.rect.height(),
            if source.is_primary { " (primary)" } else { "" },
        );
    }
    Ok(())
}
