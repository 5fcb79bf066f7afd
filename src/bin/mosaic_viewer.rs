//! Browse a folder of images on a pannable, zoomable canvas.
//!
//! Usage: `mosaic_viewer <image-dir> [config.json]`

use anyhow::Context;
use mosaic_engine::config::EngineConfig;
use mosaic_engine::source::DirectorySource;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let dir = args
        .next()
        .context("usage: mosaic_viewer <image-dir> [config.json]")?;
    let config = match args.next() {
        Some(path) => EngineConfig::from_path(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::default(),
    };

    let source =
        DirectorySource::new(&dir).with_context(|| format!("reading image folder {dir}"))?;
    if source.is_empty() {
        anyhow::bail!("no images found in {dir}");
    }

    mosaic_engine::app::run_app(source, config)?;
    Ok(())
}
