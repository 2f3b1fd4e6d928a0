//! `jd-decoder config`: print the effective configuration.

use anyhow::{Context, Result};

use jd_decoder::Config;

pub(crate) fn cmd_config() -> Result<()> {
    let path = Config::path();
    let config = Config::load().with_context(|| "Failed to load configuration")?;

    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", path.display())
    };
    println!("# config file: {source}");
    println!("{}", render(&config)?);
    Ok(())
}

fn render(config: &Config) -> Result<String> {
    serde_json::to_string_pretty(config).context("Failed to serialize configuration")
}
