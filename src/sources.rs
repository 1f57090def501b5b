use anyhow::Result;

use crate::config::Config;

pub fn list_sources(config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{:<24} {:<8} {:<24} URL", "SOURCE", "ACTIVE", "OWNER");
    for (kind, name, source) in config.sources.iter() {
        println!(
            "{:<24} {:<8} {:<24} {}",
            format!("{}:{}", kind, name),
            source.active,
            source.owner.as_deref().unwrap_or("-"),
            source.url
        );
    }

    Ok(())
}
