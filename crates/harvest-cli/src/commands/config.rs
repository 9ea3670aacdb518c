use std::path::Path;

use clap::Subcommand;
use comfy_table::{Cell, Color, Table};
use console::style;
use harvest_core::config::HarvestConfig;

use super::{config_location, load_config};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a sample configuration if none exists
    Init,
    /// Print the configuration with access tokens masked
    Show,
    /// Check every platform entry
    Validate,
}

pub fn run(action: ConfigAction, path: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let location = match path {
                Some(path) => {
                    if !path.exists() {
                        HarvestConfig::sample().save_to(path)?;
                    }
                    path.to_path_buf()
                }
                None => HarvestConfig::init()?,
            };
            println!("Initialized codeharvest config at {}", location.display());
            println!("  edit the platform entries, then run `codeharvest config validate`");
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(path)?;
            println!("# {}", config_location(path)?.display());
            println!("{}", serde_json::to_string_pretty(&masked(config))?);
            Ok(())
        }
        ConfigAction::Validate => {
            let config = load_config(path)?;
            if config.platforms.is_empty() {
                anyhow::bail!("no platforms configured in {}", config_location(path)?.display());
            }
            let (table, failures) = validation_table(&config);
            println!("{table}");
            if failures > 0 {
                anyhow::bail!("{failures} of {} platform entries are invalid", config.platforms.len());
            }
            println!("{} configuration is valid", style("✓").green());
            Ok(())
        }
    }
}

fn masked(mut config: HarvestConfig) -> HarvestConfig {
    for platform in config.platforms.values_mut() {
        if !platform.access_token.is_empty() {
            platform.access_token = "********".into();
        }
    }
    config
}

fn validation_table(config: &HarvestConfig) -> (Table, usize) {
    let mut table = Table::new();
    table.set_header(vec!["PLATFORM", "KIND", "ORGANIZATION", "API", "WORKERS", "STATUS"]);
    let mut failures = 0;
    for (name, raw) in &config.platforms {
        match raw.validate(name) {
            Ok(platform) => {
                table.add_row(vec![
                    Cell::new(name),
                    Cell::new(platform.kind),
                    Cell::new(&platform.organization),
                    Cell::new(platform.api_url.as_str()),
                    Cell::new(platform.concurrency.workers),
                    Cell::new("ok").fg(Color::Green),
                ]);
            }
            Err(e) => {
                failures += 1;
                table.add_row(vec![
                    Cell::new(name),
                    Cell::new(&raw.dev_ops),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(e).fg(Color::Red),
                ]);
            }
        }
    }
    (table, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::config::RawPlatform;

    #[test]
    fn test_show_masks_tokens() {
        let mut config = HarvestConfig::sample();
        if let Some(p) = config.platforms.get_mut("github") {
            p.access_token = "ghp_secret".into();
        }
        let json = serde_json::to_string(&masked(config)).unwrap();
        assert!(!json.contains("ghp_secret"));
        assert!(json.contains("********"));
    }

    #[test]
    fn test_validation_counts_failures() {
        let mut config = HarvestConfig::sample();
        config.platforms.insert(
            "broken".into(),
            RawPlatform {
                dev_ops: "sourceforge".into(),
                ..RawPlatform::default()
            },
        );
        let (table, failures) = validation_table(&config);
        assert_eq!(failures, 1);
        assert!(table.to_string().contains("my-org"));
    }

    #[test]
    fn test_init_at_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        run(ConfigAction::Init, Some(&path)).unwrap();
        let config = HarvestConfig::load_from(&path).unwrap();
        assert!(config.platforms.contains_key("github"));
    }
}
