//! Command-line front end over the settings core.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::AppConfig;
use crate::settings::document;
use crate::AppContext;

#[derive(Parser)]
#[command(name = "uma-companion")]
#[command(about = "Inspect and edit Uma automation settings", long_about = None)]
pub struct Cli {
    /// Directory holding settings.db (defaults to UMA_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory exports are written to
    #[arg(long, global = true)]
    pub export_dir: Option<PathBuf>,

    /// Enable debug logging and mirror timings into the message log
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the settings document, or one category of it
    Show {
        category: Option<String>,
    },

    /// Print a single value
    Get {
        category: String,
        key: String,
    },

    /// Set a value; VALUE is parsed as JSON and falls back to a plain string
    Set {
        category: String,
        key: String,
        value: String,
    },

    /// Replace the settings with a JSON file
    Import {
        path: PathBuf,
    },

    /// Write the settings to a timestamped JSON file
    Export,

    /// Restore the default settings
    Reset,

    /// Delete every stored row
    Clear,

    /// List raw database rows with their type tags and timestamps
    Rows,
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::from_env()?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.export_dir {
            config.export_dir = dir.clone();
        }
        config.debug |= self.debug;
        Ok(config)
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn execute(ctx: &AppContext, command: Commands) -> Result<()> {
    let manager = ctx.settings();

    match command {
        Commands::Show { category } => {
            let tree = document::to_tree(&manager.current())?;
            match category {
                Some(name) => match tree.get(&name) {
                    Some(entries) => print_json(entries)?,
                    None => bail!("unknown category '{name}'"),
                },
                None => print_json(&tree)?,
            }
        }
        Commands::Get { category, key } => {
            let tree = document::to_tree(&manager.current())?;
            let value = tree
                .get(&category)
                .and_then(|entries| entries.get(&key))
                .with_context(|| format!("unknown setting {category}.{key}"))?;
            print_json(value)?;
        }
        Commands::Set { category, key, value } => {
            let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            let outcome = manager.set_value(&category, &key, value)?.outcome().await?;
            println!("{category}.{key} saved ({outcome:?})");
        }
        Commands::Import { path } => {
            manager.import_from_file(&path).await?;
            println!("Imported settings from {}", path.display());
        }
        Commands::Export => {
            let path = manager.export_to_file().await?;
            println!("{}", path.display());
        }
        Commands::Reset => {
            manager.reset().await?;
            println!("Settings reset to defaults");
        }
        Commands::Clear => {
            let removed = manager.clear_all().await?;
            println!("Removed {removed} row(s)");
        }
        Commands::Rows => {
            for row in ctx.database().list_setting_rows().await? {
                println!(
                    "{:>4}  {}.{} = {} [{}] updated {}",
                    row.id,
                    row.category,
                    row.key,
                    row.value,
                    row.value_type.map_or("untagged", |kind| kind.as_str()),
                    row.updated_at.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_with_global_flags() {
        let cli = Cli::try_parse_from([
            "uma-companion",
            "set",
            "training",
            "maximumFailureChance",
            "35",
            "--data-dir",
            "/tmp/uma",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/uma")));
        match cli.command {
            Commands::Set { category, key, value } => {
                assert_eq!(category, "training");
                assert_eq!(key, "maximumFailureChance");
                assert_eq!(value, "35");
            }
            _ => panic!("expected set command"),
        }
    }
}
