use std::path::Path;

use clap::Subcommand;
use comfy_table::Table;
use harvest_dispatch::Checkpoint;

use super::load_config;

#[derive(Subcommand)]
pub enum CheckpointAction {
    /// Show the checkpoint left by an interrupted run
    Show {
        /// Platform entry name
        #[arg(long, short)]
        platform: String,
    },
    /// Discard the checkpoint so the next run starts over
    Clear {
        /// Platform entry name
        #[arg(long, short)]
        platform: String,
    },
}

pub fn run(action: CheckpointAction, path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    match action {
        CheckpointAction::Show { platform } => {
            let file = config.checkpoint_path(&platform);
            match Checkpoint::load(&file)? {
                Some(checkpoint) => println!("{}", checkpoint_table(&checkpoint)),
                None => println!("No checkpoint for '{platform}' at {}", file.display()),
            }
            Ok(())
        }
        CheckpointAction::Clear { platform } => {
            let file = config.checkpoint_path(&platform);
            Checkpoint::delete(&file)?;
            println!("Checkpoint cleared for '{platform}'");
            Ok(())
        }
    }
}

fn checkpoint_table(checkpoint: &Checkpoint) -> Table {
    let in_flight = checkpoint
        .in_flight
        .as_ref()
        .map(|f| {
            if f.branch.is_empty() {
                format!("{}/{}", f.project, f.repo)
            } else {
                format!("{}/{} @ {}", f.project, f.repo, f.branch)
            }
        })
        .unwrap_or_else(|| "-".to_string());

    let mut table = Table::new();
    table.set_header(vec!["CHECKPOINT", ""]);
    table.add_row(vec!["Run".to_string(), checkpoint.run_id.to_string()]);
    table.add_row(vec![
        "Platform".to_string(),
        format!("{} ({})", checkpoint.platform, checkpoint.organization),
    ]);
    table.add_row(vec!["Done through".to_string(), format!("#{}", checkpoint.last_sequence)]);
    table.add_row(vec!["Results".to_string(), checkpoint.results.len().to_string()]);
    table.add_row(vec!["Skipped".to_string(), checkpoint.skipped.len().to_string()]);
    table.add_row(vec!["Stopped at".to_string(), in_flight]);
    table
}
