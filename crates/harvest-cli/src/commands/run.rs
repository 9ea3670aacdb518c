use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use comfy_table::{Cell, Color, Table};
use console::style;
use tracing::warn;

use harvest_auth::{resolve_token, KeyringStore};
use harvest_core::models::{format_size, SkipReason};
use harvest_discover::ExclusionList;
use harvest_dispatch::{
    Checkpoint, CommandScanner, Dispatcher, GitFetcher, ResultSink, RunContext, RunOutcome,
    RunReport,
};
use harvest_host::create_adapter;

use super::{load_config, EXIT_RATE_LIMITED};

#[derive(Args)]
pub struct RunArgs {
    /// Platform entry to harvest
    #[arg(long, short)]
    platform: String,
    /// Continue an interrupted run from its checkpoint
    #[arg(long)]
    resume: bool,
    /// Results directory (overrides the configuration)
    #[arg(long)]
    results: Option<PathBuf>,
    /// Do not draw progress spinners
    #[arg(long)]
    no_progress: bool,
}

pub async fn run(args: RunArgs, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let results_dir = args.results.clone().unwrap_or_else(|| config.results.clone());
    let checkpoint_path = results_dir.join(format!("checkpoint_{}.json", args.platform));

    let platform = resolve_token(config.platform(&args.platform)?, &KeyringStore::new())?;
    let exclusions = ExclusionList::load_optional(platform.exclusion_file.as_deref())?;
    let scanner = CommandScanner::new(config.scanner.command.clone())?
        .excluding(&platform.excluded_extensions);
    let adapter = create_adapter(&platform)?;

    let checkpoint = if args.resume {
        let checkpoint = Checkpoint::load(&checkpoint_path)?;
        if checkpoint.is_none() {
            anyhow::bail!(
                "no checkpoint at {}; run without --resume to start over",
                checkpoint_path.display()
            );
        }
        checkpoint
    } else {
        if checkpoint_path.exists() {
            warn!(
                path = %checkpoint_path.display(),
                "an earlier run left a checkpoint; starting over (pass --resume to continue it)"
            );
        }
        None
    };

    println!(
        "Harvesting {} on {}...",
        style(&platform.organization).bold(),
        platform.kind
    );
    let mut ctx = RunContext::new(platform, exclusions)
        .with_results_dir(&results_dir)
        .with_checkpoint(&checkpoint_path)
        .with_progress(!args.no_progress);
    if let Some(cp) = &checkpoint {
        ctx = ctx.with_run_id(cp.run_id);
        println!("  resuming run {} after #{}", cp.run_id, cp.last_sequence);
    }

    let dispatcher = Dispatcher::new(adapter, Arc::new(GitFetcher::new()), Arc::new(scanner), ctx);
    let report = dispatcher.harvest(checkpoint).await?;
    let agg = &report.aggregate;
    println!(
        "  {} repositories, {} excluded, {} archived",
        agg.discovered, agg.excluded, agg.archived
    );

    println!("{}", results_table(&report));
    println!("{}", summary_table(&report));

    match &report.outcome {
        RunOutcome::Completed => {
            let sink = ResultSink::new(&results_dir);
            let summary_file = sink.write_summary(&report.summary())?;
            let languages_file = sink.write_languages(&report.aggregate.language_totals())?;
            println!(
                "{} Results written to {}",
                style("✓").green(),
                summary_file.display()
            );
            println!("  languages: {}", languages_file.display());
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::RateLimited { in_flight, checkpoint } => {
            let stage = match in_flight {
                Some(f) => format!("harvesting {}/{}", f.project, f.repo),
                None => "listing repositories".to_string(),
            };
            println!(
                "{} Rate limit reached while {stage}.",
                style("!").yellow().bold()
            );
            match checkpoint {
                Some(path) => {
                    println!("  Progress saved to {}", path.display());
                    println!(
                        "  Resume later with: codeharvest run --platform {} --resume",
                        args.platform
                    );
                }
                None => println!(
                    "  Nothing was harvested yet. Run again later with: codeharvest run --platform {}",
                    args.platform
                ),
            }
            Ok(ExitCode::from(EXIT_RATE_LIMITED))
        }
    }
}

fn results_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["#", "REPOSITORY", "BRANCH", "COMMITS", "SIZE", "CODE LINES"]);
    for result in &report.results {
        table.add_row(vec![
            Cell::new(result.sequence),
            Cell::new(result.full_name()),
            Cell::new(&result.branch),
            Cell::new(result.commits),
            Cell::new(format_size(result.size)),
            Cell::new(result.report.total_code_lines),
        ]);
    }
    for skip in &report.skipped {
        let (label, color) = match &skip.reason {
            SkipReason::Empty => ("empty".to_string(), Color::DarkGrey),
            SkipReason::Failed { message } => {
                (format!("failed: {message}"), Color::Red)
            }
        };
        table.add_row(vec![
            Cell::new(skip.sequence),
            Cell::new(format!("{}/{}", skip.project, skip.repo)),
            Cell::new(label).fg(color),
            Cell::new(""),
            Cell::new(""),
            Cell::new(""),
        ]);
    }
    table
}

fn summary_table(report: &RunReport) -> Table {
    let summary = report.summary();
    let agg = &report.aggregate;
    let mut table = Table::new();
    table.set_header(vec!["SUMMARY", ""]);
    let rows: Vec<(&str, String)> = vec![
        ("Organization", summary.organization),
        ("Platform", summary.dev_ops_platform),
        ("Repositories analyzed", summary.number_repos.to_string()),
        ("Lines of code", summary.total_lines_of_code),
        (
            "Largest repository",
            format!("{} ({})", summary.largest_repository, summary.lines_of_code_largest_repo),
        ),
        ("Total size", format_size(agg.total_size)),
        ("Excluded", agg.excluded.to_string()),
        ("Archived", agg.archived.to_string()),
        ("Empty", agg.empty.to_string()),
        ("Failed", agg.failed.to_string()),
    ];
    for (label, value) in rows {
        let cell = if label == "Failed" && agg.failed > 0 {
            Cell::new(value).fg(Color::Red)
        } else {
            Cell::new(value)
        };
        table.add_row(vec![Cell::new(label), cell]);
    }
    table
}
