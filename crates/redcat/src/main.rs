use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::warn;
use redcat_core::cleaner::{CancellationToken, CategoryStatus, RunReport, run};
use redcat_core::config::{CliOverrides, DEFAULT_CONFIG_FILENAME, RunConfig, load_config};
use redcat_core::logging::init_logging;

#[derive(Debug, Parser)]
#[command(
    name = "redcat",
    version,
    about = "Remove links to wanted (red) categories from wiki articles"
)]
struct Cli {
    #[arg(long, help = "Log the edits that would be made without saving anything")]
    dry_run: bool,
    #[arg(long, value_name = "PATH", help = "Config file (default: ./redcat.toml)")]
    config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "N",
        help = "Consecutive misses before a category is treated as template-driven"
    )]
    threshold: Option<usize>,
    #[arg(
        long = "category",
        value_name = "NAME",
        help = "Only process this wanted category (repeatable)"
    )]
    categories: Vec<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Append log output to this file (default: ./remove_red_categories.log)"
    )]
    log_file: Option<PathBuf>,
    #[arg(long, help = "Print the final report as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config_path = match &cli.config {
        Some(path) if !path.exists() => bail!("config file not found: {}", path.display()),
        Some(path) => path.clone(),
        None => PathBuf::from(DEFAULT_CONFIG_FILENAME),
    };
    let file_config = load_config(&config_path)?;
    let run_config = RunConfig::resolve(
        &file_config,
        &CliOverrides {
            dry_run: cli.dry_run,
            threshold: cli.threshold,
            log_file: cli.log_file.clone(),
            only_categories: cli.categories.clone(),
        },
    )?;
    init_logging(run_config.log_file.as_deref())?;

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Stop requested; finishing the current page");
        handler_token.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let report = run(&run_config, &cancel)?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("red category cleanup");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("categories_total: {}", report.categories_total);
    println!("categories_cleaned: {}", report.categories_cleaned);
    println!("categories_no_action: {}", report.categories_no_action);
    println!(
        "categories_template_skipped: {}",
        report.categories_template_skipped
    );
    println!("categories_errored: {}", report.categories_errored);
    println!("edits: {}", report.edits);
    println!("pages_checked: {}", report.pages_checked);
    println!("pages_skipped_namespace: {}", report.pages_skipped_namespace);
    println!("page_errors: {}", report.page_errors);
    println!("save_failures: {}", report.save_failures);
    println!("interrupted: {}", format_flag(report.interrupted));
    println!("request_count: {}", report.request_count);

    let flagged = report
        .categories
        .iter()
        .filter(|category| category.status != CategoryStatus::Done)
        .collect::<Vec<_>>();
    if !flagged.is_empty() {
        println!("skipped:");
        for category in flagged {
            match &category.detail {
                Some(detail) => println!(
                    "  - [{}] {} ({detail})",
                    category.status.as_str(),
                    category.name
                ),
                None => println!("  - [{}] {}", category.status.as_str(), category.name),
            }
        }
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
