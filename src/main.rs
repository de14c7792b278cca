//! Graphlate - automatic prompt translation for node-graph workflows
//!
//! Command line entry point: translate workflow files on disk, or translate
//! and queue them on a running node-graph server.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use graphlate::classify::LanguageClassifier;
use graphlate::cli::{Args, Commands};
use graphlate::config::Config;
use graphlate::workflow::{Workflow, default_output_path};

const DEFAULT_CONFIG_FILE: &str = "graphlate.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env();

    match args.command {
        Commands::Config { output } => match output {
            Some(path) => {
                Config::default().save_to_file(&path)?;
                println!("Default configuration written to {}", path.display());
            }
            None => print!("{}", toml::to_string_pretty(&Config::default())?),
        },
        Commands::Check { text, target_lang } => {
            let target = target_lang.unwrap_or_else(|| config.translate.target_language.clone());
            let classifier = LanguageClassifier::with_whatlang(target);
            let direction = classifier.detect(&text);

            println!("needs translation: {}", classifier.needs_translation(&text));
            println!("direction:         {} -> {}", direction.from, direction.to);
        }
        Commands::Translate { input, input_dir, output, target_lang } => {
            if let Some(target) = target_lang {
                config.translate.target_language = target;
            }
            config.validate()?;
            let workflow = Workflow::new(config)?;

            if let Some(input_dir) = input_dir {
                info!("Translating workflows in: {}", input_dir.display());
                let summary = workflow.translate_directory(&input_dir, output.as_deref()).await?;
                println!(
                    "{} files ({} failed): {} texts translated, {} from cache, {} failed, {} skipped",
                    summary.files,
                    summary.failed_files,
                    summary.report.translated,
                    summary.report.cache_hits,
                    summary.report.failed,
                    summary.report.skipped
                );
            } else if let Some(input) = input {
                info!("Translating workflow: {}", input.display());
                let output = output.unwrap_or_else(|| default_output_path(&input));
                let report = workflow.translate_file(&input, &output).await?;
                println!(
                    "{}: {} texts translated, {} from cache, {} failed, {} skipped",
                    output.display(),
                    report.translated,
                    report.cache_hits,
                    report.failed,
                    report.skipped
                );
            }
        }
        Commands::Submit { input, endpoint, no_translate } => {
            if let Some(endpoint) = endpoint {
                config.host.endpoint = endpoint;
            }
            if no_translate {
                config.interceptor.auto_translate = false;
            }
            if config.interceptor.auto_translate {
                config.validate()?;
            }

            info!("Submitting workflow {} to {}", input.display(), config.host.endpoint);
            let workflow = Workflow::new(config)?;
            let reply = workflow.submit_file(&input).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".graphlate").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "graphlate.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("graphlate.log").display()
    );

    Ok(())
}
