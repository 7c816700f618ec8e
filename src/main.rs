use std::collections::BTreeSet;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info};

mod cli;
mod config;
mod error;
mod llm;
mod pipeline;
mod prompt;
mod utils;

use cli::{CacheCommands, Cli, Commands};
use config::CONFIG;
use error::AppError;
use llm::gemini::GeminiClient;
use pipeline::cache::Cache;
use pipeline::component::ComponentKind;
use pipeline::workflow::{Orchestrator, SweepConfig};
use utils::logging::init_logging;

const DEFAULT_OUTFIT: &str = "outfits/shearling-black.png";

fn require_api_key() -> Result<(), AppError> {
    if CONFIG.gemini_api_key.trim().is_empty() {
        return Err(AppError::validation(
            "GEMINI_API_KEY is required for this command",
        ));
    }
    Ok(())
}

fn parse_kind(value: &str) -> Result<ComponentKind, AppError> {
    ComponentKind::parse(value).ok_or_else(|| {
        AppError::validation(format!(
            "unknown component kind '{value}' (expected outfit, style, hair-style, \
             hair-color, makeup, expression, or accessories)"
        ))
    })
}

async fn run_sweep_command(
    outfit: Option<String>,
    config: SweepConfig,
) -> Result<ExitCode, AppError> {
    require_api_key()?;

    let outfit = outfit.or_else(|| {
        if Path::new(DEFAULT_OUTFIT).exists() {
            info!("Using default outfit {DEFAULT_OUTFIT}");
            Some(DEFAULT_OUTFIT.to_string())
        } else {
            None
        }
    });
    let outfit = outfit.ok_or_else(|| {
        AppError::validation("an outfit reference is required (image, directory, or text)")
    })?;

    let oracle = Arc::new(GeminiClient::from_config());
    let orchestrator = Orchestrator::new(oracle, ".");

    // Ctrl-C stops new submissions and lets in-flight entries wind down.
    let cancel = orchestrator.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested, finishing in-flight work...");
            cancel.cancel();
        }
    });

    let mut timer = utils::timing::SweepTimer::start("sweep");
    let result = orchestrator
        .run_sweep(SweepConfig {
            outfit: Some(outfit),
            ..config
        })
        .await?;
    timer.complete(
        if result.cancelled { "cancelled" } else { "completed" },
        result.generated,
        result.failed,
    );

    if result.cancelled && result.generated == 0 && result.failed == 0 {
        println!("Sweep cancelled; nothing was generated.");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "\nSweep finished: {} subjects x {} outfits x {} styles x {} variations",
        result.counts.subjects, result.counts.outfits, result.counts.styles, result.counts.variations
    );
    println!(
        "Images generated: {} | failed: {}",
        result.generated, result.failed
    );
    if let Some(output_dir) = &result.output_dir {
        println!("Output directory: {}", output_dir.display());
    }

    if result.failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn run_analyze_command(
    kind: &str,
    image: &str,
    no_cache: bool,
) -> Result<ExitCode, AppError> {
    require_api_key()?;
    let kind = parse_kind(kind)?;

    let oracle = Arc::new(GeminiClient::from_config());
    let mut orchestrator = Orchestrator::new(oracle, ".");
    if no_cache {
        orchestrator.set_cache_enabled(false);
    }

    let record = orchestrator.analyze_reference(kind, image).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&record.structured)
            .unwrap_or_else(|_| record.structured.to_string())
    );
    println!("\nDescription: {}", record.description);
    Ok(ExitCode::SUCCESS)
}

fn unique_caches() -> Vec<(&'static str, Cache)> {
    let ttl = chrono::Duration::days(CONFIG.cache_ttl_days);
    let mut seen = BTreeSet::new();
    let mut caches = Vec::new();
    for kind in ComponentKind::ALL {
        let kind = kind.analysis_kind();
        if seen.insert(kind.cache_dir()) {
            caches.push((kind.cache_dir(), Cache::for_kind(Path::new("."), kind, ttl)));
        }
    }
    caches
}

fn run_cache_command(command: &CacheCommands) -> Result<ExitCode, AppError> {
    match command {
        CacheCommands::Stats => {
            for (dir, cache) in unique_caches() {
                let stats = cache.stats()?;
                if stats.total_entries == 0 {
                    continue;
                }
                println!(
                    "{dir}: {} entries, {} bytes, oldest {}, newest {}",
                    stats.total_entries,
                    stats.total_size_bytes,
                    stats
                        .oldest_entry
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    stats
                        .newest_entry
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        CacheCommands::Clear { kind } => {
            let ttl = chrono::Duration::days(CONFIG.cache_ttl_days);
            match kind {
                Some(kind) => {
                    let kind = parse_kind(kind)?;
                    Cache::for_kind(Path::new("."), kind, ttl).clear()?;
                    println!("Cleared {} cache", kind.analysis_kind().as_str());
                }
                None => {
                    for (dir, cache) in unique_caches() {
                        cache.clear()?;
                        println!("Cleared {dir}");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let cli = Cli::parse();
    let debug = matches!(&cli.command, Commands::Sweep { debug: true, .. });
    let _guards = init_logging(debug);

    let outcome = match cli.command {
        Commands::Sweep {
            outfit,
            style,
            hair_style,
            hair_color,
            makeup,
            expression,
            accessories,
            over_outfit,
            test,
            variations,
            send_original,
            no_confirm,
            debug,
        } => {
            run_sweep_command(
                outfit,
                SweepConfig {
                    outfit: None,
                    over_outfit,
                    style,
                    hair_style,
                    hair_color,
                    makeup,
                    expression,
                    accessories,
                    subjects: test,
                    variations,
                    send_original,
                    skip_confirmation: no_confirm,
                    debug,
                },
            )
            .await
        }
        Commands::Analyze {
            kind,
            image,
            no_cache,
        } => run_analyze_command(&kind, &image, no_cache).await,
        Commands::Cache { command } => run_cache_command(&command),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
