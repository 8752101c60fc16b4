use crate::cli::args::{Cli, Commands};
use crate::error::Result;
use crate::fetch;
use crate::processors::{IngestOptions, Pipeline};
use crate::storage::{GenerationStore, SqliteStore};
use crate::utils::urls::{bulletin_url, catalog_url};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub async fn run(cli: Cli) -> Result<()> {
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("mosmix_processor=debug")),
            )
            .init();
    }

    match cli.command {
        Commands::Process {
            database,
            source,
            variant,
            catalog,
            skip_catalog,
            lenient_values,
        } => {
            let source = source.unwrap_or_else(|| bulletin_url(variant, Utc::now()));
            let catalog = if skip_catalog {
                None
            } else {
                Some(catalog.unwrap_or_else(catalog_url))
            };

            println!("Ingesting bulletin into {}", database.display());
            println!("Source: {}", source);

            let mut store = SqliteStore::open(&database)?;
            let pipeline = Pipeline::new()?;
            let report = pipeline
                .run(
                    &mut store,
                    &IngestOptions {
                        source,
                        catalog,
                        strict_values: !lenient_values,
                        silent: cli.quiet,
                    },
                )
                .await?;

            println!("\nGeneration {} is now active", report.generation.id);
            println!(
                "  {} places, {} readings, {} variables",
                report.places, report.readings, report.variables
            );
            if report.element_definitions > 0 {
                println!("  {} variable definitions", report.element_definitions);
            }
            println!(
                "  download {} ms, parse {} ms",
                report.download_duration.as_millis(),
                report.parse_duration.as_millis()
            );
            if report.wide_view_changed {
                println!("  wide view rebuilt for the new variable set");
            }
        }

        Commands::Check {
            variant,
            interval_secs,
            once,
        } => {
            let url = bulletin_url(variant, Utc::now());
            let client = reqwest::Client::new();

            if once {
                let result = fetch::probe(&client, &url).await?;
                print_availability(&url, &result);
                if !result.available {
                    std::process::exit(1);
                }
                return Ok(());
            }

            println!("Waiting for {}", url);
            // The done channel mirrors how callers embed the watcher; the
            // CLI holds the sender open and simply waits.
            let (_tx, mut rx) = mpsc::channel::<()>(1);
            if let Some(result) = fetch::watch(
                &client,
                &url,
                Duration::from_secs(interval_secs),
                &mut rx,
            )
            .await?
            {
                print_availability(&url, &result);
            }
        }

        Commands::Info { database } => {
            let store = SqliteStore::open(&database)?;

            let generations = store.list_generations()?;
            if generations.is_empty() {
                println!("No generations in {}", database.display());
                return Ok(());
            }
            for generation in &generations {
                println!(
                    "Generation {} ({}, created {})",
                    generation.id,
                    generation.state.as_str(),
                    generation.created_at.to_rfc3339()
                );
            }

            println!("\nPlaces:   {}", store.active_place_count()?);
            println!("Readings: {}", store.active_reading_count()?);

            if let Some(metadata) = store.active_run_metadata()? {
                println!("\nSource:   {}", metadata.source_url);
                println!("Issuer:   {}", metadata.issuer);
                println!("Product:  {}", metadata.product_id);
                println!("Process:  {}", metadata.generating_process);
                println!("Parser:   {}", metadata.parser);
                println!(
                    "Timing:   download {} ms, parse {} ms",
                    metadata.download_duration_ms, metadata.parse_duration_ms
                );
                println!(
                    "Variables ({}): {}",
                    metadata.available_variables.len(),
                    metadata.available_variables.join(", ")
                );
                if let (Some(first), Some(last)) =
                    (metadata.timesteps.first(), metadata.timesteps.last())
                {
                    println!(
                        "Timesteps ({}): {} .. {}",
                        metadata.timesteps.len(),
                        first.to_rfc3339(),
                        last.to_rfc3339()
                    );
                }
                for model in &metadata.referenced_models {
                    println!(
                        "Model:    {} @ {}",
                        model.name,
                        model.reference_time.to_rfc3339()
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_availability(url: &str, result: &fetch::Availability) {
    if result.available {
        println!("{} is available", url);
        if let Some(last_modified) = &result.last_modified {
            println!("  Last-Modified:  {}", last_modified);
        }
        if let Some(content_length) = result.content_length {
            println!("  Content-Length: {}", content_length);
        }
    } else {
        println!("{} is not available yet", url);
    }
}
