//! SpatialMind - natural-language spatial SQL over PostGIS
//!
#![doc = "SpatialMind - natural-language spatial SQL over PostGIS"]
#![doc = "Main entry point for the SpatialMind application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spatialmind::cli::{Cli, Commands};
use spatialmind::commands;
use spatialmind::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    init_tracing(cli.verbose, config.logging.json);

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => {
            commands::serve::run_serve(config).await?;
            Ok(())
        }
        Commands::Ask {
            db,
            pipeline,
            model,
            image,
            execute,
            geojson,
            question,
        } => {
            tracing::info!("Answering a single question");
            if let Some(m) = &model {
                tracing::debug!("Using model override: {}", m);
            }
            if let Some(path) = &image {
                tracing::debug!("Attaching image: {}", path.display());
            }

            let options = commands::ask::AskOptions {
                database: db.to_config(),
                pipeline,
                model,
                image,
                execute,
                geojson,
                question: question.join(" "),
            };
            commands::ask::run_ask(config, options).await?;
            Ok(())
        }
        Commands::Chat {
            db,
            pipeline,
            model,
        } => {
            if let Some(m) = &model {
                tracing::debug!("Using model override: {}", m);
            }
            commands::chat::run_chat(config, db.to_config(), pipeline, model).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over `--verbose`. JSON output is selected by
/// `logging.json` in the config or `SPATIALMIND_LOG_JSON`.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "spatialmind=debug"
    } else {
        "spatialmind=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
