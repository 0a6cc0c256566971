//! Command-line interface definition for SpatialMind
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run the HTTP API, ask a one-shot question, or
//! hold an interactive session.

use crate::config::DatabaseConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// SpatialMind - natural-language spatial SQL over PostGIS
///
/// Ask questions about a geographic database, get back a PostGIS query
/// and, when the result carries geometry, a renderable feature layer.
#[derive(Parser, Debug, Clone)]
#[command(name = "spatialmind")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for SpatialMind
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Interface to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a single question and print the generated SQL
    Ask {
        #[command(flatten)]
        db: DbArgs,

        /// Pipeline: gemini_text, gemini_vision, ollama_text, ollama_vision
        #[arg(long, default_value = "ollama_text")]
        pipeline: String,

        /// Model override for the pipeline's backend
        #[arg(short, long)]
        model: Option<String>,

        /// Image to attach (vision pipelines only)
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Execute the extracted SQL and print the result
        #[arg(short, long)]
        execute: bool,

        /// Execute and print the result layer as GeoJSON
        #[arg(long)]
        geojson: bool,

        /// The question
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },

    /// Start an interactive session
    Chat {
        #[command(flatten)]
        db: DbArgs,

        /// Pipeline: gemini_text, gemini_vision, ollama_text, ollama_vision
        #[arg(long, default_value = "ollama_text")]
        pipeline: String,

        /// Model override for the pipeline's backend
        #[arg(short, long)]
        model: Option<String>,
    },
}

/// Database connection flags
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Database backend
    #[arg(long, default_value = "postgresql")]
    pub db_type: String,

    /// Database name
    #[arg(long)]
    pub db_name: String,

    /// Database user
    #[arg(long)]
    pub db_user: String,

    /// Database password
    #[arg(long, env = "SPATIALMIND_DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub db_password: String,

    /// Database host
    #[arg(long, default_value = "localhost")]
    pub db_host: String,

    /// Database port
    #[arg(long, default_value_t = 5432)]
    pub db_port: u16,
}

impl DbArgs {
    pub fn to_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            db_type: self.db_type.clone(),
            db_name: self.db_name.clone(),
            db_user: self.db_user.clone(),
            db_password: self.db_password.clone(),
            db_host: self.db_host.clone(),
            db_port: self.db_port,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            command: Commands::Serve {
                host: None,
                port: None,
            },
        }
    }
}
