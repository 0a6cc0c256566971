//! SpatialMind - natural-language spatial SQL over PostGIS
//!
//! This library turns questions about a geographic database into PostGIS
//! queries, runs them, and decodes geometry columns into renderable layers.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Registry of live sessions keyed by caller-supplied id
//! - `pipeline`: Two-stage rephrase/answer flow and conversation history
//! - `providers`: Model backends (Gemini, Ollama)
//! - `database`: PostgreSQL connections, pooling, schema introspection
//! - `extract`: SQL extraction from model output
//! - `geometry`: WKB/WKT decoding and result classification
//! - `server`: HTTP API over the session registry
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use spatialmind::{commands, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let registry = commands::build_registry(&config);
//!     spatialmind::server::serve(&config, registry).await
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod image;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use config::{Config, DatabaseConfig, PipelineConfig};
pub use error::{Result, SpatialMindError};
pub use extract::{extract_sql, ExtractedQuery};
pub use geometry::{classify, ResultLayer};
pub use pipeline::{AskOutcome, Pipeline};
pub use session::{SessionRegistry, SessionRequest, SessionResponse};
