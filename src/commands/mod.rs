/*!
Command handlers for SpatialMind

This module contains the handlers behind the CLI subcommands:

- `serve`: run the HTTP API over a shared session registry
- `ask`: answer one question in a throwaway session
- `chat`: interactive session with special commands

The `ask` and `chat` handlers go through the same [`SessionRegistry`] the
HTTP API uses, so a CLI session behaves exactly like an API session.
*/

pub mod special_commands;

use crate::config::{Config, PipelineConfig};
use crate::database::{PoolRegistry, PostgresConnector, QueryResult};
use crate::error::Result;
use crate::geometry::ResultLayer;
use crate::providers::ConfiguredProviderFactory;
use crate::session::{SessionRegistry, SessionRequest, SessionResponse};
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use std::sync::Arc;

/// Placeholder printed for SQL NULL
const NULL_DISPLAY: &str = "NULL";

/// Widest value printed in a table cell
const MAX_CELL_WIDTH: usize = 60;

/// Build a session registry backed by PostgreSQL and the configured models
pub fn build_registry(config: &Config) -> Arc<SessionRegistry> {
    let pools = Arc::new(PoolRegistry::new(config.database.clone()));
    let connector = Arc::new(PostgresConnector::new(pools));
    let providers = Arc::new(ConfiguredProviderFactory::new(config.clone()));
    Arc::new(SessionRegistry::new(
        connector,
        providers,
        config.pipeline.clone(),
    ))
}

/// Render a query result as a terminal table
pub fn result_table(result: &QueryResult) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(Row::new(
        result
            .columns
            .iter()
            .map(|c| Cell::new(c).style_spec("b"))
            .collect(),
    ));

    for row in &result.rows {
        table.add_row(Row::new(
            row.iter()
                .map(|value| Cell::new(&display_value(value.as_deref())))
                .collect(),
        ));
    }

    table
}

fn display_value(value: Option<&str>) -> String {
    match value {
        None => NULL_DISPLAY.to_string(),
        Some(v) if v.chars().count() > MAX_CELL_WIDTH => {
            let head: String = v.chars().take(MAX_CELL_WIDTH - 3).collect();
            format!("{}...", head)
        }
        Some(v) => v.to_string(),
    }
}

/// Execute `sql` in a session and print the outcome
///
/// With `geojson` set, a feature layer is printed as a GeoJSON
/// FeatureCollection; otherwise the rows are shown as a table.
pub async fn run_and_print(
    registry: &SessionRegistry,
    session_id: &str,
    sql: &str,
    geojson: bool,
) -> Result<()> {
    let request = SessionRequest::Layer {
        sql: sql.to_string(),
    };
    let SessionResponse::Layer { result, layer } = registry.dispatch(session_id, request).await?
    else {
        return Ok(());
    };

    if !result.success {
        let message = result.error.as_deref().unwrap_or("query failed");
        println!("{}", format!("Query failed: {}", message).red());
        return Ok(());
    }

    match (&layer, geojson) {
        (ResultLayer::Features(collection), true) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&collection.to_geojson())?
            );
        }
        (_, true) => {
            println!(
                "{}",
                "Result has no decodable geometry; showing rows instead".yellow()
            );
            result_table(&result).printstd();
        }
        (_, false) => result_table(&result).printstd(),
    }

    print_layer_summary(&result, &layer);
    Ok(())
}

fn print_layer_summary(result: &QueryResult, layer: &ResultLayer) {
    let summary = match layer {
        ResultLayer::Features(collection) => format!(
            "{} rows, {} {} features ({} column, {})",
            result.row_count(),
            collection.features.len(),
            collection.geometry_type,
            collection.geometry_column,
            collection.encoding
        ),
        ResultLayer::AttributesOnly(_) => {
            format!("{} rows, no geometry column", result.row_count())
        }
        ResultLayer::Empty {
            geometry_column, ..
        } => format!(
            "{} rows, no valid geometries in column {}",
            result.row_count(),
            geometry_column
        ),
    };
    println!("{}", summary.dimmed());

    if layer.skipped() > 0 {
        println!(
            "{}",
            format!("Skipped {} rows with undecodable geometry", layer.skipped()).yellow()
        );
    }
}

pub mod serve {
    use super::*;

    /// Run the HTTP API until interrupted
    pub async fn run_serve(config: Config) -> Result<()> {
        tracing::info!(
            host = %config.server.host,
            port = config.server.port,
            "Starting SpatialMind API"
        );
        let registry = build_registry(&config);
        crate::server::serve(&config, registry).await
    }
}

pub mod ask {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::image::{load_image, ImageAttachment};
    use std::path::PathBuf;
    use uuid::Uuid;

    /// Options for a one-shot question
    #[derive(Debug, Clone)]
    pub struct AskOptions {
        pub database: DatabaseConfig,
        pub pipeline: String,
        pub model: Option<String>,
        pub image: Option<PathBuf>,
        pub execute: bool,
        pub geojson: bool,
        pub question: String,
    }

    /// Answer one question in a temporary session
    ///
    /// The session is always closed, including when the question fails.
    pub async fn run_ask(config: Config, options: AskOptions) -> Result<()> {
        let pipeline = options
            .pipeline
            .parse::<PipelineConfig>()?
            .with_model(options.model.clone());
        let image = options.image.as_deref().map(load_image).transpose()?;

        let registry = build_registry(&config);
        let session_id = format!("cli-{}", Uuid::new_v4());
        registry
            .initialize(&session_id, options.database.clone(), pipeline)
            .await?;

        let outcome = answer(&registry, &session_id, &options, image).await;

        if let Err(e) = registry.close(&session_id).await {
            tracing::warn!(session_id = %session_id, "Failed to close session: {:#}", e);
        }
        outcome
    }

    async fn answer(
        registry: &SessionRegistry,
        session_id: &str,
        options: &AskOptions,
        image: Option<ImageAttachment>,
    ) -> Result<()> {
        let outcome = registry.ask(session_id, &options.question, image).await?;

        println!("{}", format!("> {}", outcome.rephrased_question).dimmed());
        println!("{}", outcome.answer);

        let Some(sql) = outcome.sql else {
            println!("{}", "No SQL query found in the answer".yellow());
            return Ok(());
        };
        println!("\n{}\n{}", "Extracted SQL:".bold(), sql.as_str().green());

        if options.execute || options.geojson {
            println!();
            run_and_print(registry, session_id, sql.as_str(), options.geojson).await?;
        }
        Ok(())
    }
}

pub mod chat {
    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::image::{load_image, ImageAttachment};
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use uuid::Uuid;

    /// Mutable state of an interactive session
    #[derive(Debug, Default)]
    struct ChatState {
        current_sql: Option<String>,
        pending_image: Option<ImageAttachment>,
    }

    /// Start an interactive session
    pub async fn run_chat(
        config: Config,
        database: DatabaseConfig,
        pipeline: String,
        model: Option<String>,
    ) -> Result<()> {
        tracing::info!("Starting interactive session");

        let pipeline = pipeline.parse::<PipelineConfig>()?.with_model(model);
        let accepts_images = pipeline.capability.accepts_images();
        let tag = pipeline.tag();

        let registry = build_registry(&config);
        let session_id = format!("chat-{}", Uuid::new_v4());
        registry
            .initialize(&session_id, database.clone(), pipeline)
            .await?;

        print_welcome_banner(tag, &database.redacted());

        let result = repl(&registry, &session_id, accepts_images).await;

        if let Err(e) = registry.close(&session_id).await {
            tracing::warn!(session_id = %session_id, "Failed to close session: {:#}", e);
        }
        result
    }

    async fn repl(registry: &SessionRegistry, session_id: &str, accepts_images: bool) -> Result<()> {
        let mut rl = DefaultEditor::new()?;
        let mut state = ChatState::default();

        loop {
            let prompt = if state.pending_image.is_some() {
                format!("{} ", "[img] sql>".cyan())
            } else {
                format!("{} ", "sql>".cyan())
            };

            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed)?;

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}", e.to_string().red());
                            continue;
                        }
                    };

                    if command == SpecialCommand::Exit {
                        break;
                    }

                    if let Err(e) =
                        handle_line(registry, session_id, accepts_images, &mut state, command, trimmed)
                            .await
                    {
                        eprintln!("{}", format!("Error: {:#}", e).red());
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("^D");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    async fn handle_line(
        registry: &SessionRegistry,
        session_id: &str,
        accepts_images: bool,
        state: &mut ChatState,
        command: SpecialCommand,
        line: &str,
    ) -> Result<()> {
        match command {
            SpecialCommand::None => {
                let image = state.pending_image.take();
                let outcome = registry.ask(session_id, line, image).await?;
                println!("{}", format!("> {}", outcome.rephrased_question).dimmed());
                println!("{}\n", outcome.answer);
                match outcome.sql {
                    Some(sql) => {
                        state.current_sql = Some(sql.sql);
                        println!("{}", "Query ready; /run to execute it".green());
                    }
                    None => println!("{}", "No SQL query found in the answer".yellow()),
                }
            }
            SpecialCommand::Run => run_current(registry, session_id, state, false).await?,
            SpecialCommand::GeoJson => run_current(registry, session_id, state, true).await?,
            SpecialCommand::ShowSql => match &state.current_sql {
                Some(sql) => println!("{}", sql),
                None => println!("{}", "No current query".yellow()),
            },
            SpecialCommand::SetSql(sql) => {
                state.current_sql = Some(sql);
                println!("{}", "Current query replaced".green());
            }
            SpecialCommand::AttachImage(path) => {
                if !accepts_images {
                    println!(
                        "{}",
                        "This pipeline is text-only; start a *_vision session to attach images"
                            .yellow()
                    );
                    return Ok(());
                }
                let image = load_image(&path)?;
                println!(
                    "{}",
                    format!("Attached {} ({})", path.display(), image.mime_type).green()
                );
                state.pending_image = Some(image);
            }
            SpecialCommand::DetachImage => {
                state.pending_image = None;
                println!("Attachment dropped");
            }
            SpecialCommand::History => {
                let turns = registry.history(session_id).await?;
                if turns.is_empty() {
                    println!("{}", "No history yet".yellow());
                }
                for (i, turn) in turns.iter().enumerate() {
                    println!("{} {}", format!("[{}]", i + 1).cyan(), turn.question.bold());
                    println!("{}\n", turn.answer);
                }
            }
            SpecialCommand::ClearHistory => {
                registry.clear_history(session_id).await?;
                state.current_sql = None;
                println!("History cleared");
            }
            SpecialCommand::ShowStatus => {
                let info = registry
                    .sessions_info()
                    .await
                    .into_iter()
                    .find(|info| info.session_id == session_id);
                if let Some(info) = info {
                    println!("Pipeline: {}", info.pipeline.cyan());
                    println!("Model:    {}", info.model.cyan());
                    println!("Database: {}", info.database.cyan());
                    println!("Turns:    {}", info.turns);
                    println!(
                        "Started:  {}",
                        info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
            SpecialCommand::Help => print_help(),
            SpecialCommand::Exit => {}
        }
        Ok(())
    }

    async fn run_current(
        registry: &SessionRegistry,
        session_id: &str,
        state: &ChatState,
        geojson: bool,
    ) -> Result<()> {
        match state.current_sql.as_deref() {
            Some(sql) => run_and_print(registry, session_id, sql, geojson).await,
            None => {
                println!("{}", "No current query; ask a question or use /sql".yellow());
                Ok(())
            }
        }
    }

    fn print_welcome_banner(pipeline: &str, database: &str) {
        println!("{}", "SpatialMind interactive session".bold());
        println!("Pipeline: {}", pipeline.cyan());
        println!("Database: {}", database.cyan());
        println!("Type a question, /help for commands, or exit to quit.\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_value_null() {
        assert_eq!(display_value(None), "NULL");
    }

    #[test]
    fn test_display_value_truncates_long_values() {
        let long = "0101000020E6100000".repeat(10);
        let shown = display_value(Some(&long));
        assert_eq!(shown.chars().count(), MAX_CELL_WIDTH);
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn test_result_table_shape() {
        let result = QueryResult::success(
            vec!["name".to_string(), "population".to_string()],
            vec![
                vec![Some("Metropolis".to_string()), Some("1500000".to_string())],
                vec![Some("Gotham".to_string()), None],
            ],
        )
        .unwrap();

        let table = result_table(&result);
        assert_eq!(table.len(), 2);
        let rendered = table.to_string();
        assert!(rendered.contains("Metropolis"));
        assert!(rendered.contains("NULL"));
    }

    #[tokio::test]
    async fn test_build_registry_starts_empty() {
        let registry = build_registry(&Config::default());
        assert_eq!(registry.active_count().await, 0);
        assert!(registry.list_sessions().await.is_empty());
    }
}
