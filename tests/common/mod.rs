use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use spatialmind::config::{DatabaseConfig, PipelineConfig, PipelineSettings};
use spatialmind::database::{
    ColumnDescription, Database, DatabaseConnector, QueryResult, RelationDescription,
    RelationKind, SchemaDescription,
};
use spatialmind::error::{Result, SpatialMindError};
use spatialmind::providers::{CompletionResponse, Message, Provider, ProviderFactory};
use spatialmind::session::SessionRegistry;

/// Answer returned once a scripted provider runs out of responses
#[allow(dead_code)]
pub const DEFAULT_ANSWER: &str = "```sql\nSELECT name, population, geom FROM cities;\n```";

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn db_config(name: &str) -> DatabaseConfig {
    DatabaseConfig {
        db_type: "postgresql".to_string(),
        db_name: name.to_string(),
        db_user: "analyst".to_string(),
        db_password: "secret".to_string(),
        db_host: "localhost".to_string(),
        db_port: 5432,
    }
}

/// `cities(name text, population integer, geom geometry)`
#[allow(dead_code)]
pub fn cities_schema() -> SchemaDescription {
    let column = |name: &str, data_type: &str| ColumnDescription {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: true,
        default: None,
    };
    SchemaDescription::new(vec![RelationDescription {
        name: "cities".to_string(),
        kind: RelationKind::Table,
        columns: vec![
            column("name", "text"),
            column("population", "integer"),
            column("geom", "geometry"),
        ],
        sample: Some(vec![
            ("name".to_string(), Some("Metropolis".to_string())),
            ("population".to_string(), Some("1500000".to_string())),
            ("geom".to_string(), Some("POINT(10 20)".to_string())),
        ]),
    }])
}

/// In-memory database answering every query with one Metropolis row
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeDatabase {
    pub executed: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

#[async_trait]
impl Database for FakeDatabase {
    async fn introspect_schema(&self) -> Result<SchemaDescription> {
        Ok(cities_schema())
    }

    async fn execute(&self, sql: &str) -> QueryResult {
        if self.closed.load(Ordering::SeqCst) {
            return QueryResult::failure("connection closed");
        }
        self.executed.lock().unwrap().push(sql.to_string());

        if sql.contains("missing_table") {
            return QueryResult::failure("relation \"missing_table\" does not exist");
        }
        if sql.contains("WHERE false") {
            return QueryResult::success(
                vec!["name".to_string(), "geom".to_string()],
                Vec::new(),
            )
            .unwrap_or_else(|e| QueryResult::failure(e.to_string()));
        }
        QueryResult::success(
            vec![
                "name".to_string(),
                "population".to_string(),
                "geom".to_string(),
            ],
            vec![vec![
                Some("Metropolis".to_string()),
                Some("1500000".to_string()),
                Some("POINT(10 20)".to_string()),
            ]],
        )
        .unwrap_or_else(|e| QueryResult::failure(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn target(&self) -> String {
        "fake://analyst@localhost/gis".to_string()
    }
}

/// Connector handing out [`FakeDatabase`] handles
///
/// The host `unreachable` fails with a connection error.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeConnector {
    pub connects: AtomicUsize,
    pub databases: Mutex<Vec<Arc<FakeDatabase>>>,
}

#[async_trait]
impl DatabaseConnector for FakeConnector {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
        config.validate()?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        if config.db_host == "unreachable" {
            return Err(SpatialMindError::Connection(format!(
                "could not connect to {}",
                config.redacted()
            ))
            .into());
        }
        let database = Arc::new(FakeDatabase::default());
        self.databases.lock().unwrap().push(Arc::clone(&database));
        Ok(database as Arc<dyn Database>)
    }
}

/// Provider replaying canned responses and recording every request
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<Vec<Message>>>,
}

#[allow(dead_code)]
impl ScriptedProvider {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, messages: &[Message]) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| DEFAULT_ANSWER.to_string());
        Ok(CompletionResponse::new(next))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> String {
        "scripted-1".to_string()
    }
}

/// Factory returning the same scripted provider for every session
#[allow(dead_code)]
pub struct ScriptedFactory {
    pub provider: Arc<ScriptedProvider>,
}

impl ProviderFactory for ScriptedFactory {
    fn create(&self, _pipeline: &PipelineConfig) -> Result<Arc<dyn Provider>> {
        Ok(Arc::clone(&self.provider) as Arc<dyn Provider>)
    }
}

/// Registry wired to fakes; returns the pieces tests inspect
#[allow(dead_code)]
pub fn fake_registry(
    provider: ScriptedProvider,
) -> (Arc<SessionRegistry>, Arc<FakeConnector>, Arc<ScriptedProvider>) {
    let connector = Arc::new(FakeConnector::default());
    let provider = Arc::new(provider);
    let registry = SessionRegistry::new(
        Arc::clone(&connector) as Arc<dyn DatabaseConnector>,
        Arc::new(ScriptedFactory {
            provider: Arc::clone(&provider),
        }),
        PipelineSettings::default(),
    );
    (Arc::new(registry), connector, provider)
}
