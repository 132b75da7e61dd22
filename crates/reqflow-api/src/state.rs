//! Application state wiring all services together.
//!
//! Services are generic over repository traits; AppState pins them to the
//! SQLite implementations and the reqwest client.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use reqflow_core::delta::assertion::AssertionDeltaService;
use reqflow_core::example::ExampleService;
use reqflow_core::flow::service::FlowService;
use reqflow_core::http::HttpClient;
use reqflow_core::overlay::OverlayService;
use reqflow_infra::config::{load_global_config, resolve_data_dir};
use reqflow_infra::http::ReqwestHttpClient;
use reqflow_infra::sqlite::flow::SqliteFlowRepository;
use reqflow_infra::sqlite::node_execution::SqliteNodeExecutionRepository;
use reqflow_infra::sqlite::overlay::SqliteOverlayRepository;
use reqflow_infra::sqlite::pool::DatabasePool;
use reqflow_infra::sqlite::request::SqliteRequestRepository;
use reqflow_infra::sqlite::workspace::SqliteWorkspaceRepository;
use reqflow_types::config::GlobalConfig;

pub type ConcreteFlowService = FlowService<
    SqliteFlowRepository,
    SqliteRequestRepository,
    SqliteWorkspaceRepository,
    SqliteNodeExecutionRepository,
>;

pub type ConcreteExampleService = ExampleService<SqliteRequestRepository, SqliteWorkspaceRepository>;

pub type ConcreteOverlayService = OverlayService<SqliteOverlayRepository, SqliteRequestRepository>;

pub type ConcreteAssertionService = AssertionDeltaService<SqliteRequestRepository>;

pub struct AppState {
    pub flow_service: Arc<ConcreteFlowService>,
    pub example_service: Arc<ConcreteExampleService>,
    pub overlay_service: Arc<ConcreteOverlayService>,
    pub assertion_service: Arc<ConcreteAssertionService>,
    pub config: GlobalConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Connect to the database under the data directory and wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_global_config(&data_dir).await;

        let db_url = format!("sqlite://{}?mode=rwc", data_dir.join("reqflow.db").display());
        let db_pool = DatabasePool::new(&db_url)
            .await
            .context("failed to open database")?;

        let client: Arc<dyn HttpClient> = Arc::new(
            ReqwestHttpClient::new(config.http_timeout_secs)
                .map_err(|e| anyhow::anyhow!("{e}"))?,
        );

        let flow_service = FlowService::new(
            SqliteFlowRepository::new(db_pool.clone()),
            SqliteRequestRepository::new(db_pool.clone()),
            SqliteWorkspaceRepository::new(db_pool.clone()),
            SqliteNodeExecutionRepository::new(db_pool.clone()),
            Arc::clone(&client),
            config.clone(),
        );
        let example_service = ExampleService::new(
            SqliteRequestRepository::new(db_pool.clone()),
            SqliteWorkspaceRepository::new(db_pool.clone()),
            client,
        );
        let overlay_service = OverlayService::new(
            SqliteOverlayRepository::new(db_pool.clone()),
            SqliteRequestRepository::new(db_pool.clone()),
        );
        let assertion_service = AssertionDeltaService::new(SqliteRequestRepository::new(db_pool));

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            flow_service: Arc::new(flow_service),
            example_service: Arc::new(example_service),
            overlay_service: Arc::new(overlay_service),
            assertion_service: Arc::new(assertion_service),
            config,
            data_dir,
        })
    }
}
