use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod automation;
mod config;
mod database;
mod error;
mod handlers;
mod settings;
mod store;
mod validation;


use automation::{RuleService, SegmentAssigner, WorkflowService};
use config::{Config, StoreBackend};
use settings::SettingsService;
use store::{AutomationStore, MemoryStore, PgStore};

pub struct AppState {
    pub store: Arc<dyn AutomationStore>,
    pub config: Config,
    /// Set when running on Postgres, for health reporting
    pub db_pool: Option<sqlx::PgPool>,
}

impl AppState {
    pub fn new(store: Arc<dyn AutomationStore>, config: Config) -> Self {
        Self {
            store,
            config,
            db_pool: None,
        }
    }

    pub fn workflows(&self) -> WorkflowService<dyn AutomationStore> {
        WorkflowService::new(self.store.clone(), self.config.automation.max_workflow_steps)
    }

    pub fn segments(&self) -> SegmentAssigner<dyn AutomationStore> {
        SegmentAssigner::new(
            self.store.clone(),
            self.config.automation.apply_rules_concurrency,
        )
    }

    pub fn rules(&self) -> RuleService<dyn AutomationStore> {
        RuleService::new(self.store.clone())
    }

    pub fn settings(&self) -> SettingsService<dyn AutomationStore> {
        SettingsService::new(self.store.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("leadflow_backend=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let app_state = match config.store_backend {
        StoreBackend::Postgres => {
            let db_pool = database::create_pool(&config.database_url).await?;
            database::migrate(&db_pool).await?;
            let store: Arc<dyn AutomationStore> = Arc::new(PgStore::new(db_pool.clone()));
            let mut state = AppState::new(store, config.clone());
            state.db_pool = Some(db_pool);
            state
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            AppState::new(Arc::new(MemoryStore::new()), config.clone())
        }
    };

    let app = handlers::router(Arc::new(app_state));

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
