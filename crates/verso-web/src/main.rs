mod auth;
mod error;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use verso_core::accounts::AccountService;
use verso_core::catalog::PoemCatalog;
use verso_core::config::VersoConfig;
use verso_core::conversation::{ConversationManager, ExchangeSettings};
use verso_core::llm::LlmService;
use verso_core::storage::{self, SqliteStorage};

pub struct AppState {
    pub storage: SqliteStorage,
    pub conversations: ConversationManager<LlmService>,
    pub accounts: AccountService,
    pub catalog: PoemCatalog,
    pub config: VersoConfig,
}

impl AppState {
    pub fn new(config: VersoConfig, storage: SqliteStorage, accounts: AccountService) -> Result<Self> {
        let llm = LlmService::from_config(&config.llm)
            .with_context(|| format!("cannot start model provider '{}'", config.llm.provider))?;
        let conversations =
            ConversationManager::new(storage.clone(), llm, ExchangeSettings::from_config(&config));
        Ok(Self {
            catalog: PoemCatalog::new(storage.clone()),
            storage,
            conversations,
            accounts,
            config,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("verso_web=info,verso_core=info,tower_http=info"));
    let json = std::env::var("VERSO_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cwd = std::env::current_dir().ok();
    let config = VersoConfig::load(cwd.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("falling back to default config: {e}");
        VersoConfig::default_config()
    });

    let storage = storage::open_storage(&config).context("cannot open database")?;
    let accounts = AccountService::new(storage.clone());
    let state = Arc::new(AppState::new(config.clone(), storage, accounts)?);

    let app = routes::router()
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.web.host, config.web.port);
    tracing::info!(provider = %config.llm.provider, model = %config.llm.model, "verso-web listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
