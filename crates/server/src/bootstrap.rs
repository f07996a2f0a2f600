use std::sync::Arc;

use axum::extract::FromRef;
use orchestrator_core::config::AppConfig;
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;
use crate::store::Store;
use crate::templates::TemplateRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Store>,
    pub templates: Arc<TemplateRegistry>,
}

impl FromRef<AppState> for AppState {
    fn from_ref(state: &AppState) -> Self {
        state.clone()
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("state store error: {0}")]
    Store(#[from] orchestrator_db::RepositoryError),
}

/// Connects the configured State Store backend and hydrates the in-memory
/// working set from it, per spec.md §4.1's `load_state` contract.
pub async fn bootstrap(config: AppConfig) -> Result<AppState, BootstrapError> {
    let config = Arc::new(config);

    let backend = orchestrator_db::create_state_store(&config).await?;
    info!(
        event_name = "system.bootstrap.store_connected",
        backend = ?config.backend,
        "state store connection established"
    );

    let store = Arc::new(Store::load(backend, Arc::new(TracingAuditSink)).await?);
    info!(event_name = "system.bootstrap.state_loaded", "in-memory working set hydrated");

    let templates = Arc::new(TemplateRegistry::default());

    Ok(AppState { config, store, templates })
}

#[cfg(test)]
mod tests {
    use orchestrator_core::config::{AppConfig, Backend, ConfigOverrides, LoadOptions};

    use super::bootstrap;

    #[tokio::test]
    async fn bootstrap_hydrates_empty_state_against_an_in_memory_sqlite_db() {
        let config = AppConfig::load(LoadOptions {
            dev_mode: true,
            overrides: ConfigOverrides {
                backend: Some(Backend::Embedded),
                database_path: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("config should load with dev_mode overrides");

        let app = bootstrap(config).await.expect("bootstrap should succeed against a fresh sqlite db");
        assert!(app.templates.contains("meeting_summary"));
    }
}
