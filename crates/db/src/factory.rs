use std::sync::Arc;

use orchestrator_core::config::{AppConfig, Backend};

use crate::error::RepositoryError;
use crate::postgres::PostgresStateStore;
use crate::sqlite::SqliteStateStore;
use crate::traits::StateStore;

/// Selects and connects the configured backend, per spec.md §4.1 /
/// SPEC_FULL.md §4.1's `create_state_store` factory.
pub async fn create_state_store(config: &AppConfig) -> Result<Arc<dyn StateStore>, RepositoryError> {
    match config.backend {
        Backend::Embedded => {
            let store =
                SqliteStateStore::connect(&config.database.path, config.database.max_connections)
                    .await?;
            Ok(Arc::new(store))
        }
        Backend::Networked => {
            let dsn = config.database.dsn.as_deref().unwrap_or_default();
            let store = PostgresStateStore::connect(dsn, config.database.max_connections).await?;
            Ok(Arc::new(store))
        }
    }
}
