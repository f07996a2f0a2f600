pub mod error;
pub mod factory;
pub mod postgres;
pub mod sqlite;
pub mod traits;

pub use error::RepositoryError;
pub use factory::create_state_store;
pub use postgres::PostgresStateStore;
pub use sqlite::SqliteStateStore;
pub use traits::{
    ApprovalActionRepository, ApprovalRepository, EventRepository, IdempotencyRepository,
    LoadedState, StateStore, TaskRepository,
};
