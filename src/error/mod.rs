mod app;
mod config;
mod definition;
mod distributed;
mod persistence;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use definition::DefinitionError;
pub use distributed::DistributedError;
pub use persistence::PersistenceError;
pub use validation::ValidationError;
