pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, SchedulerConfig};
pub use error::{SchedulerError, TransportError};
pub use types::{DedupeKey, QueryKind, SubjectKey};
