pub mod audit;
pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod numbering;
pub mod query;
pub mod record;
pub mod registry;
pub mod resource;
pub mod service;
pub mod side_effect;
pub mod store;
pub mod types;
pub mod utils;

pub use builder::{NewRecord, Payload};
pub use config::EngineConfig;
pub use error::{Result, WorkflowError};
pub use query::{FilterCriterion, FilterQuery};
pub use record::{LineItem, Record};
pub use resource::{Classification, LinkedResource};
pub use service::DocumentService;
pub use types::{Actor, DocumentType, FieldValue, RecordId, Role};
