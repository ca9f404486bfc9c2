#![forbid(unsafe_code)]

//! Action log daemon: buffers producer actions, persists them to a document
//! store and serves snapshot lookups over HTTP.

pub mod buffer;
pub mod config;
pub mod db;
pub mod http;
pub mod log_id;
pub mod queries;
pub mod supervisor;
pub mod task_cache;

pub use buffer::SubmitError;
pub use config::Cli;
pub use db::SurrealStore;
pub use queries::LookupError;
pub use supervisor::{ConnectionState, Status, Supervisor, SupervisorConfig};
