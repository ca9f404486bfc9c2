#![forbid(unsafe_code)]

//! Shared models and the document store contract for the action log service.

pub mod api;
pub mod memory;
pub mod model;
pub mod store;

pub use memory::MemoryStore;
pub use model::{ActionDraft, ActionRecord, EpochMs, LogId, ValidationError};
pub use store::{
    ActionFilter, ChangeEvent, ChangeStream, DocumentStore, OperationType, Sort, StoreError,
};
