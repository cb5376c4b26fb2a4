//! Casefile Core Types and Traits
//!
//! This crate provides the fundamental types and traits shared by every
//! Casefile crate:
//! - Core error taxonomy
//! - AI service identifiers and the invocation trait
//! - Document store abstraction with an in-memory implementation
//! - Injectable clock
//! - Lenient JSON parsing of model replies

pub mod clock;
pub mod document_store;
pub mod error;
pub mod invoker;
pub mod json;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use document_store::{Document, DocumentStore, Filter, MemoryDocumentStore, Query, Sort, Update};
pub use error::{Error, RateLimitCeiling, Result};
pub use invoker::{AiInvoker, Invocation, ServiceModels};
pub use json::parse_model_json;
pub use service::ServiceKind;
