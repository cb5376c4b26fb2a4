//! Document store trait
//!
//! The `DocumentStore` trait abstracts the persistence layer as a set of
//! named collections of JSON documents. Implementations:
//! - `MemoryDocumentStore`: process-local, used by tests and `storage: memory`
//! - `SqliteDocumentStore` (casefile-store-sqlite): durable single-node storage
//!
//! Documents are JSON objects with a string `id`. Inserts are append-only;
//! the only mutation is `update` with `$set`/`$push` style semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

mod memory;

pub use memory::MemoryDocumentStore;

pub type Document = serde_json::Value;

/// One predicate over a top-level document field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field is a string equal to `value`
    Eq { field: String, value: String },
    /// Field is an RFC 3339 timestamp at or after `at`
    Since { field: String, at: DateTime<Utc> },
}

/// Conjunction of conditions. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn since(mut self, field: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.conditions.push(Condition::Since {
            field: field.into(),
            at,
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Reject field names that are not plain identifiers
    pub fn validate(&self) -> Result<()> {
        for condition in &self.conditions {
            match condition {
                Condition::Eq { field, .. } | Condition::Since { field, .. } => {
                    validate_field(field)?
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq { field, value } => {
                document.get(field).and_then(|v| v.as_str()) == Some(value.as_str())
            }
            Condition::Since { field, at } => {
                timestamp_field(document, field).is_some_and(|ts| ts >= *at)
            }
        })
    }
}

/// Ordering on a timestamp field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn newest_first(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    pub fn oldest_first(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }
}

/// Filter plus optional ordering and limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: None,
            limit: None,
        }
    }

    /// Every document in the collection
    pub fn all() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        if let Some(sort) = &self.sort {
            validate_field(&sort.field)?;
        }
        Ok(())
    }
}

/// Partial update applied to a single document by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Vec<(String, Document)>,
    push: Vec<(String, Document)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace (or create) a top-level field
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Document>) -> Self {
        self.set.push((field.into(), value.into()));
        self
    }

    /// Append to a top-level array field, creating it when missing
    pub fn push(mut self, field: impl Into<String>, value: impl Into<Document>) -> Self {
        self.push.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.push.is_empty()
    }

    /// Apply to a document in place
    pub fn apply(&self, document: &mut Document) -> Result<()> {
        let object = document
            .as_object_mut()
            .ok_or_else(|| Error::Store("Document is not a JSON object".to_string()))?;

        for (field, value) in &self.set {
            validate_field(field)?;
            if field == "id" {
                return Err(Error::InvalidRequest("Document id cannot be changed".to_string()));
            }
            object.insert(field.clone(), value.clone());
        }

        for (field, value) in &self.push {
            validate_field(field)?;
            let slot = object
                .entry(field.clone())
                .or_insert_with(|| Document::Array(Vec::new()));
            match slot.as_array_mut() {
                Some(items) => items.push(value.clone()),
                None => {
                    return Err(Error::Store(format!(
                        "Cannot push to non-array field '{}'",
                        field
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Document store trait
///
/// All operations are async and must not block the runtime. Implementations
/// must make each single-document operation atomic; no multi-document
/// transactions are required.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append a document to a collection
    ///
    /// # Errors
    /// - `Error::InvalidRequest` if the document has no string `id`
    /// - `Error::Store` if a document with the same id already exists
    async fn insert(&self, collection: &str, document: Document) -> Result<()>;

    /// Find documents matching a query
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    /// Count documents matching a filter
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Apply an update to the document with the given id
    ///
    /// Returns `false` if no such document exists.
    async fn update(&self, collection: &str, id: &str, update: &Update) -> Result<bool>;

    /// Get a single document by id
    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let query = Query::new(Filter::new().eq("id", id)).limit(1);
        Ok(self.find(collection, &query).await?.into_iter().next())
    }
}

impl dyn DocumentStore {
    /// Serialize and insert a typed value
    pub async fn insert_as<T: Serialize + Sync>(&self, collection: &str, value: &T) -> Result<()> {
        self.insert(collection, serde_json::to_value(value)?).await
    }

    /// Find and deserialize documents
    pub async fn find_as<T: DeserializeOwned>(&self, collection: &str, query: &Query) -> Result<Vec<T>> {
        self.find(collection, query)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Error::from))
            .collect()
    }

    /// Get and deserialize a single document by id
    pub async fn find_by_id_as<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        match self.find_by_id(collection, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }
}

/// Extract the string id of a document
pub fn document_id(document: &Document) -> Result<&str> {
    document
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidRequest("Document must have a string 'id' field".to_string()))
}

/// Field names are interpolated into query paths by some backends, so only
/// plain identifiers are accepted.
pub fn validate_field(field: &str) -> Result<()> {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!("Invalid field name: {:?}", field)))
    }
}

/// Read a top-level RFC 3339 timestamp field
pub fn timestamp_field(document: &Document, field: &str) -> Option<DateTime<Utc>> {
    document
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
