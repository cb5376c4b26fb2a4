//! In-memory document store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Document, DocumentStore, Filter, Query, Update, document_id, timestamp_field};
use crate::{Error, Result};

/// Process-local document store.
///
/// Contents are lost on restart. Each operation holds the lock for its whole
/// duration, so single-document operations are atomic.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, collection: &str, document: Document) -> Result<()> {
        let id = document_id(&document)?.to_string();
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let docs = collections.entry(collection.to_string()).or_default();

        if docs
            .iter()
            .any(|doc| doc.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
        {
            return Err(Error::Store(format!(
                "Duplicate document id '{}' in collection '{}'",
                id, collection
            )));
        }

        docs.push(document);
        Ok(())
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        query.validate()?;
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut matched: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| query.filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(collections);

        if let Some(sort) = &query.sort {
            // Stable sort keeps insertion order for equal timestamps
            matched.sort_by(|a, b| {
                let ordering = timestamp_field(a, &sort.field).cmp(&timestamp_field(b, &sort.field));
                if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        filter.validate()?;
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections
            .get(collection)
            .map_or(0, |docs| docs.iter().filter(|doc| filter.matches(doc)).count()) as u64)
    }

    async fn update(&self, collection: &str, id: &str, update: &Update) -> Result<bool> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(document) = collections.get_mut(collection).and_then(|docs| {
            docs.iter_mut()
                .find(|doc| doc.get("id").and_then(|v| v.as_str()) == Some(id))
        }) else {
            return Ok(false);
        };

        // Apply to a copy so a failed update leaves the stored document untouched
        let mut updated = document.clone();
        update.apply(&mut updated)?;
        *document = updated;
        Ok(true)
    }
}
