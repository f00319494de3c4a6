//! crates/notenest_core/src/memory.rs
//!
//! In-memory `DocumentStore`: collections of versioned JSON documents behind a
//! `tokio::sync::RwLock`. Batches are applied to a staged copy and swapped in only
//! if every operation succeeds. Data is lost when the store is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ports::{DocumentStore, PortError, PortResult};
use crate::store::{Document, Fields, Patch, Query, WriteBatch, WriteOp};

#[derive(Debug, Clone)]
struct Stored {
    version: u64,
    fields: Fields,
}

type Collections = HashMap<String, BTreeMap<String, Stored>>;

#[derive(Debug, Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<Collections>>,
    in_query_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store with the common `in` limit of 10 values.
    pub fn new() -> Self {
        Self::with_in_query_limit(10)
    }

    pub fn with_in_query_limit(limit: usize) -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            in_query_limit: limit.max(1),
        }
    }

    /// Number of documents in a collection.
    pub async fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

fn to_document(id: &str, stored: &Stored) -> Document {
    Document {
        id: id.to_string(),
        version: stored.version,
        fields: stored.fields.clone(),
    }
}

fn apply_update(
    collections: &mut Collections,
    collection: &str,
    id: &str,
    patch: &Patch,
    expected_version: Option<u64>,
) -> PortResult<Document> {
    let stored = collections
        .get_mut(collection)
        .and_then(|c| c.get_mut(id))
        .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?;
    if let Some(expected) = expected_version {
        if stored.version != expected {
            return Err(PortError::Conflict(format!(
                "{}/{} is at version {}, expected {}",
                collection, id, stored.version, expected
            )));
        }
    }
    patch.apply(&mut stored.fields);
    stored.version += 1;
    Ok(to_document(id, stored))
}

fn apply_op(collections: &mut Collections, op: &WriteOp) -> PortResult<()> {
    match op {
        WriteOp::Create { collection, id, fields } => {
            let docs = collections.entry(collection.clone()).or_default();
            if docs.contains_key(id) {
                return Err(PortError::Conflict(format!(
                    "{}/{} already exists",
                    collection, id
                )));
            }
            docs.insert(
                id.clone(),
                Stored {
                    version: 1,
                    fields: fields.clone(),
                },
            );
        }
        WriteOp::Set { collection, id, fields } => {
            let docs = collections.entry(collection.clone()).or_default();
            let version = docs.get(id).map(|s| s.version + 1).unwrap_or(1);
            docs.insert(
                id.clone(),
                Stored {
                    version,
                    fields: fields.clone(),
                },
            );
        }
        WriteOp::Update {
            collection,
            id,
            patch,
            expected_version,
        } => {
            apply_update(collections, collection, id, patch, *expected_version)?;
        }
        WriteOp::Delete {
            collection,
            id,
            expected_version,
        } => {
            let docs = collections.get_mut(collection);
            if let Some(expected) = expected_version {
                let stored = docs
                    .as_ref()
                    .and_then(|c| c.get(id))
                    .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?;
                if stored.version != *expected {
                    return Err(PortError::Conflict(format!(
                        "{}/{} is at version {}, expected {}",
                        collection, id, stored.version, expected
                    )));
                }
            }
            if let Some(docs) = docs {
                docs.remove(id);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|stored| to_document(id, stored)))
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> PortResult<()> {
        let mut collections = self.collections.write().await;
        apply_op(
            &mut collections,
            &WriteOp::Set {
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
            },
        )
    }

    async fn add(&self, collection: &str, fields: Fields) -> PortResult<String> {
        let id = Uuid::new_v4().to_string();
        let mut collections = self.collections.write().await;
        apply_op(
            &mut collections,
            &WriteOp::Create {
                collection: collection.to_string(),
                id: id.clone(),
                fields,
            },
        )?;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document> {
        let mut collections = self.collections.write().await;
        apply_update(&mut collections, collection, id, &patch, None)
    }

    async fn delete(&self, collection: &str, id: &str) -> PortResult<()> {
        let mut collections = self.collections.write().await;
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>> {
        if query.max_in_len() > self.in_query_limit {
            return Err(PortError::InvalidQuery(format!(
                "'in' filter carries {} values, the limit is {}",
                query.max_in_len(),
                self.in_query_limit
            )));
        }
        let collections = self.collections.read().await;
        let mut documents: Vec<Document> = collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, stored)| query.matches(&stored.fields))
                    .map(|(id, stored)| to_document(id, stored))
                    .collect()
            })
            .unwrap_or_default();
        query.sort(&mut documents);
        if let Some(limit) = query.limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }

    async fn commit(&self, batch: WriteBatch) -> PortResult<()> {
        let mut collections = self.collections.write().await;
        // Only the collections the batch touches are staged.
        let mut staged: Collections = HashMap::new();
        for op in batch.ops() {
            if !staged.contains_key(op.collection()) {
                let current = collections.get(op.collection()).cloned().unwrap_or_default();
                staged.insert(op.collection().to_string(), current);
            }
        }
        for op in batch.ops() {
            apply_op(&mut staged, op)?;
        }
        collections.extend(staged);
        Ok(())
    }

    fn in_query_limit(&self) -> usize {
        self.in_query_limit
    }
}
