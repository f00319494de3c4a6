//! crates/notenest_core/src/fanout.rs
//!
//! Paginated fan-out for `in` queries. Stores cap the number of values one `in`
//! filter may carry, so a lookup over many ids is split into chunks and the chunk
//! queries run concurrently.

use futures::future::try_join_all;
use serde_json::Value;
use tracing::debug;

use crate::ports::{DocumentStore, PortResult};
use crate::store::{Document, Query};

/// The chunk size to use against `store`: the configured size, never above what the
/// store accepts, never zero.
pub fn chunk_size(store: &dyn DocumentStore, configured: usize) -> usize {
    configured.min(store.in_query_limit()).max(1)
}

fn chunk_queries(collection: &str, field: &str, values: &[Value], chunk: usize) -> Vec<Query> {
    values
        .chunks(chunk.max(1))
        .map(|batch| Query::new(collection).is_in(field, batch.to_vec()))
        .collect()
}

/// Counts documents in `collection` whose `field` is one of `values`.
pub async fn count_in(
    store: &dyn DocumentStore,
    collection: &str,
    field: &str,
    values: &[Value],
    chunk: usize,
) -> PortResult<usize> {
    if values.is_empty() {
        return Ok(0);
    }
    let queries = chunk_queries(collection, field, values, chunk);
    debug!(collection, field, chunks = queries.len(), "Fan-out count");
    let counts = try_join_all(queries.iter().map(|q| store.count(q))).await?;
    Ok(counts.into_iter().sum())
}

/// Fetches documents in `collection` whose `field` is one of `values`.
pub async fn query_in(
    store: &dyn DocumentStore,
    collection: &str,
    field: &str,
    values: &[Value],
    chunk: usize,
) -> PortResult<Vec<Document>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let queries = chunk_queries(collection, field, values, chunk);
    debug!(collection, field, chunks = queries.len(), "Fan-out query");
    let pages = try_join_all(queries.iter().map(|q| store.query(q))).await?;
    Ok(pages.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn counts_across_chunks_within_store_limit() {
        let store = MemoryStore::with_in_query_limit(3);
        for i in 0..8 {
            store
                .set(
                    "reviews",
                    &format!("r{}", i),
                    json!({ "noteId": format!("n{}", i) }).as_object().cloned().unwrap(),
                )
                .await
                .unwrap();
        }
        let ids: Vec<Value> = (0..8).map(|i| json!(format!("n{}", i))).collect();
        let chunk = chunk_size(&store, 10);
        assert_eq!(chunk, 3);
        assert_eq!(count_in(&store, "reviews", "noteId", &ids, chunk).await.unwrap(), 8);
        assert_eq!(
            query_in(&store, "reviews", "noteId", &ids[..4], chunk)
                .await
                .unwrap()
                .len(),
            4
        );
    }

    #[tokio::test]
    async fn empty_id_set_issues_no_query() {
        let store = MemoryStore::new();
        assert_eq!(count_in(&store, "reviews", "noteId", &[], 10).await.unwrap(), 0);
    }
}
