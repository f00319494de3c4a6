//! services/backend/src/adapters/pg_store.rs
//!
//! The PostgreSQL adapter for the `DocumentStore` port. Each collection is a slice
//! of one `documents` table holding versioned JSONB bodies. Batches run inside a
//! single transaction; rows touched by an update are locked with `FOR UPDATE` so
//! increments and version checks are applied against the committed value.

use async_trait::async_trait;
use notenest_core::ports::{DocumentStore, PortError, PortResult};
use notenest_core::store::{Direction, Document, Fields, Filter, Patch, Query, WriteBatch, WriteOp};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    in_query_limit: usize,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, in_query_limit: usize) -> Self {
        Self {
            pool,
            in_query_limit: in_query_limit.max(1),
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    id: String,
    version: i64,
    data: Json<Fields>,
}

impl DocumentRecord {
    fn to_domain(self) -> Document {
        Document {
            id: self.id,
            version: self.version.max(0) as u64,
            fields: self.data.0,
        }
    }
}

fn db_error(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => PortError::Conflict(db.to_string()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// SQL Builders
//=========================================================================================

/// Appends the query's filters to a statement that already selects from `documents`.
fn push_where(qb: &mut QueryBuilder<'_, Postgres>, query: &Query) {
    qb.push(" WHERE collection = ");
    qb.push_bind(query.collection.clone());
    for filter in &query.filters {
        qb.push(" AND data -> ");
        qb.push_bind(filter.field().to_string());
        match filter {
            Filter::Eq(_, value) => {
                qb.push(" = ");
                qb.push_bind(Json(value.clone()));
            }
            Filter::In(_, values) => {
                // jsonb containment: the field value must be one of the array elements.
                qb.push(" <@ ");
                qb.push_bind(Json(serde_json::Value::Array(values.clone())));
            }
            Filter::Gte(_, value) => {
                qb.push(" >= ");
                qb.push_bind(Json(value.clone()));
            }
            Filter::Lt(_, value) => {
                qb.push(" < ");
                qb.push_bind(Json(value.clone()));
            }
        }
    }
}

fn select_statement(query: &Query) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT id, version, data FROM documents");
    push_where(&mut qb, query);
    if let Some(order) = &query.order_by {
        qb.push(" ORDER BY data -> ");
        qb.push_bind(order.field.clone());
        qb.push(match order.direction {
            Direction::Asc => " ASC NULLS FIRST",
            Direction::Desc => " DESC NULLS LAST",
        });
        qb.push(", id ASC");
    }
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
    }
    qb
}

fn count_statement(query: &Query) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM documents");
    push_where(&mut qb, query);
    qb
}

//=========================================================================================
// Transaction Steps
//=========================================================================================

async fn lock_row(
    tx: &mut Transaction<'_, Postgres>,
    collection: &str,
    id: &str,
) -> PortResult<Option<DocumentRecord>> {
    sqlx::query_as::<_, DocumentRecord>(
        "SELECT id, version, data FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
    )
    .bind(collection)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_error)
}

async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    collection: &str,
    id: &str,
    fields: Fields,
) -> PortResult<()> {
    sqlx::query(
        "INSERT INTO documents (collection, id, version, data) VALUES ($1, $2, 1, $3) \
         ON CONFLICT (collection, id) DO UPDATE \
         SET data = EXCLUDED.data, version = documents.version + 1, updated_at = now()",
    )
    .bind(collection)
    .bind(id)
    .bind(Json(fields))
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn apply_update(
    tx: &mut Transaction<'_, Postgres>,
    collection: &str,
    id: &str,
    patch: &Patch,
    expected_version: Option<u64>,
) -> PortResult<Document> {
    let current = lock_row(tx, collection, id)
        .await?
        .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?
        .to_domain();
    if let Some(expected) = expected_version {
        if current.version != expected {
            return Err(PortError::Conflict(format!(
                "{}/{} is at version {}, expected {}",
                collection, id, current.version, expected
            )));
        }
    }

    let mut fields = current.fields;
    patch.apply(&mut fields);
    let version = current.version + 1;
    sqlx::query(
        "UPDATE documents SET data = $3, version = $4, updated_at = now() \
         WHERE collection = $1 AND id = $2",
    )
    .bind(collection)
    .bind(id)
    .bind(Json(&fields))
    .bind(version as i64)
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;

    Ok(Document {
        id: id.to_string(),
        version,
        fields,
    })
}

async fn apply_op(tx: &mut Transaction<'_, Postgres>, op: WriteOp) -> PortResult<()> {
    match op {
        WriteOp::Create {
            collection,
            id,
            fields,
        } => {
            let inserted = sqlx::query(
                "INSERT INTO documents (collection, id, version, data) VALUES ($1, $2, 1, $3) \
                 ON CONFLICT (collection, id) DO NOTHING",
            )
            .bind(&collection)
            .bind(&id)
            .bind(Json(fields))
            .execute(&mut **tx)
            .await
            .map_err(db_error)?
            .rows_affected();
            if inserted == 0 {
                return Err(PortError::Conflict(format!("{}/{} already exists", collection, id)));
            }
        }
        WriteOp::Set {
            collection,
            id,
            fields,
        } => upsert(tx, &collection, &id, fields).await?,
        WriteOp::Update {
            collection,
            id,
            patch,
            expected_version,
        } => {
            apply_update(tx, &collection, &id, &patch, expected_version).await?;
        }
        WriteOp::Delete {
            collection,
            id,
            expected_version,
        } => {
            if let Some(expected) = expected_version {
                let current = lock_row(tx, &collection, &id)
                    .await?
                    .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?
                    .to_domain();
                if current.version != expected {
                    return Err(PortError::Conflict(format!(
                        "{}/{} is at version {}, expected {}",
                        collection, id, current.version, expected
                    )));
                }
            }
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(&collection)
                .bind(&id)
                .execute(&mut **tx)
                .await
                .map_err(db_error)?;
        }
    }
    Ok(())
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, version, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(DocumentRecord::to_domain))
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        upsert(&mut tx, collection, id, fields).await?;
        tx.commit().await.map_err(db_error)
    }

    async fn add(&self, collection: &str, fields: Fields) -> PortResult<String> {
        let id = Uuid::new_v4().to_string();
        let mut batch = WriteBatch::new();
        batch.create(collection, &id, fields);
        self.commit(batch).await?;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let document = apply_update(&mut tx, collection, id, &patch, None).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(document)
    }

    async fn delete(&self, collection: &str, id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>> {
        if query.max_in_len() > self.in_query_limit {
            return Err(PortError::InvalidQuery(format!(
                "`in` filter carries {} values, the limit is {}",
                query.max_in_len(),
                self.in_query_limit
            )));
        }
        let records = select_statement(query)
            .build_query_as::<DocumentRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(records.into_iter().map(DocumentRecord::to_domain).collect())
    }

    async fn count(&self, query: &Query) -> PortResult<usize> {
        if query.max_in_len() > self.in_query_limit {
            return Err(PortError::InvalidQuery(format!(
                "`in` filter carries {} values, the limit is {}",
                query.max_in_len(),
                self.in_query_limit
            )));
        }
        let count: i64 = count_statement(query)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count.max(0) as usize)
    }

    /// Runs every operation in one transaction. Any failing operation drops the
    /// transaction, which rolls back everything applied so far.
    async fn commit(&self, batch: WriteBatch) -> PortResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for op in batch.into_ops() {
            apply_op(&mut tx, op).await?;
        }
        tx.commit().await.map_err(db_error)?;
        debug!(ops, "Batch committed");
        Ok(())
    }

    fn in_query_limit(&self) -> usize {
        self.in_query_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Execute;

    #[test]
    fn select_binds_every_filter_and_orders_with_nulls_first() {
        let query = Query::new("reviews")
            .eq("userId", "u1")
            .is_in("noteId", vec!["a".into(), "b".into()])
            .order_by("createdAt", Direction::Asc)
            .limit(5);
        let mut qb = select_statement(&query);
        let built = qb.build();
        let sql = built.sql();
        assert_eq!(
            sql,
            "SELECT id, version, data FROM documents WHERE collection = $1 \
             AND data -> $2 = $3 AND data -> $4 <@ $5 \
             ORDER BY data -> $6 ASC NULLS FIRST, id ASC LIMIT $7"
        );
    }

    #[test]
    fn count_has_no_ordering() {
        let query = Query::new("notes")
            .eq("uploaderId", "u1")
            .order_by("createdAt", Direction::Desc);
        let mut qb = count_statement(&query);
        assert_eq!(
            qb.build().sql(),
            "SELECT COUNT(*) FROM documents WHERE collection = $1 AND data -> $2 = $3"
        );
    }
}
