use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QueryTrait, TransactionTrait,
};
use tracing::debug;

use crate::batch::{BatchOp, WriteBatch};
use crate::entities::kv_entry::{self, Column};
use crate::error::StoreError;
use crate::Store;

/// [`Store`] backed by a SeaORM connection (SQLite or PostgreSQL)
#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn entry(bucket: &str, key: &str, value: &str) -> kv_entry::ActiveModel {
    kv_entry::ActiveModel {
        bucket: Set(bucket.to_string()),
        key: Set(key.to_string()),
        value: Set(value.to_string()),
        updated_at: Set(Utc::now()),
    }
}

fn key_conflict() -> OnConflict {
    OnConflict::columns([Column::Bucket, Column::Key])
}

/// Insert-if-absent; returns whether a row was written
async fn insert_absent<C: ConnectionTrait>(
    conn: &C,
    bucket: &str,
    key: &str,
    value: &str,
) -> Result<bool, StoreError> {
    let stmt = kv_entry::Entity::insert(entry(bucket, key, value))
        .on_conflict(key_conflict().do_nothing().to_owned())
        .build(conn.get_database_backend());
    Ok(conn.execute(stmt).await?.rows_affected() == 1)
}

async fn upsert<C: ConnectionTrait>(
    conn: &C,
    bucket: &str,
    key: &str,
    value: &str,
) -> Result<(), StoreError> {
    let stmt = kv_entry::Entity::insert(entry(bucket, key, value))
        .on_conflict(
            key_conflict()
                .update_columns([Column::Value, Column::UpdatedAt])
                .to_owned(),
        )
        .build(conn.get_database_backend());
    conn.execute(stmt).await?;
    Ok(())
}

async fn remove<C: ConnectionTrait>(
    conn: &C,
    bucket: &str,
    key: &str,
    expected: Option<&str>,
) -> Result<bool, StoreError> {
    let mut query = kv_entry::Entity::delete_many()
        .filter(Column::Bucket.eq(bucket))
        .filter(Column::Key.eq(key));
    if let Some(expected) = expected {
        query = query.filter(Column::Value.eq(expected));
    }
    Ok(query.exec(conn).await?.rows_affected > 0)
}

#[async_trait]
impl Store for SeaOrmStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<String>, StoreError> {
        let found = kv_entry::Entity::find_by_id((bucket.to_string(), key.to_string()))
            .one(&self.db)
            .await?;
        Ok(found.map(|m| m.value))
    }

    async fn set(&self, bucket: &str, key: &str, value: &str) -> Result<(), StoreError> {
        upsert(&self.db, bucket, key, value).await
    }

    async fn increment(&self, bucket: &str, key: &str) -> Result<i64, StoreError> {
        let txn = self.db.begin().await?;

        insert_absent(&txn, bucket, key, "0").await?;

        // Single UPDATE so the read-modify-write happens inside the database
        kv_entry::Entity::update_many()
            .col_expr(
                Column::Value,
                Expr::cust("CAST(CAST(\"value\" AS BIGINT) + 1 AS TEXT)"),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Bucket.eq(bucket))
            .filter(Column::Key.eq(key))
            .exec(&txn)
            .await?;

        let current = kv_entry::Entity::find_by_id((bucket.to_string(), key.to_string()))
            .one(&txn)
            .await?
            .map(|m| m.value)
            .unwrap_or_default();

        txn.commit().await?;

        current
            .trim()
            .parse::<i64>()
            .map_err(|_| StoreError::NotACounter {
                bucket: bucket.to_string(),
                key: key.to_string(),
                value: current.clone(),
            })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        remove(&self.db, bucket, key, None).await
    }

    async fn scan(&self, bucket: &str, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut query = kv_entry::Entity::find().filter(Column::Bucket.eq(bucket));
        if !prefix.is_empty() {
            query = query.filter(Column::Key.starts_with(prefix));
        }

        let rows = query.order_by_asc(Column::Key).all(&self.db).await?;

        // LIKE treats '_' and '%' as wildcards, so re-check the prefix exactly
        Ok(rows
            .into_iter()
            .filter(|m| m.key.starts_with(prefix))
            .map(|m| (m.key, m.value))
            .collect())
    }

    async fn compare_and_swap(
        &self,
        bucket: &str,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        match expected {
            None => insert_absent(&self.db, bucket, key, new).await,
            Some(expected) => {
                let result = kv_entry::Entity::update_many()
                    .col_expr(Column::Value, Expr::value(new.to_string()))
                    .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(Column::Bucket.eq(bucket))
                    .filter(Column::Key.eq(key))
                    .filter(Column::Value.eq(expected))
                    .exec(&self.db)
                    .await?;
                Ok(result.rows_affected == 1)
            }
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        debug!("Committing write batch of {} ops", batch.len());
        let txn = self.db.begin().await?;

        for op in batch.into_ops() {
            match op {
                BatchOp::Put { bucket, key, value } => {
                    upsert(&txn, &bucket, &key, &value).await?;
                }
                BatchOp::Insert { bucket, key, value } => {
                    if !insert_absent(&txn, &bucket, &key, &value).await? {
                        // Dropping the transaction rolls back earlier ops
                        return Err(StoreError::Conflict { bucket, key });
                    }
                }
                BatchOp::Delete { bucket, key } => {
                    remove(&txn, &bucket, &key, None).await?;
                }
                BatchOp::DeleteIf {
                    bucket,
                    key,
                    expected,
                } => {
                    remove(&txn, &bucket, &key, Some(&expected)).await?;
                }
            }
        }

        txn.commit().await?;
        Ok(())
    }
}
