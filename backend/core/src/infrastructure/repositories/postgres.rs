// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL archival store.
//!
//! Production implementation of [`ArchiveStore`]. Expired sessions and
//! their transactions land in three flat tables; ACL entries are stored as
//! a JSONB document on the transaction rows. Writes are idempotent
//! (`ON CONFLICT`) because expiry retries them.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::repository::{
    ArchiveStore, RepositoryError, SessionRecord, TransactionRecord,
};

pub struct PostgresArchiveStore {
    pool: PgPool,
}

impl PostgresArchiveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn transaction_from_row(row: &sqlx::postgres::PgRow) -> TransactionRecord {
    TransactionRecord {
        id: row.get("id"),
        session_id: row.get("session_id"),
        timestamp: row.get("timestamp"),
        operation: row.get("operation"),
        target_path: row.get("target_path"),
        entries: row.get("entries"),
        status: row.get("status"),
        exec_status: row.get("exec_status"),
        error_msg: row.get("error_msg"),
        output: row.get("output"),
        executed_by: row.get("executed_by"),
        duration_ms: row.get("duration_ms"),
    }
}

#[async_trait]
impl ArchiveStore for PostgresArchiveStore {
    async fn store_expired_session(&self, record: &SessionRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO archived_sessions (
                id, username, ip, user_agent, status,
                created_at, last_active_at, expiry, completed_count, failed_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                last_active_at = EXCLUDED.last_active_at,
                expiry = EXCLUDED.expiry,
                completed_count = EXCLUDED.completed_count,
                failed_count = EXCLUDED.failed_count
            "#,
        )
        .bind(record.id)
        .bind(&record.username)
        .bind(&record.ip)
        .bind(&record.user_agent)
        .bind(&record.status)
        .bind(record.created_at)
        .bind(record.last_active_at)
        .bind(record.expiry)
        .bind(record.completed_count)
        .bind(record.failed_count)
        .execute(&self.pool)
        .await
        .map_err(|err| RepositoryError::Database(format!("failed to store session: {err}")))?;

        Ok(())
    }

    async fn store_pending_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO archived_pending_transactions (
                id, session_id, timestamp, operation, target_path, entries,
                status, exec_status, error_msg, output, executed_by, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.session_id)
        .bind(record.timestamp)
        .bind(&record.operation)
        .bind(&record.target_path)
        .bind(&record.entries)
        .bind(&record.status)
        .bind(record.exec_status)
        .bind(&record.error_msg)
        .bind(&record.output)
        .bind(&record.executed_by)
        .bind(record.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            RepositoryError::Database(format!("failed to store pending transaction: {err}"))
        })?;

        Ok(())
    }

    async fn store_result_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO archived_result_transactions (
                id, session_id, timestamp, operation, target_path, entries,
                status, exec_status, error_msg, output, executed_by, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.session_id)
        .bind(record.timestamp)
        .bind(&record.operation)
        .bind(&record.target_path)
        .bind(&record.entries)
        .bind(&record.status)
        .bind(record.exec_status)
        .bind(&record.error_msg)
        .bind(&record.output)
        .bind(&record.executed_by)
        .bind(record.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            RepositoryError::Database(format!("failed to store result transaction: {err}"))
        })?;

        Ok(())
    }

    async fn sessions_by_username(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SessionRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, ip, user_agent, status,
                   created_at, last_active_at, expiry, completed_count, failed_count
            FROM archived_sessions
            WHERE username = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(username)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| RepositoryError::Database(err.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| SessionRecord {
                id: row.get("id"),
                username: row.get("username"),
                ip: row.get("ip"),
                user_agent: row.get("user_agent"),
                status: row.get("status"),
                created_at: row.get("created_at"),
                last_active_at: row.get("last_active_at"),
                expiry: row.get("expiry"),
                completed_count: row.get("completed_count"),
                failed_count: row.get("failed_count"),
            })
            .collect())
    }

    async fn results_by_user(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, timestamp, operation, target_path, entries,
                   status, exec_status, error_msg, output, executed_by, duration_ms
            FROM archived_result_transactions
            WHERE executed_by = $1
            ORDER BY timestamp DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(username)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| RepositoryError::Database(err.to_string()))?;

        Ok(rows.iter().map(transaction_from_row).collect())
    }

    async fn pending_by_user(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, timestamp, operation, target_path, entries,
                   status, exec_status, error_msg, output, executed_by, duration_ms
            FROM archived_pending_transactions
            WHERE executed_by = $1
            ORDER BY timestamp DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(username)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| RepositoryError::Database(err.to_string()))?;

        Ok(rows.iter().map(transaction_from_row).collect())
    }
}
