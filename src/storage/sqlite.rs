//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the
//! `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: no separate database server required
//! - **WAL mode**: better concurrency for reads during writes
//! - **Connection pooling**: efficient resource usage
//! - **Migrations**: automatic schema versioning with sqlx
//!
//! Snapshots are stored with a handful of indexed columns for range scans
//! plus the complete snapshot as a JSON payload column; reads rebuild the
//! typed struct from the payload.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::alerts::{Alert, AlertType};
use crate::detector::Severity;
use crate::snapshot::ScanSnapshot;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};

/// SQLite storage backend
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for optimal performance (WAL mode, etc.)
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> StorageResult<ScanSnapshot> {
        let payload: String = row.get("payload");
        serde_json::from_str(&payload).map_err(|e| {
            StorageError::SerializationError(format!("failed to deserialize snapshot: {}", e))
        })
    }

    fn alert_from_row(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Alert> {
        let alert_id: String = row.get("alert_id");
        let target_id: String = row.get("target_id");
        let alert_type_str: String = row.get("alert_type");
        let severity_str: String = row.get("severity");

        let alert_type = AlertType::parse(&alert_type_str).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown alert type: {}", alert_type_str))
        })?;

        let severity = match severity_str.as_str() {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            other => {
                return Err(StorageError::SerializationError(format!(
                    "unknown severity: {}",
                    other
                )));
            }
        };

        Ok(Alert {
            alert_id: Uuid::parse_str(&alert_id)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?,
            target_id: Uuid::parse_str(&target_id)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?,
            alert_type,
            severity,
            title: row.get("title"),
            description: row.get("description"),
            created_at: Self::millis_to_timestamp(row.get("created_at")),
            resolved_at: row
                .get::<Option<i64>, _>("resolved_at")
                .map(Self::millis_to_timestamp),
            notification_sent: row.get::<i64, _>("notification_sent") != 0,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteStore {
    #[instrument(skip(self, snapshot), fields(target_id = %snapshot.target_id))]
    async fn append_snapshot(
        &self,
        snapshot: ScanSnapshot,
    ) -> StorageResult<Option<ScanSnapshot>> {
        let payload = serde_json::to_string(&snapshot).map_err(|e| {
            StorageError::SerializationError(format!("failed to serialize snapshot: {}", e))
        })?;

        // Transaction so the ordering check and the insert are atomic.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let previous_row = sqlx::query(
            r#"
            SELECT payload, timestamp FROM snapshots
            WHERE target_id = ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(snapshot.target_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let previous = match &previous_row {
            Some(row) => {
                let latest_millis: i64 = row.get("timestamp");
                let latest = Self::millis_to_timestamp(latest_millis);
                if snapshot.timestamp < latest {
                    return Err(StorageError::OutOfOrder {
                        target_id: snapshot.target_id,
                        latest,
                        rejected: snapshot.timestamp,
                    });
                }
                Some(Self::snapshot_from_row(row)?)
            }
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO snapshots (
                scan_id, target_id, timestamp, overall_score,
                issue_fingerprint, load_time_ms, tls_secure, payload
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.scan_id.to_string())
        .bind(snapshot.target_id.to_string())
        .bind(Self::timestamp_to_millis(&snapshot.timestamp))
        .bind(snapshot.overall_score)
        .bind(&snapshot.issue_fingerprint)
        .bind(snapshot.load_time_ms as i64)
        .bind(snapshot.tls.is_secure() as i64)
        .bind(payload)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(previous)
    }

    #[instrument(skip(self))]
    async fn latest_snapshots(
        &self,
        target_id: Uuid,
        limit: usize,
    ) -> StorageResult<Vec<ScanSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM snapshots
            WHERE target_id = ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(target_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::snapshot_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn snapshot_history(
        &self,
        target_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ScanSnapshot>> {
        let since_millis = since
            .map(|s| Self::timestamp_to_millis(&s))
            .unwrap_or(i64::MIN);
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT payload FROM snapshots
            WHERE target_id = ? AND timestamp >= ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(target_id.to_string())
        .bind(since_millis)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::snapshot_from_row).collect()
    }

    async fn count_snapshots(&self) -> StorageResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM snapshots")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.get::<i64, _>("count") as u64)
    }

    #[instrument(skip(self))]
    async fn prune_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        // Keeps each target's newest snapshot regardless of age.
        let result = sqlx::query(
            r#"
            DELETE FROM snapshots
            WHERE timestamp < ?
              AND timestamp < (
                  SELECT MAX(s2.timestamp) FROM snapshots s2
                  WHERE s2.target_id = snapshots.target_id
              )
            "#,
        )
        .bind(Self::timestamp_to_millis(&before))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self, alert), fields(alert_type = %alert.alert_type))]
    async fn insert_alert(&self, alert: Alert) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                alert_id, target_id, alert_type, severity, title,
                description, created_at, resolved_at, notification_sent
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.alert_id.to_string())
        .bind(alert.target_id.to_string())
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.to_string())
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(Self::timestamp_to_millis(&alert.created_at))
        .bind(alert.resolved_at.map(|t| Self::timestamp_to_millis(&t)))
        .bind(alert.notification_sent as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn find_open_alert(
        &self,
        target_id: Uuid,
        alert_type: AlertType,
    ) -> StorageResult<Option<Alert>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM alerts
            WHERE target_id = ? AND alert_type = ? AND resolved_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(target_id.to_string())
        .bind(alert_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn resolve_alert(&self, alert_id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE alerts SET resolved_at = ? WHERE alert_id = ? AND resolved_at IS NULL",
        )
        .bind(Self::timestamp_to_millis(&at))
        .bind(alert_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_alert_notified(&self, alert_id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE alerts SET notification_sent = 1 WHERE alert_id = ?")
            .bind(alert_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn alerts_for_target(
        &self,
        target_id: Uuid,
        open_only: bool,
    ) -> StorageResult<Vec<Alert>> {
        let sql = if open_only {
            r#"
            SELECT * FROM alerts
            WHERE target_id = ? AND resolved_at IS NULL
            ORDER BY created_at DESC
            "#
        } else {
            r#"
            SELECT * FROM alerts
            WHERE target_id = ?
            ORDER BY created_at DESC
            "#
        };

        let rows = sqlx::query(sql)
            .bind(target_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    async fn open_alert_count(&self, target_id: Option<Uuid>) -> StorageResult<usize> {
        let row = match target_id {
            Some(id) => sqlx::query(
                "SELECT COUNT(*) AS count FROM alerts WHERE target_id = ? AND resolved_at IS NULL",
            )
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?,
            None => sqlx::query("SELECT COUNT(*) AS count FROM alerts WHERE resolved_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?,
        };

        Ok(row.get::<i64, _>("count") as usize)
    }

    #[instrument(skip(self))]
    async fn prune_resolved_alerts(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query(
            "DELETE FROM alerts WHERE resolved_at IS NOT NULL AND created_at < ?",
        )
        .bind(Self::timestamp_to_millis(&before))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let snapshots = self.count_snapshots().await.unwrap_or(0);
                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata: HashMap::from([
                        ("backend".to_string(), "sqlite".to_string()),
                        ("path".to_string(), self.db_path.clone()),
                        ("total_snapshots".to_string(), snapshots.to_string()),
                    ]),
                })
            }
            Err(e) => Err(StorageError::UnhealthyBackend(e.to_string())),
        }
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let snapshots = self.count_snapshots().await?;
        let alerts = sqlx::query("SELECT COUNT(*) AS count FROM alerts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?
            .get::<i64, _>("count");

        Ok(format!(
            "SQLite ({}): {} snapshots, {} alerts",
            self.db_path, snapshots, alerts
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing SQLite connection pool");
        self.pool.close().await;
        Ok(())
    }
}
