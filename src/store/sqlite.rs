//! SQLite-backed [`UserStore`].
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds,
//! `Z` suffix) so that lexicographic comparison in SQL matches time order.
//! The schema is applied inline via `include_str!` on every open.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use super::{ResetSummary, StoreError, UnbanSummary, UserStore};
use crate::types::{
    Ban, CompletedSession, PendingAdminInput, Report, SessionState, Stats, User, UserId,
    UserPatch,
};

const SCHEMA_SQL: &str = include_str!("../../migrations/001_schema.sql");

const USER_COLUMNS: &str =
    "tg_id, state, partner_id, chat_start, last_active, pending_admin, created_at";

type UserRow = (
    i64,
    String,
    Option<i64>,
    Option<String>,
    String,
    Option<String>,
    String,
);

type ReportRow = (i64, i64, i64, String, String);

/// SQLite implementation of the record store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migration fails.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        let store = Self::from_pool(pool)
            .await
            .context("failed to apply schema")?;
        info!(path = %path.display(), "user store opened");
        Ok(store)
    }

    /// Wrap an existing pool, applying the schema first.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool (for tests and maintenance).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_user_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: UserId,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tg_id = ?1");
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn write_user_tx(
        tx: &mut Transaction<'_, Sqlite>,
        user: &User,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (tg_id, state, partner_id, chat_start, last_active, pending_admin, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(tg_id) DO UPDATE SET \
                state = excluded.state, \
                partner_id = excluded.partner_id, \
                chat_start = excluded.chat_start, \
                last_active = excluded.last_active, \
                pending_admin = excluded.pending_admin",
        )
        .bind(user.id.0)
        .bind(user.state.as_str())
        .bind(user.partner_id.map(|p| p.0))
        .bind(user.chat_start.map(format_ts))
        .bind(format_ts(user.last_active))
        .bind(user.pending_admin.map(|p| p.as_str()))
        .bind(format_ts(user.created_at))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn apply_patch_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: UserId,
        patch: &UserPatch,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let mut user = Self::load_user_tx(tx, id)
            .await?
            .unwrap_or_else(|| User::new(id, now));
        user.apply(patch);
        Self::write_user_tx(tx, &user).await?;
        Ok(user)
    }

    async fn count(&self, sql: &str) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(non_negative(row.0))
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tg_id = ?1");
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn user_exists(&self, id: UserId) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE tg_id = ?1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn upsert_user(&self, id: UserId, patch: &UserPatch) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;
        let user = Self::apply_patch_tx(&mut tx, id, patch, Utc::now()).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn update_users(&self, patches: &[(UserId, UserPatch)]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for (id, patch) in patches {
            Self::apply_patch_tx(&mut tx, *id, patch, now).await?;
        }
        tx.commit().await?;
        debug!(count = patches.len(), "user batch committed");
        Ok(())
    }

    async fn active_ban(&self, id: UserId, now: DateTime<Utc>) -> Result<Option<Ban>, StoreError> {
        let row: Option<(i64, Option<String>, String)> = sqlx::query_as(
            "SELECT tg_id, until, created_at FROM bans \
             WHERE tg_id = ?1 AND (until IS NULL OR until > ?2)",
        )
        .bind(id.0)
        .bind(format_ts(now))
        .fetch_optional(&self.pool)
        .await?;
        row.map(ban_from_row).transpose()
    }

    async fn ban(&self, id: UserId, until: Option<DateTime<Utc>>) -> Result<Ban, StoreError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO bans (tg_id, until, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(tg_id) DO UPDATE SET until = excluded.until, created_at = excluded.created_at",
        )
        .bind(id.0)
        .bind(until.map(format_ts))
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?;
        Ok(Ban {
            user_id: id,
            until,
            created_at: now,
        })
    }

    async fn unban(&self, id: UserId) -> Result<UnbanSummary, StoreError> {
        let mut tx = self.pool.begin().await?;
        let bans = sqlx::query("DELETE FROM bans WHERE tg_id = ?1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let reports = sqlx::query("DELETE FROM reports WHERE to_id = ?1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(UnbanSummary {
            ban_removed: bans.rows_affected() > 0,
            reports_purged: reports.rows_affected(),
        })
    }

    async fn add_report_with(
        &self,
        reporter: UserId,
        reported: UserId,
        reason: &str,
        patches: &[(UserId, UserPatch)],
    ) -> Result<Report, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO reports (from_id, to_id, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(reporter.0)
        .bind(reported.0)
        .bind(reason)
        .bind(format_ts(now))
        .execute(&mut *tx)
        .await?;
        for (id, patch) in patches {
            Self::apply_patch_tx(&mut tx, *id, patch, now).await?;
        }
        tx.commit().await?;
        Ok(Report {
            id: result.last_insert_rowid(),
            reporter_id: reporter,
            reported_id: reported,
            reason: reason.to_owned(),
            created_at: now,
        })
    }

    async fn count_reports(&self, id: UserId) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM reports WHERE to_id = ?1")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(non_negative(row.0))
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<ReportRow> = sqlx::query_as(
            "SELECT id, from_id, to_id, reason, created_at FROM reports \
             ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit_i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(report_from_row).collect()
    }

    async fn aggregate_stats(&self, now: DateTime<Utc>) -> Result<Stats, StoreError> {
        let total_users = self.count("SELECT count(*) FROM users").await?;
        let in_session = self
            .count("SELECT count(*) FROM users WHERE state IN ('chat', 'reporting')")
            .await?;
        let searching = self
            .count("SELECT count(*) FROM users WHERE state = 'searching'")
            .await?;
        let total_reports = self.count("SELECT count(*) FROM reports").await?;

        let bans: (i64,) =
            sqlx::query_as("SELECT count(*) FROM bans WHERE until IS NULL OR until > ?1")
                .bind(format_ts(now))
                .fetch_one(&self.pool)
                .await?;

        let sessions: (i64, Option<i64>) = sqlx::query_as(
            "SELECT count(*), CAST(AVG(duration_secs) AS INTEGER) FROM chat_sessions",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Stats {
            total_users,
            active_chats: in_session / 2,
            searching,
            total_reports,
            active_bans: non_negative(bans.0),
            completed_sessions: non_negative(sessions.0),
            avg_session_secs: sessions.1.map(non_negative),
        })
    }

    async fn users_in_state(&self, state: SessionState) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE state = ?1 ORDER BY tg_id");
        let rows: Vec<UserRow> = sqlx::query_as(&sql)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(user_from_row).collect()
    }

    async fn record_session(&self, session: &CompletedSession) -> Result<(), StoreError> {
        let duration = session
            .ended_at
            .signed_duration_since(session.started_at)
            .num_seconds()
            .max(0);
        sqlx::query(
            "INSERT INTO chat_sessions (ended_by, partner_id, started_at, ended_at, duration_secs, end_reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(session.ended_by.0)
        .bind(session.partner.0)
        .bind(format_ts(session.started_at))
        .bind(format_ts(session.ended_at))
        .bind(duration)
        .bind(session.reason.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_all(&self) -> Result<ResetSummary, StoreError> {
        let mut tx = self.pool.begin().await?;
        let bans = sqlx::query("DELETE FROM bans").execute(&mut *tx).await?;
        let reports = sqlx::query("DELETE FROM reports").execute(&mut *tx).await?;
        // Restart report ids like a fresh install.
        sqlx::query("DELETE FROM sqlite_sequence WHERE name = 'reports'")
            .execute(&mut *tx)
            .await?;
        let users = sqlx::query(
            "UPDATE users SET state = 'menu', partner_id = NULL, chat_start = NULL, pending_admin = NULL",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ResetSummary {
            bans: bans.rows_affected(),
            reports: reports.rows_affected(),
            users: users.rows_affected(),
        })
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

/// Format a timestamp in the fixed-width form used by every column.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(field: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp {
            field,
            value: value.to_owned(),
        })
}

fn non_negative(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn user_from_row(row: UserRow) -> Result<User, StoreError> {
    let (id, state, partner, chat_start, last_active, pending, created_at) = row;
    Ok(User {
        id: UserId(id),
        state: SessionState::parse(&state)?,
        partner_id: partner.map(UserId),
        chat_start: chat_start
            .as_deref()
            .map(|s| parse_ts("chat_start", s))
            .transpose()?,
        last_active: parse_ts("last_active", &last_active)?,
        pending_admin: pending
            .as_deref()
            .map(PendingAdminInput::parse)
            .transpose()?,
        created_at: parse_ts("created_at", &created_at)?,
    })
}

fn ban_from_row(row: (i64, Option<String>, String)) -> Result<Ban, StoreError> {
    let (id, until, created_at) = row;
    Ok(Ban {
        user_id: UserId(id),
        until: until.as_deref().map(|s| parse_ts("until", s)).transpose()?,
        created_at: parse_ts("created_at", &created_at)?,
    })
}

fn report_from_row(row: ReportRow) -> Result<Report, StoreError> {
    let (id, from, to, reason, created_at) = row;
    Ok(Report {
        id,
        reporter_id: UserId(from),
        reported_id: UserId(to),
        reason,
        created_at: parse_ts("created_at", &created_at)?,
    })
}
