//! `SQLite` store via `sqlx`.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (UTC, microseconds)
//! so that text comparison orders them correctly.

use super::Store;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use lmi_core::model::{
    Credentials, NewSession, NewUser, RefreshTokenRecord, Session, SessionWithOwner, User,
};
use lmi_core::{LmiError, LmiResult, SessionId, SessionStatus, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    display_name    TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_credentials (
    user_id         INTEGER PRIMARY KEY NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    email           TEXT NOT NULL UNIQUE,
    password_hash   TEXT NOT NULL,
    salt            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS refresh_tokens (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    token           TEXT NOT NULL UNIQUE,
    user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires_at      INTEGER NOT NULL,
    active          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id),
    status          TEXT NOT NULL CHECK(status IN ('active','inactive','terminated')),
    process_ref     TEXT NOT NULL,
    origin_addr     TEXT NOT NULL,
    last_activity   TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
";

pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    display_name: String,
    created_at: String,
}

impl UserRow {
    fn into_user(self) -> LmiResult<User> {
        Ok(User {
            id: self.id,
            display_name: self.display_name,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CredentialsRow {
    user_id: i64,
    email: String,
    password_hash: String,
    salt: String,
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: i64,
    token: String,
    user_id: i64,
    expires_at: i64,
    active: bool,
    created_at: String,
}

impl RefreshTokenRow {
    fn into_record(self) -> LmiResult<RefreshTokenRecord> {
        Ok(RefreshTokenRecord {
            id: self.id,
            token: self.token,
            user_id: self.user_id,
            expires_at: self.expires_at,
            active: self.active,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    user_id: i64,
    status: String,
    process_ref: String,
    origin_addr: String,
    last_activity: String,
    created_at: String,
}

impl SessionRow {
    fn into_session(self) -> LmiResult<Session> {
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            status: SessionStatus::parse(&self.status)?,
            process_ref: self.process_ref,
            origin_addr: self.origin_addr,
            last_activity: parse_ts(&self.last_activity)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionOwnerRow {
    #[sqlx(flatten)]
    session: SessionRow,
    owner_display_name: String,
    owner_created_at: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> LmiResult<Self> {
        let in_memory = url.contains(":memory:");
        if !in_memory {
            if let Some(parent) = url
                .strip_prefix("sqlite://")
                .and_then(|p| Path::new(p.split('?').next().unwrap_or(p)).parent())
            {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.bootstrap_schema().await?;
        info!(url, "database ready");
        Ok(store)
    }

    /// Apply all table definitions. Safe to run on every startup.
    pub async fn bootstrap_schema(&self) -> LmiResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_user(&self, user: NewUser) -> LmiResult<User> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (display_name, created_at) VALUES (?1, ?2) RETURNING id",
        )
        .bind(&user.display_name)
        .bind(format_ts(created_at))
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        let inserted = sqlx::query(
            "INSERT INTO user_credentials (user_id, email, password_hash, salt)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.salt)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(LmiError::DuplicateEmail);
            }
            Err(e) => return Err(storage(e)),
        }
        tx.commit().await.map_err(storage)?;

        Ok(User {
            id,
            display_name: user.display_name,
            created_at: parse_ts(&format_ts(created_at))?,
        })
    }

    async fn find_user(&self, id: UserId) -> LmiResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.map(UserRow::into_user).transpose()
    }

    async fn find_credentials_by_email(&self, email: &str) -> LmiResult<Option<Credentials>> {
        let row: Option<CredentialsRow> =
            sqlx::query_as("SELECT * FROM user_credentials WHERE email = ?1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(row.map(|r| Credentials {
            user_id: r.user_id,
            email: r.email,
            password_hash: r.password_hash,
            salt: r.salt,
        }))
    }

    async fn insert_refresh_token(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: i64,
    ) -> LmiResult<RefreshTokenRecord> {
        let row: RefreshTokenRow = sqlx::query_as(
            "INSERT INTO refresh_tokens (token, user_id, expires_at, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4) RETURNING *",
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .bind(format_ts(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        row.into_record()
    }

    async fn find_refresh_token(&self, token: &str) -> LmiResult<Option<RefreshTokenRecord>> {
        let row: Option<RefreshTokenRow> =
            sqlx::query_as("SELECT * FROM refresh_tokens WHERE token = ?1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        row.map(RefreshTokenRow::into_record).transpose()
    }

    async fn swap_refresh_token(
        &self,
        id: i64,
        expected: &str,
        new_token: &str,
        new_expires_at: i64,
    ) -> LmiResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET token = ?1, expires_at = ?2
             WHERE id = ?3 AND token = ?4 AND active = 1",
        )
        .bind(new_token)
        .bind(new_expires_at)
        .bind(id)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_session(&self, session: NewSession) -> LmiResult<Session> {
        let now = format_ts(Utc::now());
        let inserted: Result<SessionRow, sqlx::Error> = sqlx::query_as(
            "INSERT INTO sessions (user_id, status, process_ref, origin_addr, last_activity, created_at)
             VALUES (?1, 'active', ?2, ?3, ?4, ?4) RETURNING *",
        )
        .bind(session.user_id)
        .bind(&session.process_ref)
        .bind(&session.origin_addr)
        .bind(&now)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => row.into_session(),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(LmiError::UnknownUser(session.user_id))
            }
            Err(e) => Err(storage(e)),
        }
    }

    async fn list_active_sessions(&self) -> LmiResult<Vec<SessionWithOwner>> {
        let rows: Vec<SessionOwnerRow> = sqlx::query_as(
            "SELECT s.*, u.display_name AS owner_display_name, u.created_at AS owner_created_at
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.status = 'active'
             ORDER BY s.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter()
            .map(|row| {
                let owner = User {
                    id: row.session.user_id,
                    display_name: row.owner_display_name,
                    created_at: parse_ts(&row.owner_created_at)?,
                };
                Ok(SessionWithOwner {
                    session: row.session.into_session()?,
                    owner,
                })
            })
            .collect()
    }

    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> LmiResult<()> {
        let at = format_ts(at);
        sqlx::query("UPDATE sessions SET last_activity = ?1 WHERE id = ?2 AND last_activity < ?1")
            .bind(&at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn set_session_status(&self, id: SessionId, status: SessionStatus) -> LmiResult<bool> {
        if !SessionStatus::Active.can_transition_to(status) {
            return Ok(false);
        }
        let result =
            sqlx::query("UPDATE sessions SET status = ?1 WHERE id = ?2 AND status = 'active'")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        Ok(result.rows_affected() == 1)
    }
}

fn storage(e: sqlx::Error) -> LmiError {
    LmiError::Storage(e.to_string())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> LmiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LmiError::Storage(format!("invalid timestamp {s:?}: {e}")))
}
