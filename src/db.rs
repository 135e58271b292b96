// src/db.rs
use crate::error::{AppError, AppResult};
use crate::models::{Session as UserSession, User, WatchlistItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use scylla::frame::response::result::{CqlValue, Row};
use scylla::{query::Query, Session, SessionBuilder};

/// Persistence for users, sessions and watchlist records.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with [`AppError::Conflict`] when the email is already taken.
    async fn insert_user(&self, user: &User) -> AppResult<()>;
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn list_users(&self) -> AppResult<Vec<User>>;

    async fn insert_session(&self, session: &UserSession) -> AppResult<()>;
    /// Expired sessions read as missing.
    async fn find_session(&self, id: &str) -> AppResult<Option<UserSession>>;
    async fn delete_session(&self, id: &str) -> AppResult<()>;

    async fn find_watchlist_item(
        &self,
        user_id: &str,
        symbol: &str,
    ) -> AppResult<Option<WatchlistItem>>;
    async fn insert_watchlist_item(&self, item: &WatchlistItem) -> AppResult<()>;
    /// Returns false when there was nothing to delete.
    async fn delete_watchlist_item(&self, user_id: &str, symbol: &str) -> AppResult<bool>;
    async fn list_watchlist(&self, user_id: &str) -> AppResult<Vec<WatchlistItem>>;
}

const USER_COLUMNS: &str = "id, email, name, password_hash, country, investment_goals, risk_tolerance, preferred_industry, created_at";

pub struct ScyllaStore {
    session: Session,
}

pub async fn init(node: &str) -> AppResult<ScyllaStore> {
    let session = SessionBuilder::new()
        .known_node(node)
        .build()
        .await
        .map_err(|e| AppError::Database(format!("failed to connect to ScyllaDB: {}", e)))?;

    let schema = [
        "CREATE KEYSPACE IF NOT EXISTS stock_watchlist WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}",
        "CREATE TABLE IF NOT EXISTS stock_watchlist.users (email TEXT PRIMARY KEY, id TEXT, name TEXT, password_hash TEXT, country TEXT, investment_goals TEXT, risk_tolerance TEXT, preferred_industry TEXT, created_at TIMESTAMP)",
        "CREATE TABLE IF NOT EXISTS stock_watchlist.sessions (id TEXT PRIMARY KEY, user_id TEXT, email TEXT, expires_at TIMESTAMP)",
        "CREATE TABLE IF NOT EXISTS stock_watchlist.watchlist (user_id TEXT, symbol TEXT, company TEXT, added_at TIMESTAMP, PRIMARY KEY (user_id, symbol))",
    ];
    for statement in schema {
        session.query(statement, &[]).await.map_err(db_error)?;
    }

    info!("Successfully connected to ScyllaDB at {}.", node);
    Ok(ScyllaStore { session })
}

fn db_error(e: impl std::fmt::Display) -> AppError {
    error!("ScyllaDB query failed: {}", e);
    AppError::Database(e.to_string())
}

fn text_at(row: &Row, idx: usize) -> String {
    row.columns
        .get(idx)
        .and_then(|col| col.as_ref())
        .and_then(|v| v.as_text())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn timestamp_at(row: &Row, idx: usize) -> DateTime<Utc> {
    match row.columns.get(idx).and_then(|col| col.as_ref()) {
        Some(CqlValue::Timestamp(ts)) => {
            DateTime::<Utc>::from_timestamp_millis(ts.num_milliseconds()).unwrap_or_default()
        }
        other => {
            error!("Missing timestamp in row column {}: {:?}", idx, other);
            DateTime::<Utc>::default()
        }
    }
}

/// Row TTL that lets Scylla drop the session once it expires.
fn session_ttl_secs(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    (expires_at - now)
        .num_seconds()
        .clamp(1, i32::MAX as i64) as i32
}

fn user_from_row(row: &Row) -> User {
    User {
        id: text_at(row, 0),
        email: text_at(row, 1),
        name: text_at(row, 2),
        password_hash: text_at(row, 3),
        country: text_at(row, 4),
        investment_goals: text_at(row, 5),
        risk_tolerance: text_at(row, 6),
        preferred_industry: text_at(row, 7),
        created_at: timestamp_at(row, 8),
    }
}

fn watchlist_item_from_row(row: &Row) -> WatchlistItem {
    WatchlistItem {
        user_id: text_at(row, 0),
        symbol: text_at(row, 1),
        company: text_at(row, 2),
        added_at: timestamp_at(row, 3),
    }
}

#[async_trait]
impl Store for ScyllaStore {
    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let query = Query::new(format!(
            "INSERT INTO stock_watchlist.users ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS",
            USER_COLUMNS
        ));
        let result = self
            .session
            .query(
                query,
                (
                    user.id.as_str(),
                    user.email.as_str(),
                    user.name.as_str(),
                    user.password_hash.as_str(),
                    user.country.as_str(),
                    user.investment_goals.as_str(),
                    user.risk_tolerance.as_str(),
                    user.preferred_industry.as_str(),
                    user.created_at.timestamp_millis(),
                ),
            )
            .await
            .map_err(db_error)?;

        // Lightweight transactions answer with an `[applied]` row.
        let applied = result
            .rows
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|row| row.columns.into_iter().next().flatten());
        match applied {
            Some(CqlValue::Boolean(true)) => Ok(()),
            Some(CqlValue::Boolean(false)) => Err(AppError::Conflict(
                "User with this email already exists".to_string(),
            )),
            other => Err(AppError::Database(format!(
                "unexpected result for conditional insert: {:?}",
                other
            ))),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let query = Query::new(format!(
            "SELECT {} FROM stock_watchlist.users WHERE email = ?",
            USER_COLUMNS
        ));
        let result = self
            .session
            .query(query, (email,))
            .await
            .map_err(db_error)?;
        Ok(result
            .rows
            .unwrap_or_default()
            .first()
            .map(user_from_row))
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let query = Query::new(format!("SELECT {} FROM stock_watchlist.users", USER_COLUMNS));
        let result = self.session.query(query, &[]).await.map_err(db_error)?;
        Ok(result
            .rows
            .unwrap_or_default()
            .iter()
            .map(user_from_row)
            .collect())
    }

    async fn insert_session(&self, session: &UserSession) -> AppResult<()> {
        let query = Query::new(
            "INSERT INTO stock_watchlist.sessions (id, user_id, email, expires_at) VALUES (?, ?, ?, ?) USING TTL ?",
        );
        self.session
            .query(
                query,
                (
                    session.id.as_str(),
                    session.user_id.as_str(),
                    session.email.as_str(),
                    session.expires_at.timestamp_millis(),
                    session_ttl_secs(session.expires_at, Utc::now()),
                ),
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_session(&self, id: &str) -> AppResult<Option<UserSession>> {
        let query = Query::new(
            "SELECT id, user_id, email, expires_at FROM stock_watchlist.sessions WHERE id = ?",
        );
        let result = self.session.query(query, (id,)).await.map_err(db_error)?;
        Ok(result.rows.unwrap_or_default().first().map(|row| UserSession {
            id: text_at(row, 0),
            user_id: text_at(row, 1),
            email: text_at(row, 2),
            expires_at: timestamp_at(row, 3),
        }))
    }

    async fn delete_session(&self, id: &str) -> AppResult<()> {
        let query = Query::new("DELETE FROM stock_watchlist.sessions WHERE id = ?");
        self.session.query(query, (id,)).await.map_err(db_error)?;
        Ok(())
    }

    async fn find_watchlist_item(
        &self,
        user_id: &str,
        symbol: &str,
    ) -> AppResult<Option<WatchlistItem>> {
        let query = Query::new(
            "SELECT user_id, symbol, company, added_at FROM stock_watchlist.watchlist WHERE user_id = ? AND symbol = ?",
        );
        let result = self
            .session
            .query(query, (user_id, symbol))
            .await
            .map_err(db_error)?;
        Ok(result
            .rows
            .unwrap_or_default()
            .first()
            .map(watchlist_item_from_row))
    }

    async fn insert_watchlist_item(&self, item: &WatchlistItem) -> AppResult<()> {
        let query = Query::new(
            "INSERT INTO stock_watchlist.watchlist (user_id, symbol, company, added_at) VALUES (?, ?, ?, ?)",
        );
        self.session
            .query(
                query,
                (
                    item.user_id.as_str(),
                    item.symbol.as_str(),
                    item.company.as_str(),
                    item.added_at.timestamp_millis(),
                ),
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn delete_watchlist_item(&self, user_id: &str, symbol: &str) -> AppResult<bool> {
        // CQL deletes are blind, so look first to report a missing row.
        if self.find_watchlist_item(user_id, symbol).await?.is_none() {
            return Ok(false);
        }
        let query =
            Query::new("DELETE FROM stock_watchlist.watchlist WHERE user_id = ? AND symbol = ?");
        self.session
            .query(query, (user_id, symbol))
            .await
            .map_err(db_error)?;
        Ok(true)
    }

    async fn list_watchlist(&self, user_id: &str) -> AppResult<Vec<WatchlistItem>> {
        let query = Query::new(
            "SELECT user_id, symbol, company, added_at FROM stock_watchlist.watchlist WHERE user_id = ?",
        );
        let result = self
            .session
            .query(query, (user_id,))
            .await
            .map_err(db_error)?;
        let items: Vec<WatchlistItem> = result
            .rows
            .unwrap_or_default()
            .iter()
            .map(watchlist_item_from_row)
            .collect();
        info!("Fetched {} watchlist records for user: {}", items.len(), user_id);
        Ok(items)
    }
}
