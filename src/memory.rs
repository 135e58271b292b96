// src/memory.rs
use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::models::{Session, User, WatchlistItem};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store used with `STORE=memory` and throughout the tests.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    sessions: RwLock<HashMap<String, Session>>,
    watchlist: RwLock<HashMap<(String, String), WatchlistItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> AppResult<()> {
        match self.users.write().await.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(
                "User with this email already exists".to_string(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(())
            }
        }
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn insert_session(&self, session: &Session) -> AppResult<()> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, id: &str) -> AppResult<Option<Session>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .read()
            .await
            .get(id)
            .filter(|s| s.expires_at > now)
            .cloned())
    }

    async fn delete_session(&self, id: &str) -> AppResult<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn find_watchlist_item(
        &self,
        user_id: &str,
        symbol: &str,
    ) -> AppResult<Option<WatchlistItem>> {
        let key = (user_id.to_string(), symbol.to_string());
        Ok(self.watchlist.read().await.get(&key).cloned())
    }

    async fn insert_watchlist_item(&self, item: &WatchlistItem) -> AppResult<()> {
        let key = (item.user_id.clone(), item.symbol.clone());
        self.watchlist.write().await.insert(key, item.clone());
        Ok(())
    }

    async fn delete_watchlist_item(&self, user_id: &str, symbol: &str) -> AppResult<bool> {
        let key = (user_id.to_string(), symbol.to_string());
        Ok(self.watchlist.write().await.remove(&key).is_some())
    }

    async fn list_watchlist(&self, user_id: &str) -> AppResult<Vec<WatchlistItem>> {
        Ok(self
            .watchlist
            .read()
            .await
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect())
    }
}
