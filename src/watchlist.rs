// src/watchlist.rs
use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::models::{UserForNewsEmail, WatchlistEntry, WatchlistItem};
use chrono::Utc;
use log::{error, info};

pub const ALREADY_IN_WATCHLIST: &str = "Stock already in watchlist";
pub const NOT_IN_WATCHLIST: &str = "Stock not found in watchlist";

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Adds `symbol` for the user. Duplicates are caught by a lookup before the
/// insert, so two racing requests can both succeed; the row key keeps one.
pub async fn add_to_watchlist(
    store: &dyn Store,
    user_id: &str,
    symbol: &str,
    company: &str,
) -> AppResult<()> {
    let symbol = normalize_symbol(symbol);
    if user_id.is_empty() || symbol.is_empty() {
        return Err(AppError::Validation(
            "User and symbol are required".to_string(),
        ));
    }

    if store.find_watchlist_item(user_id, &symbol).await?.is_some() {
        return Err(AppError::Conflict(ALREADY_IN_WATCHLIST.to_string()));
    }

    let company = match company.trim() {
        "" => symbol.clone(),
        name => name.to_string(),
    };
    store
        .insert_watchlist_item(&WatchlistItem {
            user_id: user_id.to_string(),
            symbol: symbol.clone(),
            company,
            added_at: Utc::now(),
        })
        .await?;
    info!("Added {} to watchlist of user {}.", symbol, user_id);
    Ok(())
}

pub async fn remove_from_watchlist(store: &dyn Store, user_id: &str, symbol: &str) -> AppResult<()> {
    let symbol = normalize_symbol(symbol);
    if !store.delete_watchlist_item(user_id, &symbol).await? {
        return Err(AppError::NotFound(NOT_IN_WATCHLIST.to_string()));
    }
    info!("Removed {} from watchlist of user {}.", symbol, user_id);
    Ok(())
}

/// Newest first. Store failures are logged and read as an empty list.
pub async fn get_user_watchlist(store: &dyn Store, user_id: &str) -> Vec<WatchlistEntry> {
    match store.list_watchlist(user_id).await {
        Ok(mut items) => {
            items.sort_by(|a, b| b.added_at.cmp(&a.added_at));
            items.into_iter().map(WatchlistEntry::from).collect()
        }
        Err(e) => {
            error!("Error fetching watchlist for user {}: {}", user_id, e);
            Vec::new()
        }
    }
}

pub async fn check_watchlist_status(store: &dyn Store, user_id: &str, symbol: &str) -> bool {
    match store
        .find_watchlist_item(user_id, &normalize_symbol(symbol))
        .await
    {
        Ok(item) => item.is_some(),
        Err(e) => {
            error!("Error checking watchlist status for {}: {}", symbol, e);
            false
        }
    }
}

pub async fn get_watchlist_symbols_by_email(store: &dyn Store, email: &str) -> Vec<String> {
    if email.is_empty() {
        return Vec::new();
    }

    let user = match store.find_user_by_email(email).await {
        Ok(Some(user)) if !user.id.is_empty() => user,
        Ok(_) => return Vec::new(),
        Err(e) => {
            error!("Error fetching watchlist symbols by email: {}", e);
            return Vec::new();
        }
    };

    get_user_watchlist(store, &user.id)
        .await
        .into_iter()
        .map(|entry| entry.symbol)
        .collect()
}

pub async fn get_all_users_for_news_email(store: &dyn Store) -> AppResult<Vec<UserForNewsEmail>> {
    let users = store.list_users().await?;
    Ok(users
        .into_iter()
        .filter(|u| !u.email.is_empty() && !u.name.is_empty())
        .map(|u| UserForNewsEmail {
            id: u.id,
            email: u.email,
            name: u.name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::User;

    fn user(id: &str, email: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            password_hash: String::new(),
            country: String::new(),
            investment_goals: String::new(),
            risk_tolerance: String::new(),
            preferred_industry: String::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn adding_a_duplicate_symbol_fails() {
        let store = MemoryStore::new();
        add_to_watchlist(&store, "u1", "aapl", "Apple Inc").await.unwrap();

        let err = add_to_watchlist(&store, "u1", "AAPL", "Apple Inc")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.to_string(), ALREADY_IN_WATCHLIST);

        // Another user may hold the same symbol.
        add_to_watchlist(&store, "u2", "AAPL", "Apple Inc").await.unwrap();
    }

    #[tokio::test]
    async fn removing_a_missing_symbol_fails() {
        let store = MemoryStore::new();
        let err = remove_from_watchlist(&store, "u1", "TSLA").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.to_string(), NOT_IN_WATCHLIST);

        add_to_watchlist(&store, "u1", "TSLA", "Tesla").await.unwrap();
        remove_from_watchlist(&store, "u1", "tsla").await.unwrap();
        assert!(!check_watchlist_status(&store, "u1", "TSLA").await);
    }

    #[tokio::test]
    async fn empty_symbol_is_rejected() {
        let store = MemoryStore::new();
        let err = add_to_watchlist(&store, "u1", "  ", "").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn watchlist_is_listed_newest_first() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for (i, symbol) in ["MSFT", "NVDA", "AMZN"].iter().enumerate() {
            store
                .insert_watchlist_item(&WatchlistItem {
                    user_id: "u1".to_string(),
                    symbol: symbol.to_string(),
                    company: symbol.to_string(),
                    added_at: base + chrono::Duration::seconds(i as i64),
                })
                .await
                .unwrap();
        }

        let symbols: Vec<String> = get_user_watchlist(&store, "u1")
            .await
            .into_iter()
            .map(|e| e.symbol)
            .collect();
        assert_eq!(symbols, vec!["AMZN", "NVDA", "MSFT"]);
    }

    #[tokio::test]
    async fn company_defaults_to_symbol() {
        let store = MemoryStore::new();
        add_to_watchlist(&store, "u1", "META", "").await.unwrap();
        let entries = get_user_watchlist(&store, "u1").await;
        assert_eq!(entries[0].company, "META");
    }

    #[tokio::test]
    async fn symbols_by_email_resolve_the_user() {
        let store = MemoryStore::new();
        store.insert_user(&user("u1", "a@x.com", "Ann")).await.unwrap();
        add_to_watchlist(&store, "u1", "AAPL", "Apple").await.unwrap();

        assert_eq!(
            get_watchlist_symbols_by_email(&store, "a@x.com").await,
            vec!["AAPL".to_string()]
        );
        assert!(get_watchlist_symbols_by_email(&store, "nobody@x.com")
            .await
            .is_empty());
        assert!(get_watchlist_symbols_by_email(&store, "").await.is_empty());
    }

    #[tokio::test]
    async fn news_recipients_need_email_and_name() {
        let store = MemoryStore::new();
        store.insert_user(&user("u1", "a@x.com", "Ann")).await.unwrap();
        store.insert_user(&user("u2", "b@x.com", "")).await.unwrap();

        let users = get_all_users_for_news_email(&store).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "a@x.com");
    }
}
