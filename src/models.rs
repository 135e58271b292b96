// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Argon2 PHC string; carries its own salt and parameters.
    pub password_hash: String,
    pub country: String,
    pub investment_goals: String,
    pub risk_tolerance: String,
    pub preferred_industry: String,
    pub created_at: DateTime<Utc>,
}

/// What the API exposes about a user; never carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub name: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        PublicUser {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub investment_goals: String,
    #[serde(default)]
    pub risk_tolerance: String,
    #[serde(default)]
    pub preferred_industry: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchlistItem {
    pub user_id: String,
    pub symbol: String,
    pub company: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistEntry {
    pub symbol: String,
    pub company: String,
    pub added_at: String,
}

impl From<WatchlistItem> for WatchlistEntry {
    fn from(item: WatchlistItem) -> Self {
        WatchlistEntry {
            symbol: item.symbol,
            company: item.company,
            added_at: item.added_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddWatchlistRequest {
    pub symbol: String,
    #[serde(default)]
    pub company: String,
}

/// Outcome of a watchlist mutation, mirrored to the client as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        ActionResult {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ActionResult {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockSearchResult {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_in_watchlist: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub exchange: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinnhubSearchResult {
    #[serde(default)]
    pub symbol: String,
    pub description: Option<String>,
    pub display_symbol: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    // Filled from the company profile on the popular-stocks path.
    #[serde(skip)]
    pub exchange: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinnhubSearchResponse {
    #[serde(default)]
    pub result: Vec<FinnhubSearchResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawNewsArticle {
    pub id: Option<i64>,
    pub headline: Option<String>,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub datetime: Option<i64>,
    pub image: Option<String>,
    pub category: Option<String>,
    pub related: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketNewsArticle {
    pub id: i64,
    pub headline: String,
    pub summary: String,
    pub source: String,
    pub url: String,
    pub datetime: i64,
    pub image: String,
    pub category: String,
    pub related: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserForNewsEmail {
    pub id: String,
    pub email: String,
    pub name: String,
}
