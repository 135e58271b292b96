// src/market.rs
use crate::cache::ResponseCache;
use crate::error::{AppError, AppResult};
use crate::models::{
    CompanyProfile, FinnhubSearchResponse, FinnhubSearchResult, RawNewsArticle, StockSearchResult,
};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, error, info};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;

pub const PROFILE_REVALIDATE_SECS: u64 = 3600;
pub const SEARCH_REVALIDATE_SECS: u64 = 1800;
pub const NEWS_REVALIDATE_SECS: u64 = 600;

const POPULAR_PICK: usize = 10;
const MAX_SEARCH_RESULTS: usize = 15;

pub const POPULAR_STOCK_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META", "NVDA", "NFLX", "ORCL", "CRM", "ADBE",
    "INTC", "AMD", "PYPL", "UBER", "ZM", "SPOT", "SQ", "SHOP", "ROKU",
];

/// Market-data lookups the rest of the service depends on.
#[async_trait]
pub trait MarketData: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn search(&self, query: &str) -> AppResult<Vec<FinnhubSearchResult>>;
    async fn company_profile(&self, symbol: &str) -> AppResult<CompanyProfile>;
    async fn company_news(&self, symbol: &str, from: &str, to: &str)
        -> AppResult<Vec<RawNewsArticle>>;
    async fn general_news(&self) -> AppResult<Vec<RawNewsArticle>>;
}

pub struct FinnhubClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    cache: ResponseCache,
}

impl FinnhubClient {
    pub fn new(http: Client, base_url: &str, api_key: Option<String>) -> Self {
        FinnhubClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            cache: ResponseCache::default(),
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> AppResult<Url> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Upstream("Finnhub API key is not configured".to_string()))?;
        let mut pairs: Vec<(&str, &str)> = params.to_vec();
        pairs.push(("token", api_key));
        Url::parse_with_params(&format!("{}{}", self.base_url, path), &pairs)
            .map_err(|e| AppError::Upstream(format!("bad market-data URL: {}", e)))
    }

    /// GETs `url` and decodes its JSON body. With a revalidate window the
    /// decoded body is reused for that many seconds.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: Url,
        revalidate_secs: Option<u64>,
    ) -> AppResult<T> {
        let key = url.to_string();
        if revalidate_secs.is_some() {
            if let Some(value) = self.cache.get(&key).await {
                debug!("Serving {} from cache", url.path());
                return serde_json::from_value(value)
                    .map_err(|e| AppError::Upstream(e.to_string()));
            }
        }

        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "Failed to fetch {}: {}",
                redacted(&url),
                status
            )));
        }

        let value: serde_json::Value = response.json().await?;
        if let Some(secs) = revalidate_secs {
            self.cache
                .insert(key, value.clone(), Duration::from_secs(secs))
                .await;
            debug!("Cached {} ({} entries)", url.path(), self.cache.len());
        }
        serde_json::from_value(value).map_err(|e| AppError::Upstream(e.to_string()))
    }
}

/// `url` without its `token` query parameter, for logs and errors.
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        shown.set_query(None);
    } else {
        shown.query_pairs_mut().clear().extend_pairs(kept);
    }
    shown.to_string()
}

#[async_trait]
impl MarketData for FinnhubClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, query: &str) -> AppResult<Vec<FinnhubSearchResult>> {
        let url = self.url("/search", &[("q", query)])?;
        let response: FinnhubSearchResponse =
            self.fetch_json(url, Some(SEARCH_REVALIDATE_SECS)).await?;
        Ok(response.result)
    }

    async fn company_profile(&self, symbol: &str) -> AppResult<CompanyProfile> {
        let url = self.url("/stock/profile2", &[("symbol", symbol)])?;
        self.fetch_json(url, Some(PROFILE_REVALIDATE_SECS)).await
    }

    async fn company_news(
        &self,
        symbol: &str,
        from: &str,
        to: &str,
    ) -> AppResult<Vec<RawNewsArticle>> {
        let url = self.url(
            "/company-news",
            &[("symbol", symbol), ("from", from), ("to", to)],
        )?;
        self.fetch_json(url, Some(NEWS_REVALIDATE_SECS)).await
    }

    async fn general_news(&self) -> AppResult<Vec<RawNewsArticle>> {
        let url = self.url("/news", &[("category", "general")])?;
        self.fetch_json(url, Some(NEWS_REVALIDATE_SECS)).await
    }
}

fn to_search_result(raw: FinnhubSearchResult) -> StockSearchResult {
    let symbol = raw.symbol.to_uppercase();
    let name = raw
        .description
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| symbol.clone());
    let exchange = raw
        .display_symbol
        .filter(|d| !d.is_empty())
        .or(raw.exchange)
        .unwrap_or_else(|| "US".to_string());
    let kind = raw
        .kind
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Stock".to_string());
    StockSearchResult {
        symbol,
        name,
        exchange,
        kind,
        is_in_watchlist: false,
    }
}

async fn popular_stocks(market: &dyn MarketData) -> Vec<FinnhubSearchResult> {
    let lookups = POPULAR_STOCK_SYMBOLS
        .iter()
        .take(POPULAR_PICK)
        .map(|symbol| async move {
            match market.company_profile(symbol).await {
                Ok(profile) => Some((symbol.to_uppercase(), profile)),
                Err(e) => {
                    error!("Error fetching profile for {}: {}", symbol, e);
                    None
                }
            }
        });

    join_all(lookups)
        .await
        .into_iter()
        .flatten()
        .filter_map(|(symbol, profile)| {
            let name = profile
                .name
                .filter(|n| !n.is_empty())
                .or(profile.ticker.filter(|t| !t.is_empty()))?;
            Some(FinnhubSearchResult {
                symbol,
                description: Some(name),
                display_symbol: None,
                kind: Some("Common Stock".to_string()),
                exchange: profile.exchange,
            })
        })
        .collect()
}

/// Popular stocks for an empty query, otherwise symbol search.
/// Failures read as no results.
pub async fn search_stocks(market: &dyn MarketData, query: Option<&str>) -> Vec<StockSearchResult> {
    if !market.is_configured() {
        error!("Finnhub API key is not configured");
        return Vec::new();
    }

    let trimmed = query.map(str::trim).unwrap_or_default();
    let results = if trimmed.is_empty() {
        popular_stocks(market).await
    } else {
        match market.search(trimmed).await {
            Ok(results) => results,
            Err(e) => {
                error!("Error in stock search for '{}': {}", trimmed, e);
                return Vec::new();
            }
        }
    };

    let mapped: Vec<StockSearchResult> = results
        .into_iter()
        .map(to_search_result)
        .take(MAX_SEARCH_RESULTS)
        .collect();
    info!("Stock search '{}' returned {} results", trimmed, mapped.len());
    mapped
}

/// Marks results whose symbol is in `watchlist` (compared upper-cased).
pub fn mark_watchlisted(results: &mut [StockSearchResult], watchlist: &[String]) {
    let symbols: HashSet<String> = watchlist.iter().map(|s| s.to_uppercase()).collect();
    for result in results.iter_mut() {
        result.is_in_watchlist = symbols.contains(&result.symbol.to_uppercase());
    }
}

pub async fn get_company_name(market: &dyn MarketData, symbol: &str) -> String {
    match market.company_profile(symbol).await {
        Ok(profile) => profile
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| symbol.to_string()),
        Err(e) => {
            error!("Error fetching company profile for {}: {}", symbol, e);
            symbol.to_string()
        }
    }
}
