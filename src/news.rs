// src/news.rs
//! Watchlist news: per-symbol company news interleaved round-robin, with
//! deduplicated general market news as the fallback.

use crate::error::{AppError, AppResult};
use crate::market::MarketData;
use crate::models::{MarketNewsArticle, RawNewsArticle};
use chrono::{Duration, NaiveDate, Utc};
use futures::future::join_all;
use log::error;
use std::collections::{HashMap, HashSet, VecDeque};

pub const MAX_ARTICLES: usize = 6;
pub const NEWS_LOOKBACK_DAYS: i64 = 5;

const COMPANY_SUMMARY_CHARS: usize = 200;
const GENERAL_SUMMARY_CHARS: usize = 150;

/// `(from, to)` as `YYYY-MM-DD`, `days` before `today` through `today`.
pub fn date_range(days: i64, today: NaiveDate) -> (String, String) {
    let from = today - Duration::days(days);
    (
        from.format("%Y-%m-%d").to_string(),
        today.format("%Y-%m-%d").to_string(),
    )
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.trim().is_empty())
}

pub fn validate_article(article: &RawNewsArticle) -> bool {
    present(&article.headline)
        && present(&article.summary)
        && present(&article.url)
        && article.datetime.map_or(false, |d| d > 0)
}

/// Expects an article that passed [`validate_article`].
pub fn format_article(
    article: &RawNewsArticle,
    is_company_news: bool,
    symbol: Option<&str>,
    index: usize,
) -> MarketNewsArticle {
    let summary_limit = if is_company_news {
        COMPANY_SUMMARY_CHARS
    } else {
        GENERAL_SUMMARY_CHARS
    };
    let summary: String = article
        .summary
        .as_deref()
        .unwrap_or_default()
        .trim()
        .chars()
        .take(summary_limit)
        .collect();

    let index = index as i64;
    let id = match (article.id, is_company_news) {
        (Some(id), true) => id,
        (Some(id), false) => id + index,
        (None, _) => index,
    };

    let source = article
        .source
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            if is_company_news {
                "Company News".to_string()
            } else {
                "Market News".to_string()
            }
        });

    let (category, related) = if is_company_news {
        (
            "company".to_string(),
            symbol.unwrap_or_default().to_string(),
        )
    } else {
        (
            article
                .category
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "general".to_string()),
            article.related.clone().unwrap_or_default(),
        )
    };

    MarketNewsArticle {
        id,
        headline: article.headline.as_deref().unwrap_or_default().trim().to_string(),
        summary: format!("{}...", summary),
        source,
        url: article.url.clone().unwrap_or_default(),
        datetime: article.datetime.unwrap_or_default(),
        image: article.image.clone().unwrap_or_default(),
        category,
        related,
    }
}

/// Trims, upper-cases and de-duplicates symbols, keeping first-seen order.
pub fn clean_symbols(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn newest_first(mut articles: Vec<MarketNewsArticle>) -> Vec<MarketNewsArticle> {
    articles.sort_by(|a, b| b.datetime.cmp(&a.datetime));
    articles.truncate(MAX_ARTICLES);
    articles
}

/// Takes one article per round from `symbols[round % n]`, for at most
/// [`MAX_ARTICLES`] rounds. Rounds landing on an exhausted symbol are spent.
pub fn interleave_company_news(
    symbols: &[String],
    mut per_symbol: HashMap<String, VecDeque<RawNewsArticle>>,
) -> Vec<MarketNewsArticle> {
    if symbols.is_empty() {
        return Vec::new();
    }

    let mut collected = Vec::with_capacity(MAX_ARTICLES);
    let mut round = 0;
    while round < MAX_ARTICLES && collected.len() < MAX_ARTICLES {
        let symbol = &symbols[round % symbols.len()];
        if let Some(article) = per_symbol.get_mut(symbol).and_then(|queue| queue.pop_front()) {
            collected.push(format_article(
                &article,
                true,
                Some(symbol.as_str()),
                collected.len(),
            ));
        }
        round += 1;
    }
    newest_first(collected)
}

/// Walks general news in order, dropping invalid articles and repeats of an
/// id, url or headline already taken.
pub fn dedupe_general_news(articles: &[RawNewsArticle]) -> Vec<MarketNewsArticle> {
    let mut seen_ids = HashSet::new();
    let mut seen_urls = HashSet::new();
    let mut seen_headlines = HashSet::new();
    let mut deduped = Vec::with_capacity(MAX_ARTICLES);

    for article in articles {
        if deduped.len() >= MAX_ARTICLES {
            break;
        }
        if !validate_article(article) {
            continue;
        }

        let id = article.id.filter(|id| *id != 0);
        let url = article.url.as_deref().unwrap_or_default();
        let headline = article.headline.as_deref().unwrap_or_default();

        if id.map_or(false, |id| seen_ids.contains(&id))
            || (!url.is_empty() && seen_urls.contains(url))
            || (!headline.is_empty() && seen_headlines.contains(headline))
        {
            continue;
        }

        if let Some(id) = id {
            seen_ids.insert(id);
        }
        if !url.is_empty() {
            seen_urls.insert(url);
        }
        if !headline.is_empty() {
            seen_headlines.insert(headline);
        }

        deduped.push(format_article(article, false, None, deduped.len()));
    }
    newest_first(deduped)
}

async fn fetch_company_news(market: &dyn MarketData, symbols: &[String]) -> Vec<MarketNewsArticle> {
    if symbols.is_empty() {
        return Vec::new();
    }

    let (from, to) = date_range(NEWS_LOOKBACK_DAYS, Utc::now().date_naive());
    let fetches = symbols.iter().map(|symbol| {
        let (from, to) = (from.as_str(), to.as_str());
        async move {
            let articles: VecDeque<RawNewsArticle> = match market.company_news(symbol, from, to).await {
                Ok(articles) => articles.into_iter().filter(validate_article).collect(),
                Err(e) => {
                    error!("Error fetching company news for {}: {}", symbol, e);
                    VecDeque::new()
                }
            };
            (symbol.clone(), articles)
        }
    });

    let per_symbol: HashMap<String, VecDeque<RawNewsArticle>> =
        join_all(fetches).await.into_iter().collect();
    interleave_company_news(symbols, per_symbol)
}

/// Up to [`MAX_ARTICLES`] articles about `symbols`, or general market news
/// when there are no symbols or none of them has news.
pub async fn get_news(
    market: &dyn MarketData,
    symbols: Option<&[String]>,
) -> AppResult<Vec<MarketNewsArticle>> {
    if !market.is_configured() {
        error!("Finnhub API key is not configured");
        return Err(AppError::Upstream("Failed to fetch news".to_string()));
    }

    let symbols = clean_symbols(symbols.unwrap_or_default());
    let company_news = fetch_company_news(market, &symbols).await;
    if !company_news.is_empty() {
        return Ok(company_news);
    }

    match market.general_news().await {
        Ok(articles) => Ok(dedupe_general_news(&articles)),
        Err(e) => {
            error!("Error in get_news: {}", e);
            Err(AppError::Upstream("Failed to fetch news".to_string()))
        }
    }
}
