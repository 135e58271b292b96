// src/api.rs
use crate::auth::{parse_bearer, AuthService, AuthUser};
use crate::db::Store;
use crate::error::{reject, AppError, CustomError};
use crate::market::{mark_watchlisted, search_stocks, MarketData};
use crate::models::{ActionResult, AddWatchlistRequest, SignInRequest, SignUpRequest};
use crate::news::get_news;
use crate::stock::stock_details;
use crate::watchlist::{
    add_to_watchlist, check_watchlist_status, get_user_watchlist, remove_from_watchlist,
};
use crate::workflow::{Event, EventBus};
use log::{error, info};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub market: Arc<dyn MarketData>,
    pub auth: AuthService,
    pub events: EventBus,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let sign_up = warp::path!("auth" / "sign-up")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(sign_up_handler);

    let sign_in = warp::path!("auth" / "sign-in")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(sign_in_handler);

    let sign_out = warp::path!("auth" / "sign-out")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(with_auth(state.auth.clone()))
        .and_then(sign_out_handler);

    let search = warp::path!("search")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(with_auth(state.auth.clone()))
        .and(warp::query::<HashMap<String, String>>())
        .and_then(search_handler);

    let details = warp::path!("stocks" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(with_optional_auth(state.auth.clone()))
        .and_then(stock_details_handler);

    let list = warp::path!("watchlist")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(with_auth(state.auth.clone()))
        .and_then(list_watchlist_handler);

    let add = warp::path!("watchlist")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(with_auth(state.auth.clone()))
        .and(warp::body::json())
        .and_then(add_watchlist_handler);

    let status = warp::path!("watchlist" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(with_auth(state.auth.clone()))
        .and_then(watchlist_status_handler);

    let remove = warp::path!("watchlist" / String)
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and(with_auth(state.auth.clone()))
        .and_then(remove_watchlist_handler);

    let news = warp::path!("news")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(with_auth(state.auth.clone()))
        .and(warp::query::<HashMap<String, String>>())
        .and_then(news_handler);

    let daily_news = warp::path!("jobs" / "daily-news")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(with_auth(state.auth.clone()))
        .and_then(daily_news_handler);

    sign_up
        .or(sign_in)
        .or(sign_out)
        .or(search)
        .or(details)
        .or(list)
        .or(add)
        .or(status)
        .or(remove)
        .or(news)
        .or(daily_news)
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_auth(auth: AuthService) -> impl Filter<Extract = (AuthUser,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::any().map(move || auth.clone()))
        .and_then(authorize)
}

fn with_optional_auth(
    auth: AuthService,
) -> impl Filter<Extract = (Option<AuthUser>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::any().map(move || auth.clone()))
        .and_then(authorize_optional)
}

async fn authorize(header: Option<String>, auth: AuthService) -> Result<AuthUser, Rejection> {
    let token = header
        .as_deref()
        .and_then(parse_bearer)
        .ok_or_else(|| reject(CustomError::unauthorized()))?;
    auth.authenticate(token).await.map_err(|e| {
        info!("Rejected bearer token: {}", e);
        reject(CustomError::unauthorized())
    })
}

/// Anonymous when the header is missing or the token no longer holds.
async fn authorize_optional(
    header: Option<String>,
    auth: AuthService,
) -> Result<Option<AuthUser>, Rejection> {
    match header.as_deref().and_then(parse_bearer) {
        Some(token) => Ok(auth.authenticate(token).await.ok()),
        None => Ok(None),
    }
}

fn action_reply(result: Result<(), AppError>, success: &str, created: bool) -> impl Reply {
    let (status, body) = match result {
        Ok(()) if created => (StatusCode::CREATED, ActionResult::ok(success)),
        Ok(()) => (StatusCode::OK, ActionResult::ok(success)),
        Err(e) => (e.status(), ActionResult::failed(e.to_string())),
    };
    warp::reply::with_status(warp::reply::json(&body), status)
}

async fn sign_up_handler(state: AppState, req: SignUpRequest) -> Result<impl Reply, Rejection> {
    match state.auth.sign_up(req).await {
        Ok(res) => Ok(warp::reply::with_status(
            warp::reply::json(&res),
            StatusCode::CREATED,
        )),
        Err(e) => {
            error!("Sign up failed: {}", e);
            Err(reject(e))
        }
    }
}

async fn sign_in_handler(state: AppState, req: SignInRequest) -> Result<impl Reply, Rejection> {
    match state.auth.sign_in(req).await {
        Ok(res) => Ok(warp::reply::json(&res)),
        Err(e) => {
            error!("Sign in failed: {}", e);
            Err(reject(e))
        }
    }
}

async fn sign_out_handler(state: AppState, user: AuthUser) -> Result<impl Reply, Rejection> {
    match state.auth.sign_out(&user).await {
        Ok(()) => Ok(warp::reply::json(&json!({ "success": true }))),
        Err(e) => Err(reject(e)),
    }
}

async fn search_handler(
    state: AppState,
    user: AuthUser,
    params: HashMap<String, String>,
) -> Result<impl Reply, Rejection> {
    let mut results = search_stocks(state.market.as_ref(), params.get("q").map(String::as_str)).await;
    let watchlist: Vec<String> = get_user_watchlist(state.store.as_ref(), &user.id)
        .await
        .into_iter()
        .map(|entry| entry.symbol)
        .collect();
    mark_watchlisted(&mut results, &watchlist);
    Ok(warp::reply::json(&results))
}

async fn stock_details_handler(
    symbol: String,
    state: AppState,
    user: Option<AuthUser>,
) -> Result<impl Reply, Rejection> {
    let details = stock_details(
        state.store.as_ref(),
        state.market.as_ref(),
        &symbol,
        user.as_ref().map(|u| u.id.as_str()),
    )
    .await;
    Ok(warp::reply::json(&details))
}

async fn list_watchlist_handler(state: AppState, user: AuthUser) -> Result<impl Reply, Rejection> {
    let items = get_user_watchlist(state.store.as_ref(), &user.id).await;
    info!("Watchlist retrieved for user {}.", user.id);
    Ok(warp::reply::json(&items))
}

async fn add_watchlist_handler(
    state: AppState,
    user: AuthUser,
    req: AddWatchlistRequest,
) -> Result<impl Reply, Rejection> {
    let result = add_to_watchlist(state.store.as_ref(), &user.id, &req.symbol, &req.company).await;
    if let Err(e) = &result {
        error!("Failed to add {} to watchlist: {}", req.symbol, e);
    }
    Ok(action_reply(result, "Added to watchlist", true))
}

async fn watchlist_status_handler(
    symbol: String,
    state: AppState,
    user: AuthUser,
) -> Result<impl Reply, Rejection> {
    let in_watchlist = check_watchlist_status(state.store.as_ref(), &user.id, &symbol).await;
    Ok(warp::reply::json(&json!({
        "symbol": symbol.to_uppercase(),
        "isInWatchlist": in_watchlist,
    })))
}

async fn remove_watchlist_handler(
    symbol: String,
    state: AppState,
    user: AuthUser,
) -> Result<impl Reply, Rejection> {
    let result = remove_from_watchlist(state.store.as_ref(), &user.id, &symbol).await;
    if let Err(e) = &result {
        error!("Failed to remove {} from watchlist: {}", symbol, e);
    }
    Ok(action_reply(result, "Removed from watchlist", false))
}

async fn news_handler(
    state: AppState,
    _user: AuthUser,
    params: HashMap<String, String>,
) -> Result<impl Reply, Rejection> {
    let symbols: Option<Vec<String>> = params
        .get("symbols")
        .map(|raw| raw.split(',').map(str::to_string).collect());
    match get_news(state.market.as_ref(), symbols.as_deref()).await {
        Ok(news) => Ok(warp::reply::json(&news)),
        Err(e) => {
            error!("Failed to fetch news: {}", e);
            Err(reject(CustomError::new(
                StatusCode::BAD_GATEWAY,
                "Failed to fetch news",
            )))
        }
    }
}

async fn daily_news_handler(state: AppState, user: AuthUser) -> Result<impl Reply, Rejection> {
    state
        .events
        .publish(Event::SendDailyNews)
        .map_err(reject)?;
    info!("Daily news run requested by user {}.", user.id);
    Ok(warp::reply::with_status(
        warp::reply::json(&ActionResult::ok("Daily news summary queued")),
        StatusCode::ACCEPTED,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::handle_rejection;
    use crate::market::testing::StubMarket;
    use crate::memory::MemoryStore;
    use crate::models::{AuthResponse, CompanyProfile, FinnhubSearchResult, StockSearchResult, WatchlistEntry};
    use chrono::Duration;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct Harness {
        state: AppState,
        rx: mpsc::Receiver<Event>,
    }

    fn harness(market: StubMarket) -> Harness {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let (events, rx) = EventBus::channel(16);
        let auth = AuthService::new(
            store.clone(),
            Arc::new("route-secret".to_string()),
            Duration::hours(1),
            events.clone(),
        );
        Harness {
            state: AppState {
                store,
                market: Arc::new(market),
                auth,
                events,
            },
            rx,
        }
    }

    async fn sign_up(state: &AppState, email: &str) -> String {
        let api = routes(state.clone()).recover(handle_rejection);
        let res = warp::test::request()
            .method("POST")
            .path("/auth/sign-up")
            .json(&json!({
                "email": email,
                "password": "hunter2hunter2",
                "full_name": "Test User",
                "country": "US"
            }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: AuthResponse = serde_json::from_slice(res.body()).unwrap();
        body.token
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    #[tokio::test]
    async fn sign_up_queues_the_welcome_event() {
        let mut h = harness(StubMarket::configured());
        sign_up(&h.state, "new@example.com").await;
        assert!(matches!(h.rx.try_recv(), Ok(Event::UserCreated(_))));
    }

    #[tokio::test]
    async fn bad_sign_in_is_unauthorized_with_friendly_error() {
        let h = harness(StubMarket::configured());
        sign_up(&h.state, "a@example.com").await;
        let api = routes(h.state.clone()).recover(handle_rejection);

        let res = warp::test::request()
            .method("POST")
            .path("/auth/sign-in")
            .json(&json!({ "email": "a@example.com", "password": "nope-nope" }))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "Invalid email or password. Please check your credentials and try again."
        );
    }

    #[tokio::test]
    async fn watchlist_requires_a_session() {
        let h = harness(StubMarket::configured());
        let api = routes(h.state.clone()).recover(handle_rejection);

        let res = warp::test::request()
            .method("GET")
            .path("/watchlist")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = warp::test::request()
            .method("GET")
            .path("/watchlist")
            .header("authorization", "Bearer not-a-jwt")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn watchlist_add_list_remove_round() {
        let h = harness(StubMarket::configured());
        let token = sign_up(&h.state, "w@example.com").await;
        let api = routes(h.state.clone()).recover(handle_rejection);

        let add = |symbol: &'static str| {
            warp::test::request()
                .method("POST")
                .path("/watchlist")
                .header("authorization", bearer(&token))
                .json(&json!({ "symbol": symbol, "company": "Apple Inc" }))
        };

        let res = add("aapl").reply(&api).await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = add("AAPL").reply(&api).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let body: ActionResult = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, ActionResult::failed("Stock already in watchlist"));

        let res = warp::test::request()
            .method("GET")
            .path("/watchlist")
            .header("authorization", bearer(&token))
            .reply(&api)
            .await;
        let items: Vec<WatchlistEntry> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].symbol, "AAPL");

        let res = warp::test::request()
            .method("GET")
            .path("/watchlist/aapl")
            .header("authorization", bearer(&token))
            .reply(&api)
            .await;
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["isInWatchlist"], true);

        let remove = || {
            warp::test::request()
                .method("DELETE")
                .path("/watchlist/AAPL")
                .header("authorization", bearer(&token))
        };
        assert_eq!(remove().reply(&api).await.status(), StatusCode::OK);

        let res = remove().reply(&api).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: ActionResult = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.message, "Stock not found in watchlist");
    }

    #[tokio::test]
    async fn sign_out_ends_the_session() {
        let h = harness(StubMarket::configured());
        let token = sign_up(&h.state, "out@example.com").await;
        let api = routes(h.state.clone()).recover(handle_rejection);

        let res = warp::test::request()
            .method("POST")
            .path("/auth/sign-out")
            .header("authorization", bearer(&token))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = warp::test::request()
            .method("GET")
            .path("/watchlist")
            .header("authorization", bearer(&token))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn search_marks_watchlisted_results() {
        let mut market = StubMarket::configured();
        market.search_results = vec![
            FinnhubSearchResult {
                symbol: "AAPL".into(),
                description: Some("APPLE INC".into()),
                ..Default::default()
            },
            FinnhubSearchResult {
                symbol: "APLE".into(),
                description: Some("APPLE HOSPITALITY REIT".into()),
                ..Default::default()
            },
        ];
        let h = harness(market);
        let token = sign_up(&h.state, "s@example.com").await;
        let api = routes(h.state.clone()).recover(handle_rejection);

        warp::test::request()
            .method("POST")
            .path("/watchlist")
            .header("authorization", bearer(&token))
            .json(&json!({ "symbol": "AAPL", "company": "Apple" }))
            .reply(&api)
            .await;

        let res = warp::test::request()
            .method("GET")
            .path("/search?q=apple")
            .header("authorization", bearer(&token))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let results: Vec<StockSearchResult> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_in_watchlist);
        assert!(!results[1].is_in_watchlist);
    }

    #[tokio::test]
    async fn stock_details_work_anonymously() {
        let mut market = StubMarket::configured();
        market.profiles.insert(
            "TSLA".into(),
            CompanyProfile {
                name: Some("Tesla Inc".into()),
                ..Default::default()
            },
        );
        let h = harness(market);
        let api = routes(h.state.clone()).recover(handle_rejection);

        let res = warp::test::request()
            .method("GET")
            .path("/stocks/tsla")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["symbol"], "TSLA");
        assert_eq!(body["company"], "Tesla Inc");
        assert_eq!(body["isInWatchlist"], false);
        assert_eq!(body["widgets"].as_array().map(Vec::len), Some(6));
    }

    #[tokio::test]
    async fn news_failure_is_a_bad_gateway() {
        let h = harness(StubMarket::configured());
        let token = sign_up(&h.state, "n@example.com").await;
        let api = routes(h.state.clone()).recover(handle_rejection);

        let res = warp::test::request()
            .method("GET")
            .path("/news?symbols=AAPL,MSFT")
            .header("authorization", bearer(&token))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["error"], "Failed to fetch news");
    }

    #[tokio::test]
    async fn daily_news_can_be_triggered() {
        let mut h = harness(StubMarket::configured());
        let token = sign_up(&h.state, "j@example.com").await;
        let _ = h.rx.try_recv();
        let api = routes(h.state.clone()).recover(handle_rejection);

        let res = warp::test::request()
            .method("POST")
            .path("/jobs/daily-news")
            .header("authorization", bearer(&token))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(h.rx.try_recv(), Ok(Event::SendDailyNews));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let h = harness(StubMarket::configured());
        let api = routes(h.state.clone()).recover(handle_rejection);
        let res = warp::test::request()
            .method("GET")
            .path("/portfolio")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
