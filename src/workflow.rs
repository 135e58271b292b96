// src/workflow.rs
//! Background email workflow: a bounded event channel drained by one worker.
use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::llm::TextGenerator;
use crate::mailer::{news_summary_email, welcome_email, Mailer};
use crate::market::MarketData;
use crate::models::{ActionResult, MarketNewsArticle, UserForNewsEmail};
use crate::news::{get_news, MAX_ARTICLES};
use crate::watchlist::{get_all_users_for_news_email, get_watchlist_symbols_by_email};
use chrono::Utc;
use futures::future::join_all;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_WELCOME_INTRO: &str =
    "Thanks for joining Signalist. You now have the tools to track markets and make smarter moves.";
pub const NO_MARKET_NEWS: &str = "No market news.";

pub const WELCOME_EMAIL_PROMPT: &str = r#"Write the personalized opening of a welcome email for a new user of Signalist, a stock market watchlist and news app.

User profile:
{{userProfile}}

Requirements:
- Return one HTML paragraph: <p class="mobile-text" style="margin: 0 0 30px 0; font-size: 16px; line-height: 1.6; color: #CCDADC;">...</p>
- Two or three sentences, warm and direct, referring to the user's goals, risk tolerance and preferred industry.
- Highlight one or two key words with <strong style="color: #FDD458;">.
- No greeting line, no sign-off, no markdown."#;

pub const NEWS_SUMMARY_PROMPT: &str = r#"Summarize the market news below for a daily email digest sent to a retail investor.

News articles (JSON):
{{newsData}}

Requirements:
- Group related stories into short sections with an <h3 style="color: #FDD458;"> heading.
- For each story write two or three plain-language sentences in a <p style="color: #CCDADC;">, explaining what happened and why it matters.
- End each story with <a href="URL" style="color: #FDD458;">Read full story</a> using the article url.
- Return HTML only, no markdown, no introduction or sign-off."#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserCreated {
    pub email: String,
    pub name: String,
    pub country: String,
    pub investment_goals: String,
    pub risk_tolerance: String,
    pub preferred_industry: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    UserCreated(UserCreated),
    SendDailyNews,
}

/// Publishing side of the workflow channel.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
}

impl EventBus {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (EventBus { tx }, rx)
    }

    /// Queues without waiting; a full queue drops the event.
    pub fn publish(&self, event: Event) -> AppResult<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                warn!("Workflow queue is full, dropping {:?}", event);
                AppError::Upstream("workflow queue is full".to_string())
            }
            TrySendError::Closed(_) => AppError::Upstream("workflow channel closed".to_string()),
        })
    }
}

pub fn user_profile_block(event: &UserCreated) -> String {
    format!(
        "- Country: {}\n- Investment goals: {}\n- Risk tolerance: {}\n- Preferred industry: {}",
        event.country, event.investment_goals, event.risk_tolerance, event.preferred_industry
    )
}

pub fn format_date_today() -> String {
    Utc::now().format("%A, %B %-d, %Y").to_string()
}

pub struct Workflow {
    store: Arc<dyn Store>,
    market: Arc<dyn MarketData>,
    llm: Arc<dyn TextGenerator>,
    mailer: Arc<dyn Mailer>,
}

impl Workflow {
    pub fn new(
        store: Arc<dyn Store>,
        market: Arc<dyn MarketData>,
        llm: Arc<dyn TextGenerator>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Workflow {
            store,
            market,
            llm,
            mailer,
        }
    }

    pub async fn handle(&self, event: Event) -> AppResult<ActionResult> {
        match event {
            Event::UserCreated(user) => self.send_sign_up_email(&user).await,
            Event::SendDailyNews => self.send_daily_news_summary().await,
        }
    }

    pub async fn send_sign_up_email(&self, event: &UserCreated) -> AppResult<ActionResult> {
        let prompt = WELCOME_EMAIL_PROMPT.replace("{{userProfile}}", &user_profile_block(event));

        let intro = match self.llm.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "Welcome intro generation failed for {}, using default: {}",
                    event.email, e
                );
                DEFAULT_WELCOME_INTRO.to_string()
            }
        };

        self.mailer
            .send(welcome_email(&event.email, &event.name, &intro))
            .await?;
        Ok(ActionResult::ok("Welcome email sent successfully"))
    }

    pub async fn send_daily_news_summary(&self) -> AppResult<ActionResult> {
        let users = get_all_users_for_news_email(self.store.as_ref()).await?;
        if users.is_empty() {
            return Ok(ActionResult::ok("No users found for news email"));
        }

        let results = self.fetch_news_for_users(users).await;
        if results.is_empty() {
            return Ok(ActionResult::ok("No news available for any user"));
        }

        let mut summaries: Vec<(UserForNewsEmail, Option<String>)> = Vec::with_capacity(results.len());
        for (user, articles) in results {
            let summary = self.summarize(&user, &articles).await;
            summaries.push((user, summary));
        }

        let date = format_date_today();
        let sends = summaries
            .iter()
            .filter_map(|(user, content)| content.as_ref().map(|c| (user, c)))
            .map(|(user, content)| {
                let email = news_summary_email(&user.email, &date, content);
                async move {
                    if let Err(e) = self.mailer.send(email).await {
                        error!("Failed to send news summary to {}: {}", user.email, e);
                        false
                    } else {
                        true
                    }
                }
            });
        let sent = join_all(sends).await.into_iter().filter(|ok| *ok).count();

        info!("Daily news summary sent to {} of {} users", sent, summaries.len());
        Ok(ActionResult::ok("Daily news summary emails sent successfully"))
    }

    async fn fetch_news_for_users(
        &self,
        users: Vec<UserForNewsEmail>,
    ) -> Vec<(UserForNewsEmail, Vec<MarketNewsArticle>)> {
        let lookups = users.into_iter().map(|user| async move {
            let symbols = get_watchlist_symbols_by_email(self.store.as_ref(), &user.email).await;
            let symbols = if symbols.is_empty() {
                None
            } else {
                Some(symbols.as_slice())
            };
            match get_news(self.market.as_ref(), symbols).await {
                Ok(mut news) if !news.is_empty() => {
                    news.truncate(MAX_ARTICLES);
                    Some((user, news))
                }
                Ok(_) => None,
                Err(e) => {
                    error!("Error fetching news for user {}: {}", user.email, e);
                    None
                }
            }
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }

    /// None marks the user as skipped for this run.
    async fn summarize(
        &self,
        user: &UserForNewsEmail,
        articles: &[MarketNewsArticle],
    ) -> Option<String> {
        let news_data = match serde_json::to_string_pretty(articles) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode news for {}: {}", user.email, e);
                return None;
            }
        };
        let prompt = NEWS_SUMMARY_PROMPT.replace("{{newsData}}", &news_data);

        match self.llm.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => Some(NO_MARKET_NEWS.to_string()),
            Err(e) => {
                error!("Failed to summarize news for {}: {}", user.email, e);
                None
            }
        }
    }
}

/// Drains the channel until every [`EventBus`] is dropped.
pub async fn worker(workflow: Arc<Workflow>, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        let name = match &event {
            Event::UserCreated(_) => "user-created",
            Event::SendDailyNews => "daily-news",
        };
        match workflow.handle(event).await {
            Ok(result) => info!("Workflow {} finished: {}", name, result.message),
            Err(e) => error!("Workflow {} failed: {}", name, e),
        }
    }
    info!("Workflow worker stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::testing::RecordingMailer;
    use crate::market::testing::StubMarket;
    use crate::memory::MemoryStore;
    use crate::models::{RawNewsArticle, User, WatchlistItem};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Replies from a script; `None` entries fail the call.
    struct ScriptedLlm {
        replies: Mutex<Vec<Option<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Option<&str>>) -> Self {
            ScriptedLlm {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedLlm {
        async fn generate(&self, prompt: &str) -> AppResult<String> {
            self.prompts.lock().await.push(prompt.to_string());
            let mut replies = self.replies.lock().await;
            let reply = if replies.is_empty() {
                None
            } else {
                replies.remove(0)
            };
            reply.ok_or_else(|| AppError::Upstream("model unavailable".to_string()))
        }
    }

    fn user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            email: email.to_string(),
            name: format!("User {}", id),
            password_hash: String::new(),
            country: String::new(),
            investment_goals: String::new(),
            risk_tolerance: String::new(),
            preferred_industry: String::new(),
            created_at: Utc::now(),
        }
    }

    fn news(headline: &str) -> RawNewsArticle {
        RawNewsArticle {
            id: Some(1),
            headline: Some(headline.to_string()),
            summary: Some("summary".to_string()),
            url: Some(format!("https://news/{}", headline)),
            datetime: Some(1_700_000_000),
            ..Default::default()
        }
    }

    fn signup() -> UserCreated {
        UserCreated {
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
            country: "GB".to_string(),
            investment_goals: "Income".to_string(),
            risk_tolerance: "Low".to_string(),
            preferred_industry: "Energy".to_string(),
        }
    }

    fn workflow(
        store: Arc<MemoryStore>,
        market: StubMarket,
        llm: Arc<ScriptedLlm>,
        mailer: Arc<RecordingMailer>,
    ) -> Workflow {
        Workflow::new(store, Arc::new(market), llm, mailer)
    }

    #[tokio::test]
    async fn welcome_email_uses_the_generated_intro() {
        let llm = Arc::new(ScriptedLlm::new(vec![Some("<p>Welcome, income seeker.</p>")]));
        let mailer = Arc::new(RecordingMailer::default());
        let wf = workflow(
            Arc::new(MemoryStore::new()),
            StubMarket::configured(),
            llm.clone(),
            mailer.clone(),
        );

        wf.send_sign_up_email(&signup()).await.unwrap();

        let prompt = llm.prompts.lock().await[0].clone();
        assert!(prompt.contains("- Preferred industry: Energy"));
        assert!(!prompt.contains("{{userProfile}}"));
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains("Welcome, income seeker."));
    }

    #[tokio::test]
    async fn welcome_email_falls_back_when_the_model_fails() {
        let llm = Arc::new(ScriptedLlm::new(vec![None]));
        let mailer = Arc::new(RecordingMailer::default());
        let wf = workflow(
            Arc::new(MemoryStore::new()),
            StubMarket::configured(),
            llm,
            mailer.clone(),
        );

        wf.handle(Event::UserCreated(signup())).await.unwrap();
        let sent = mailer.sent.lock().await;
        assert!(sent[0].html.contains(DEFAULT_WELCOME_INTRO));
    }

    #[tokio::test]
    async fn daily_news_without_users_is_a_no_op() {
        let mailer = Arc::new(RecordingMailer::default());
        let wf = workflow(
            Arc::new(MemoryStore::new()),
            StubMarket::configured(),
            Arc::new(ScriptedLlm::new(vec![])),
            mailer.clone(),
        );
        let result = wf.send_daily_news_summary().await.unwrap();
        assert_eq!(result.message, "No users found for news email");
        assert!(mailer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn daily_news_without_articles_sends_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(&user("u1", "a@x.com")).await.unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let wf = workflow(
            store,
            StubMarket::configured(),
            Arc::new(ScriptedLlm::new(vec![])),
            mailer.clone(),
        );
        let result = wf.send_daily_news_summary().await.unwrap();
        assert_eq!(result.message, "No news available for any user");
    }

    #[tokio::test]
    async fn daily_news_summarizes_watchlist_news_per_user() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(&user("u1", "a@x.com")).await.unwrap();
        store
            .insert_watchlist_item(&WatchlistItem {
                user_id: "u1".to_string(),
                symbol: "AAPL".to_string(),
                company: "Apple".to_string(),
                added_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut market = StubMarket::configured();
        market
            .company_news
            .insert("AAPL".to_string(), vec![news("iphone")]);

        let llm = Arc::new(ScriptedLlm::new(vec![Some("<p>Apple summary</p>")]));
        let mailer = Arc::new(RecordingMailer::default());
        let wf = workflow(store, market, llm.clone(), mailer.clone());

        let result = wf.send_daily_news_summary().await.unwrap();
        assert!(result.success);

        let prompt = llm.prompts.lock().await[0].clone();
        assert!(prompt.contains("\"headline\": \"iphone\""));
        assert!(prompt.contains("\"related\": \"AAPL\""));

        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert!(sent[0].html.contains("<p>Apple summary</p>"));
        assert!(sent[0].subject.starts_with("Market News Summary Today - "));
    }

    #[tokio::test]
    async fn users_whose_summary_fails_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(&user("u1", "a@x.com")).await.unwrap();
        store.insert_user(&user("u2", "b@x.com")).await.unwrap();

        let mut market = StubMarket::configured();
        market.general_news = Some(vec![news("macro")]);

        // One success, one failure; which user gets which is unordered.
        let llm = Arc::new(ScriptedLlm::new(vec![Some("<p>ok</p>"), None]));
        let mailer = Arc::new(RecordingMailer::default());
        let wf = workflow(store, market, llm, mailer.clone());

        wf.send_daily_news_summary().await.unwrap();
        assert_eq!(mailer.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn worker_keeps_going_after_a_failure() {
        let mailer = Arc::new(RecordingMailer {
            fail_for: Some("ada@example.com".to_string()),
            ..Default::default()
        });
        let wf = Arc::new(workflow(
            Arc::new(MemoryStore::new()),
            StubMarket::configured(),
            Arc::new(ScriptedLlm::new(vec![])),
            mailer.clone(),
        ));

        let (bus, rx) = EventBus::channel(4);
        bus.publish(Event::UserCreated(signup())).unwrap();
        let mut other = signup();
        other.email = "bob@example.com".to_string();
        bus.publish(Event::UserCreated(other)).unwrap();
        drop(bus);

        worker(wf, rx).await;
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "bob@example.com");
    }

    #[test]
    fn publishing_to_a_full_queue_fails_fast() {
        let (bus, mut rx) = EventBus::channel(1);
        bus.publish(Event::SendDailyNews).unwrap();
        let err = bus.publish(Event::UserCreated(signup())).unwrap_err();
        assert_eq!(err.to_string(), "upstream error: workflow queue is full");

        assert_eq!(rx.try_recv(), Ok(Event::SendDailyNews));
        drop(rx);
        assert!(bus.publish(Event::SendDailyNews).is_err());
    }

    #[test]
    fn profile_block_lists_every_answer() {
        let block = user_profile_block(&signup());
        assert_eq!(
            block,
            "- Country: GB\n- Investment goals: Income\n- Risk tolerance: Low\n- Preferred industry: Energy"
        );
    }
}
