// src/mailer.rs
use crate::config::SmtpConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::info;

const APP_NAME: &str = "Signalist";

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> AppResult<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| AppError::Mail(e.to_string()))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        let from = format!("{} <{}>", APP_NAME, config.from)
            .parse::<Mailbox>()
            .map_err(|e| AppError::Mail(format!("invalid sender address: {}", e)))?;
        Ok(SmtpMailer { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|e| AppError::Mail(format!("invalid recipient {}: {}", email.to, e)))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html)
            .map_err(|e| AppError::Mail(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Mail(e.to_string()))?;
        info!("Sent '{}' to {}", email.subject, email.to);
        Ok(())
    }
}

/// Used when no SMTP relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        info!(
            "SMTP not configured; would send '{}' to {} ({} bytes)",
            email.subject,
            email.to,
            email.html.len()
        );
        Ok(())
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>{title}</title></head>
<body style="margin:0;padding:0;background-color:#050505;font-family:Arial,Helvetica,sans-serif;">
<table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:#050505;">
<tr><td align="center" style="padding:40px 20px;">
<table role="presentation" width="600" cellpadding="0" cellspacing="0" style="background-color:#141414;border-radius:8px;border:1px solid #30333A;">
<tr><td style="padding:40px;color:#CCDADC;font-size:16px;line-height:1.6;">
{body}
</td></tr>
</table>
<p style="color:#6B7280;font-size:12px;">{app} &middot; You are receiving this because you signed up for {app}.</p>
</td></tr>
</table>
</body>
</html>"#,
        title = title,
        body = body,
        app = APP_NAME,
    )
}

/// `intro` is generated HTML and is inserted as-is.
pub fn welcome_email(email: &str, name: &str, intro: &str) -> OutgoingEmail {
    let body = format!(
        r#"<h1 style="color:#FDD458;font-size:24px;">Welcome aboard {name}</h1>
{intro}
<p>Here is what you can do right now:</p>
<ul>
<li>Set up your watchlist to follow your favorite stocks.</li>
<li>Open any symbol for live charts, technicals and company financials.</li>
<li>Get a daily summary of the news behind your watchlist.</li>
</ul>
<p>Much love,<br>The {app} team</p>"#,
        name = escape_html(name),
        intro = intro,
        app = APP_NAME,
    );
    OutgoingEmail {
        to: email.to_string(),
        subject: format!("Welcome to {} - your stock market toolkit is ready!", APP_NAME),
        html: layout("Welcome", &body),
    }
}

/// `news_content` is generated HTML and is inserted as-is.
pub fn news_summary_email(email: &str, date: &str, news_content: &str) -> OutgoingEmail {
    let body = format!(
        r#"<h1 style="color:#FDD458;font-size:24px;">Market News Summary Today</h1>
<p style="color:#6B7280;font-size:14px;">{date}</p>
{news}"#,
        date = escape_html(date),
        news = news_content,
    );
    OutgoingEmail {
        to: email.to_string(),
        subject: format!("Market News Summary Today - {}", date),
        html: layout("Market News Summary", &body),
    }
}
