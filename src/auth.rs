// src/auth.rs
use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::models::{AuthResponse, PublicUser, Session, SignInRequest, SignUpRequest, User};
use crate::workflow::{Event, EventBus, UserCreated};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

pub const MIN_PASSWORD_LENGTH: usize = 8;

const SIGN_UP_DEFAULT: &str = "Failed to create an account. Please try again.";
const SIGN_IN_DEFAULT: &str = "Failed to sign in. Please try again.";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    sid: String,
    email: String,
    exp: usize,
}

/// The caller behind a valid bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub session_id: String,
}

pub fn create_token(session: &Session, secret: &str) -> AppResult<String> {
    let claims = Claims {
        sub: session.user_id.clone(),
        sid: session.id.clone(),
        email: session.email.clone(),
        exp: session.expires_at.timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| AppError::Unauthorized(format!("failed to sign token: {}", e)))
}

fn decode_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {}", e)))
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Argon2id with a fresh salt, encoded as a PHC string.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| AppError::Internal(format!("failed to salt password: {}", e)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))
}

/// Checks `password` against a stored PHC string. The digest comparison
/// is constant-time.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Unreadable password hash in store: {}", e);
            false
        }
    }
}

async fn blocking<T, F>(f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("password task failed: {}", e)))
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

pub fn normalize_sign_up_error(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("email")
        && (lower.contains("already") || lower.contains("exists") || lower.contains("duplicate"))
    {
        "This email address is already registered. Please use a different email or sign in."
            .to_string()
    } else if lower.contains("password")
        && (lower.contains("short") || lower.contains("minimum") || lower.contains("length"))
    {
        "Password must be at least 8 characters long.".to_string()
    } else if message.trim().is_empty() {
        SIGN_UP_DEFAULT.to_string()
    } else {
        message.to_string()
    }
}

pub fn normalize_sign_in_error(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("invalid")
        && (lower.contains("credentials") || lower.contains("password") || lower.contains("email"))
    {
        "Invalid email or password. Please check your credentials and try again.".to_string()
    } else if lower.contains("email")
        && (lower.contains("not found")
            || lower.contains("does not exist")
            || lower.contains("not registered"))
    {
        "No account found with this email address. Please sign up first.".to_string()
    } else if lower.contains("password") && (lower.contains("incorrect") || lower.contains("wrong"))
    {
        "Incorrect password. Please try again.".to_string()
    } else if message.trim().is_empty() {
        SIGN_IN_DEFAULT.to_string()
    } else {
        message.to_string()
    }
}

/// Rewrites the message of a user-facing error, keeping its kind.
fn normalized(err: AppError, normalize: fn(&str) -> String, default: &str) -> AppError {
    match err {
        AppError::Validation(m) => AppError::Validation(normalize(&m)),
        AppError::Conflict(m) => AppError::Conflict(normalize(&m)),
        AppError::Unauthorized(m) => AppError::Unauthorized(normalize(&m)),
        other => {
            error!("Auth operation failed: {}", other);
            AppError::Internal(default.to_string())
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    secret: Arc<String>,
    session_ttl: Duration,
    events: EventBus,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn Store>,
        secret: Arc<String>,
        session_ttl: Duration,
        events: EventBus,
    ) -> Self {
        AuthService {
            store,
            secret,
            session_ttl,
            events,
        }
    }

    pub async fn sign_up(&self, req: SignUpRequest) -> AppResult<AuthResponse> {
        self.try_sign_up(req)
            .await
            .map_err(|e| normalized(e, normalize_sign_up_error, SIGN_UP_DEFAULT))
    }

    async fn try_sign_up(&self, req: SignUpRequest) -> AppResult<AuthResponse> {
        let email = req.email.trim().to_lowercase();
        let name = req.full_name.trim().to_string();
        if !valid_email(&email) {
            return Err(AppError::Validation("Invalid email address".to_string()));
        }
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        if req.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation("Password is too short".to_string()));
        }
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict(
                "User with this email already exists".to_string(),
            ));
        }

        let password = req.password.clone();
        let password_hash = blocking(move || hash_password(&password)).await??;
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            name: name.clone(),
            password_hash,
            country: req.country.clone(),
            investment_goals: req.investment_goals.clone(),
            risk_tolerance: req.risk_tolerance.clone(),
            preferred_industry: req.preferred_industry.clone(),
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;
        info!("Created account for {}.", email);

        let token = self.open_session(&user).await?;

        if let Err(e) = self
            .events
            .publish(Event::UserCreated(UserCreated {
                email,
                name,
                country: req.country,
                investment_goals: req.investment_goals,
                risk_tolerance: req.risk_tolerance,
                preferred_industry: req.preferred_industry,
            }))
        {
            warn!("Could not queue welcome email: {}", e);
        }

        Ok(AuthResponse {
            success: true,
            token,
            user: PublicUser::from(&user),
        })
    }

    pub async fn sign_in(&self, req: SignInRequest) -> AppResult<AuthResponse> {
        self.try_sign_in(req)
            .await
            .map_err(|e| normalized(e, normalize_sign_in_error, SIGN_IN_DEFAULT))
    }

    async fn try_sign_in(&self, req: SignInRequest) -> AppResult<AuthResponse> {
        let email = req.email.trim().to_lowercase();
        let invalid = || AppError::Unauthorized("Invalid email or password".to_string());
        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or_else(invalid)?;

        let password = req.password;
        let stored = user.password_hash.clone();
        if !blocking(move || verify_password(&password, &stored)).await? {
            return Err(invalid());
        }

        let token = self.open_session(&user).await?;
        info!("User {} signed in.", user.id);
        Ok(AuthResponse {
            success: true,
            token,
            user: PublicUser::from(&user),
        })
    }

    pub async fn sign_out(&self, user: &AuthUser) -> AppResult<()> {
        self.store
            .delete_session(&user.session_id)
            .await
            .map_err(|e| {
                error!("Sign out failed: {}", e);
                AppError::Internal("Sign out failed".to_string())
            })?;
        info!("User {} signed out.", user.id);
        Ok(())
    }

    /// Accepts a token only while its session is still stored and unexpired.
    pub async fn authenticate(&self, token: &str) -> AppResult<AuthUser> {
        let claims = decode_token(token, &self.secret)?;
        let session = self
            .store
            .find_session(&claims.sid)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Session has ended".to_string()))?;

        if session.user_id != claims.sub || session.expires_at <= Utc::now() {
            return Err(AppError::Unauthorized("Session has ended".to_string()));
        }

        Ok(AuthUser {
            id: session.user_id,
            email: session.email,
            session_id: session.id,
        })
    }

    async fn open_session(&self, user: &User) -> AppResult<String> {
        let expires_at = Utc::now()
            .checked_add_signed(self.session_ttl)
            .ok_or_else(|| AppError::Internal("session lifetime out of range".to_string()))?;
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            email: user.email.clone(),
            expires_at,
        };
        self.store.insert_session(&session).await?;
        create_token(&session, &self.secret)
    }
}
