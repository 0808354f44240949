//! Accounts and bearer tokens.
//!
//! Passwords are stored as bcrypt hashes; sessions are stateless HS256 JWTs
//! carrying the user id, role and tier at the time of login.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::{Database, NewUser, Role, Tier, User};
use crate::error::{ApiError, ApiResult};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub tier: Tier,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub subscription_tier: Tier,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct AuthService {
    db: Arc<Database>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(db: Arc<Database>, config: AuthConfig) -> Self {
        Self { db, config }
    }

    pub fn issue_token(&self, user: &User) -> anyhow::Result<String> {
        let exp = Utc::now()
            .checked_add_signed(chrono::Duration::hours(self.config.token_ttl_hours))
            .context("Invalid token expiry")?
            .timestamp() as usize;

        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            tier: user.subscription_tier,
            exp,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .context("Failed to sign token")
    }

    pub fn validate(&self, token: &str) -> anyhow::Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .context("Invalid or expired token")?;

        debug!("Validated token for {}", decoded.claims.email);
        Ok(decoded.claims)
    }

    fn respond(&self, user: &User) -> anyhow::Result<AuthResponse> {
        Ok(AuthResponse {
            token: self.issue_token(user)?,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            subscription_tier: user.subscription_tier,
        })
    }

    pub async fn register(&self, req: RegisterRequest) -> ApiResult<AuthResponse> {
        let email = normalize_email(&req.email);
        let full_name = req.full_name.trim().to_string();

        if !email.contains('@') {
            return Err(ApiError::BadRequest("Email is invalid".to_string()));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::BadRequest(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if full_name.is_empty() {
            return Err(ApiError::BadRequest("Full name is required".to_string()));
        }
        if self.db.get_user_by_email(&email).await?.is_some() {
            return Err(ApiError::Conflict("Email already registered".to_string()));
        }

        let password_hash = bcrypt::hash(&req.password, self.config.bcrypt_cost)
            .context("Failed to hash password")?;

        let user = self
            .db
            .create_user(&NewUser {
                email,
                password_hash,
                full_name,
                role: Role::User,
                subscription_tier: Tier::Free,
                api_key: Uuid::new_v4().to_string(),
            })
            .await?;

        info!("Registered user {} ({})", user.email, user.id);
        Ok(self.respond(&user)?)
    }

    pub async fn login(&self, req: LoginRequest) -> ApiResult<AuthResponse> {
        let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

        let email = normalize_email(&req.email);
        let Some(user) = self.db.get_user_by_email(&email).await? else {
            warn!("Login attempt for unknown email {}", email);
            return Err(invalid());
        };

        let verified = bcrypt::verify(&req.password, &user.password_hash).unwrap_or(false);
        if !verified {
            warn!("Wrong password for {}", email);
            return Err(invalid());
        }
        if !user.enabled {
            return Err(ApiError::Unauthorized("Account is disabled".to_string()));
        }

        info!("User {} logged in", user.email);
        Ok(self.respond(&user)?)
    }

    /// Create the configured admin account unless it already exists
    pub async fn ensure_admin(&self) -> anyhow::Result<()> {
        let email = normalize_email(&self.config.admin_email);
        if self.db.get_user_by_email(&email).await?.is_some() {
            return Ok(());
        }

        let password_hash = bcrypt::hash(&self.config.admin_password, self.config.bcrypt_cost)
            .context("Failed to hash admin password")?;

        self.db
            .create_user(&NewUser {
                email: email.clone(),
                password_hash,
                full_name: "Administrator".to_string(),
                role: Role::Admin,
                subscription_tier: Tier::Premium,
                api_key: Uuid::new_v4().to_string(),
            })
            .await?;

        info!("Created admin account {}", email);
        Ok(())
    }

    /// Load the account behind `claims`, reflecting any tier or role change
    pub async fn current_user(&self, claims: &Claims) -> ApiResult<User> {
        let user_id = claims
            .user_id()
            .ok_or_else(|| ApiError::Unauthorized("Invalid token subject".to_string()))?;

        match self.db.get_user(user_id).await? {
            Some(user) if user.enabled => Ok(user),
            Some(_) => Err(ApiError::Unauthorized("Account is disabled".to_string())),
            None => Err(ApiError::Unauthorized("Account no longer exists".to_string())),
        }
    }
}

/// Reject requests without a valid `Authorization: Bearer` token and expose
/// the decoded [`Claims`] to handlers through the request extensions.
pub async fn require_auth(
    State(auth): State<Arc<AuthService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization token".to_string()))?;

    let claims = auth
        .validate(token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
