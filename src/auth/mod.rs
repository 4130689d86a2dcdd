use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString},
};
use axum::{Json, Router, extract::State, routing::post};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppError, AppResult, AppState,
    db::{self, Profile},
    presence::Presence,
    profiles,
    session::{self, USER_ID},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/reset-password", post(reset_password))
}

fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Other(anyhow::anyhow!("salt: {e}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Other(anyhow::anyhow!("password hash: {e}")))
}

fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Other(anyhow::anyhow!("stored hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Deserialize)]
struct SignupBody {
    email: String,
    password: String,
    display_name: Option<String>,
    full_name: Option<String>,
}

#[derive(Serialize)]
struct SessionReply {
    user_id: String,
    profile: Profile,
}

async fn signup(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(body): Json<SignupBody>,
) -> AppResult<Json<SessionReply>> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("a valid email is required"));
    }
    if body.password.chars().count() < 6 {
        return Err(AppError::validation("password must be at least 6 characters"));
    }

    let taken: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&db_pool)
        .await?;
    if taken.is_some() {
        return Err(AppError::validation("email already registered"));
    }

    let user_id = Uuid::now_v7().to_string();
    sqlx::query("INSERT INTO users (id,email,password_hash,created_at) VALUES (?,?,?,?)")
        .bind(&user_id)
        .bind(&email)
        .bind(hash_password(&body.password)?)
        .bind(db::now_ms())
        .execute(&db_pool)
        .await?;

    let profile = profiles::create(
        &db_pool,
        &user_id,
        &email,
        body.display_name.as_deref(),
        body.full_name.as_deref(),
    )
    .await?;

    session.insert(USER_ID, user_id.clone()).await?;
    tracing::info!(%user_id, "signed up");

    Ok(Json(SessionReply { user_id, profile }))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(body): Json<LoginBody>,
) -> AppResult<Json<SessionReply>> {
    let email = body.email.trim().to_lowercase();
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT id, password_hash FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&db_pool)
            .await?;

    let Some((user_id, password_hash)) = row else {
        return Err(AppError::authorization("wrong email or password"));
    };
    if !verify_password(&body.password, &password_hash)? {
        return Err(AppError::authorization("wrong email or password"));
    }

    // lazy profile creation on first session
    let profile = profiles::ensure(&db_pool, &user_id).await?;
    session.insert(USER_ID, user_id.clone()).await?;
    tracing::info!(%user_id, "signed in");

    Ok(Json(SessionReply { user_id, profile }))
}

/// Sign-out clears the session and forces the presence flag off, so a room
/// left open on screen can no longer suppress pushes.
async fn logout(
    State(presence): State<Presence>,
    session: Session,
) -> AppResult<()> {
    if let Ok(user_id) = session::require_user(&session).await {
        presence.leave(&user_id);
    }
    session.clear().await;
    Ok(())
}

#[derive(Deserialize)]
struct ResetBody {
    email: String,
}

/// Mint a single-use reset token. Delivery belongs to an external mailer;
/// here the token is only recorded and logged. The reply never reveals
/// whether the email exists.
async fn reset_password(
    State(db_pool): State<SqlitePool>,
    Json(body): Json<ResetBody>,
) -> AppResult<()> {
    let email = body.email.trim().to_lowercase();
    let user_id: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&db_pool)
        .await?;

    if let Some(user_id) = user_id {
        let token = Uuid::now_v7().to_string();
        sqlx::query("INSERT INTO password_resets (token,user_id,created_at) VALUES (?,?,?)")
            .bind(&token)
            .bind(&user_id)
            .bind(db::now_ms())
            .execute(&db_pool)
            .await?;
        tracing::info!(%user_id, %token, "password reset requested");
    }

    Ok(())
}
