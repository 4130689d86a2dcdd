use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState,
    db::Profile,
    session,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me).patch(update_me))
        .route("/search", get(search_profiles))
        .route("/{id}", get(profile_by_id))
        .route("/me/push-token", patch(set_push_token_route))
}

pub async fn fetch(pool: &SqlitePool, user_id: &str) -> AppResult<Option<Profile>> {
    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(profile)
}

/// Fetch the caller's profile, creating it on first session if absent. A
/// blank display name falls back to a generated alias.
pub async fn ensure(pool: &SqlitePool, user_id: &str) -> AppResult<Profile> {
    if let Some(profile) = fetch(pool, user_id).await? {
        return Ok(profile);
    }

    let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    let email = email.ok_or_else(|| AppError::not_found(format!("no such user {user_id}")))?;

    create(pool, user_id, &email, None, None).await
}

pub async fn create(
    pool: &SqlitePool,
    user_id: &str,
    email: &str,
    display_name: Option<&str>,
    full_name: Option<&str>,
) -> AppResult<Profile> {
    let display_name = match display_name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => random_alias(),
    };

    sqlx::query(
        "INSERT INTO profiles (id,display_name,full_name,email) VALUES (?,?,?,?)
         ON CONFLICT(id) DO UPDATE SET
             display_name = excluded.display_name,
             full_name = excluded.full_name,
             email = excluded.email",
    )
    .bind(user_id)
    .bind(&display_name)
    .bind(full_name.unwrap_or(""))
    .bind(email)
    .execute(pool)
    .await?;

    tracing::info!(user_id, %display_name, "profile created");

    fetch(pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("profile vanished after insert"))
}

fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
    ];
    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
        "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    let mut rng = rand::rng();
    format!(
        "{} {}",
        adjectives.choose(&mut rng).unwrap(),
        nouns.choose(&mut rng).unwrap()
    )
}

#[derive(Debug, Deserialize)]
pub struct ImageUpload {
    pub content_type: String,
    /// base64-encoded image bytes
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub age: Option<i64>,
    pub avatar: Option<ImageUpload>,
    pub cover: Option<ImageUpload>,
}

/// Encode image bytes as an inline `data:` URL stored directly on the
/// profile row, instead of routing through an object store.
pub fn inline_image(upload: &ImageUpload) -> AppResult<String> {
    let bytes = BASE64
        .decode(upload.data.as_bytes())
        .map_err(|_| AppError::validation("image data is not valid base64"))?;
    if bytes.is_empty() {
        return Err(AppError::validation("image data is empty"));
    }
    Ok(format!("data:{};base64,{}", upload.content_type, BASE64.encode(&bytes)))
}

/// Partial update of the caller's own profile row.
pub async fn update(pool: &SqlitePool, user_id: &str, upd: &ProfileUpdate) -> AppResult<Profile> {
    if let Some(name) = &upd.display_name {
        if name.trim().is_empty() {
            return Err(AppError::validation("display name cannot be blank"));
        }
    }

    let avatar = upd.avatar.as_ref().map(inline_image).transpose()?;
    let cover = upd.cover.as_ref().map(inline_image).transpose()?;

    let mut sets = vec![];
    if upd.display_name.is_some() {
        sets.push("display_name = ?");
    }
    if upd.full_name.is_some() {
        sets.push("full_name = ?");
    }
    if upd.bio.is_some() {
        sets.push("bio = ?");
    }
    if upd.age.is_some() {
        sets.push("age = ?");
    }
    if avatar.is_some() {
        sets.push("avatar = ?");
    }
    if cover.is_some() {
        sets.push("cover = ?");
    }

    if sets.is_empty() {
        return fetch(pool, user_id)
            .await?
            .ok_or_else(|| AppError::not_found("no profile"));
    }

    let sql = format!("UPDATE profiles SET {} WHERE id = ?", sets.join(", "));
    let mut query = sqlx::query(&sql);
    if let Some(v) = &upd.display_name {
        query = query.bind(v.trim());
    }
    if let Some(v) = &upd.full_name {
        query = query.bind(v);
    }
    if let Some(v) = &upd.bio {
        query = query.bind(v);
    }
    if let Some(v) = upd.age {
        query = query.bind(v);
    }
    if let Some(v) = &avatar {
        query = query.bind(v);
    }
    if let Some(v) = &cover {
        query = query.bind(v);
    }

    let result = query.bind(user_id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found("no profile"));
    }

    fetch(pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("no profile"))
}

/// Case-insensitive search over display name and email, excluding the
/// caller. Terms shorter than 2 characters are rejected up front.
pub async fn search(pool: &SqlitePool, self_id: &str, term: &str) -> AppResult<Vec<Profile>> {
    let term = term.trim();
    if term.chars().count() < 2 {
        return Err(AppError::validation("search term must be at least 2 characters"));
    }

    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");

    let results = sqlx::query_as::<_, Profile>(
        r#"SELECT * FROM profiles
           WHERE (display_name LIKE ? ESCAPE '\' COLLATE NOCASE
                  OR email LIKE ? ESCAPE '\' COLLATE NOCASE)
             AND id != ?
           LIMIT 20"#,
    )
    .bind(&pattern)
    .bind(&pattern)
    .bind(self_id)
    .fetch_all(pool)
    .await?;

    Ok(results)
}

/// At most one device per profile: a new registration overwrites the
/// previous token, and `None` clears it.
pub async fn set_push_token(
    pool: &SqlitePool,
    user_id: &str,
    token: Option<&str>,
) -> AppResult<()> {
    sqlx::query("UPDATE profiles SET push_token = ? WHERE id = ?")
        .bind(token)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn me(State(db_pool): State<SqlitePool>, session: Session) -> AppResult<Json<Profile>> {
    let user_id = session::require_user(&session).await?;
    Ok(Json(ensure(&db_pool, &user_id).await?))
}

async fn update_me(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(upd): Json<ProfileUpdate>,
) -> AppResult<Json<Profile>> {
    let user_id = session::require_user(&session).await?;
    Ok(Json(update(&db_pool, &user_id, &upd).await?))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

async fn search_profiles(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Query(SearchQuery { q }): Query<SearchQuery>,
) -> AppResult<Json<Vec<Profile>>> {
    let user_id = session::require_user(&session).await?;
    Ok(Json(search(&db_pool, &user_id, &q).await?))
}

async fn profile_by_id(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Path(id): Path<String>,
) -> AppResult<Json<Profile>> {
    session::require_user(&session).await?;
    fetch(&db_pool, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no profile {id}")))
}

#[derive(Deserialize)]
struct PushTokenBody {
    token: Option<String>,
}

async fn set_push_token_route(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(body): Json<PushTokenBody>,
) -> AppResult<()> {
    let user_id = session::require_user(&session).await?;
    set_push_token(&db_pool, &user_id, body.token.as_deref()).await
}
