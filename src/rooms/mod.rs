pub mod feed;
pub mod msg;
pub mod room;
mod ws;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    AppResult, AppState,
    db::Message,
    presence::Presence,
    session,
};

use feed::RoomFeeds;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{friend_id}/messages", get(history).post(post_message))
        .route("/{friend_id}/ws", get(ws::room_ws))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn history(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Path(friend_id): Path<String>,
    Query(HistoryQuery { limit }): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let user_id = session::require_user(&session).await?;
    let room_id = room::resolve(&user_id, &friend_id)?;
    let limit = limit.unwrap_or(100).clamp(1, 500);
    Ok(Json(msg::fetch_recent(&db_pool, &room_id, limit).await?))
}

#[derive(Deserialize)]
struct PostMessageBody {
    text: String,
}

async fn post_message(
    State(db_pool): State<SqlitePool>,
    State(feeds): State<RoomFeeds>,
    State(presence): State<Presence>,
    session: Session,
    Path(friend_id): Path<String>,
    Json(body): Json<PostMessageBody>,
) -> AppResult<Json<Message>> {
    let user_id = session::require_user(&session).await?;
    let room_id = room::resolve(&user_id, &friend_id)?;
    let message = msg::send(&db_pool, &feeds, &presence, &room_id, &user_id, &body.text).await?;
    Ok(Json(message))
}
