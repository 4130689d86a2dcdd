pub mod appresult;
pub mod auth;
pub mod db;
pub mod friends;
pub mod presence;
pub mod profiles;
pub mod reads;
pub mod rooms;
pub mod session;
pub mod unread;

pub use appresult::{AppError, AppResult};

use axum::{Router, extract::FromRef, routing::post};
use sqlx::SqlitePool;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub feeds: rooms::feed::RoomFeeds,
    pub presence: presence::Presence,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self {
            db_pool,
            feeds: rooms::feed::RoomFeeds::default(),
            presence: presence::Presence::default(),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .nest("/f", friends::router())
        .nest("/p", profiles::router())
        .nest("/r", rooms::router())
        .route("/presence", post(presence::set_active_room))
}
