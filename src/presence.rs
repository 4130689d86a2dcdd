use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{Json, extract::State};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{AppResult, reads, rooms::room, session};

/// Which room each signed-in user is currently viewing. Consulted by the
/// notification dispatch path to suppress a push for an actively-viewed room.
/// Ephemeral: process-wide, never persisted.
#[derive(Clone, Default)]
pub struct Presence {
    active: Arc<Mutex<HashMap<String, String>>>,
}

impl Presence {
    /// Room screen gained focus.
    pub fn enter(&self, user_id: &str, room_id: &str) {
        self.active
            .lock()
            .unwrap()
            .insert(user_id.to_owned(), room_id.to_owned());
        tracing::debug!(user_id, room_id, "presence enter");
    }

    /// Room screen lost focus, app went to background, or the user signed
    /// out.
    pub fn leave(&self, user_id: &str) {
        self.active.lock().unwrap().remove(user_id);
        tracing::debug!(user_id, "presence leave");
    }

    pub fn active_room(&self, user_id: &str) -> Option<String> {
        self.active.lock().unwrap().get(user_id).cloned()
    }

    pub fn is_viewing(&self, user_id: &str, room_id: &str) -> bool {
        self.active.lock().unwrap().get(user_id).map(String::as_str) == Some(room_id)
    }
}

#[derive(Deserialize)]
pub struct SetActiveBody {
    /// The friend whose room is now in the foreground, or null on blur.
    pub friend_id: Option<String>,
}

/// `setActiveRoom` RPC. Entering a room also advances the read watermark.
pub async fn set_active_room(
    State(db_pool): State<SqlitePool>,
    State(presence): State<Presence>,
    session: Session,
    Json(body): Json<SetActiveBody>,
) -> AppResult<()> {
    let user_id = session::require_user(&session).await?;
    match body.friend_id {
        Some(friend_id) => {
            let room_id = room::resolve(&user_id, &friend_id)?;
            presence.enter(&user_id, &room_id);
            reads::mark_read(&db_pool, &room_id, &user_id).await?;
        }
        None => presence.leave(&user_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_then_leave() {
        let presence = Presence::default();
        assert_eq!(presence.active_room("b"), None);

        presence.enter("b", "a:b");
        assert!(presence.is_viewing("b", "a:b"));
        assert!(!presence.is_viewing("b", "a:c"));
        assert_eq!(presence.active_room("b"), Some("a:b".to_owned()));

        presence.leave("b");
        assert_eq!(presence.active_room("b"), None);
    }

    #[test]
    fn entering_another_room_replaces_the_first() {
        let presence = Presence::default();
        presence.enter("b", "a:b");
        presence.enter("b", "b:c");
        assert!(!presence.is_viewing("b", "a:b"));
        assert!(presence.is_viewing("b", "b:c"));
    }

    #[test]
    fn presence_is_per_user() {
        let presence = Presence::default();
        presence.enter("a", "a:b");
        assert!(presence.is_viewing("a", "a:b"));
        assert!(!presence.is_viewing("b", "a:b"));
    }
}
