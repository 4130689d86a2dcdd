use std::collections::HashSet;

use axum::{
    extract::{Path, State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast::error::RecvError;
use tower_sessions::Session;

use crate::{
    AppResult,
    presence::Presence,
    reads,
    rooms::feed::{FeedEvent, FeedEventKind, RoomFeeds},
    rooms::{msg, room},
    session,
};

#[derive(Deserialize)]
struct SendBody {
    text: String,
}

/// Live view of one room. The socket lifetime is the screen's focus: attach
/// marks presence and the read watermark, detach clears presence. The
/// broadcast receiver is dropped with the task, which is the subscription's
/// single release.
pub async fn room_ws(
    Path(friend_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(feeds): State<RoomFeeds>,
    State(presence): State<Presence>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = session::require_user(&session).await?;
    let room_id = room::resolve(&user_id, &friend_id)?;

    Ok(ws.on_upgrade(async move |stream| {
        run_room_session(stream, db_pool, feeds, presence, user_id, room_id).await;
    }))
}

async fn run_room_session(
    stream: WebSocket,
    db_pool: SqlitePool,
    feeds: RoomFeeds,
    presence: Presence,
    user_id: String,
    room_id: String,
) {
    // Subscribe before the snapshot so nothing committed in between is lost;
    // the id set below dedupes the overlap.
    let mut rx = feeds.subscribe(&room_id);

    presence.enter(&user_id, &room_id);
    if let Err(err) = reads::mark_read(&db_pool, &room_id, &user_id).await {
        tracing::warn!(error = %err, %room_id, "mark_read on room entry failed");
    }

    let snapshot = match msg::fetch_recent(&db_pool, &room_id, 100).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            // degrade to live-only rather than dropping the screen
            tracing::warn!(error = %err, %room_id, "history fetch failed");
            vec![]
        }
    };
    let mut seen: HashSet<String> = snapshot.iter().map(|m| m.id.clone()).collect();

    let (mut sender, mut receiver) = stream.split();
    for message in &snapshot {
        let Ok(payload) = serde_json::to_string(message) else {
            continue;
        };
        if sender.send(payload.into()).await.is_err() {
            presence.leave(&user_id);
            return;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if !absorb_event(&db_pool, &user_id, &room_id, &event, &mut seen).await {
                        continue;
                    }
                    let Ok(payload) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(payload.into()).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%room_id, skipped, "room feed lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(frame)) => {
                    let Ok(SendBody { text }) = serde_json::from_slice(&frame.into_data()) else {
                        continue;
                    };
                    if let Err(err) =
                        msg::send(&db_pool, &feeds, &presence, &room_id, &user_id, &text).await
                    {
                        tracing::warn!(error = %err, %room_id, "send failed");
                    }
                }
                _ => break,
            },
        }
    }

    // blur: the screen is gone
    presence.leave(&user_id);
}

/// Decide whether a live event should be forwarded, and advance the read
/// watermark for inserts from the other party while the room is in focus.
/// Returns false for inserts already covered by the snapshot.
pub(crate) async fn absorb_event(
    pool: &SqlitePool,
    user_id: &str,
    room_id: &str,
    event: &FeedEvent,
    seen: &mut HashSet<String>,
) -> bool {
    match event.kind {
        FeedEventKind::Insert => {
            if !seen.insert(event.message.id.clone()) {
                return false;
            }
            if event.message.user_id != user_id {
                if let Err(err) = reads::mark_read(pool, room_id, user_id).await {
                    tracing::warn!(error = %err, %room_id, "mark_read on live message failed");
                }
            }
            true
        }
        FeedEventKind::Delete => {
            seen.remove(&event.message.id);
            true
        }
    }
}
