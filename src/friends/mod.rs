use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppError, AppResult, AppState,
    db::{self, FriendRequest, Message, Profile},
    profiles,
    rooms::feed::{FeedEvent, FeedEventKind, RoomFeeds},
    rooms::room,
    session, unread,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(friend_list))
        .route("/requests", get(pending_requests).post(send_request_route))
        .route("/requests/{id}/respond", post(respond_route))
        .route("/{id}/relation", get(relation_route))
        .route("/{id}", delete(remove_route))
}

/// Current relationship between two users, checked in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Friend,
    PendingOutgoing,
    PendingIncoming,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Declined,
}

impl Decision {
    fn as_str(self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::Declined => "declined",
        }
    }
}

/// Insert a `pending` request. An existing edge in either direction is
/// rejected up front; a race between two simultaneous inserts can still
/// cross, which `list_friends` tolerates by de-duplicating per party.
pub async fn send_request(pool: &SqlitePool, from: &str, to: &str) -> AppResult<FriendRequest> {
    let to = to.trim();
    if to.is_empty() {
        return Err(AppError::validation("friend id cannot be empty"));
    }
    if to == from {
        return Err(AppError::validation("cannot send a friend request to yourself"));
    }
    if profiles::fetch(pool, to).await?.is_none() {
        return Err(AppError::not_found(format!("no profile {to}")));
    }

    match relation_of(pool, from, to).await? {
        Relation::None => {}
        Relation::Friend => return Err(AppError::validation("already friends")),
        Relation::PendingOutgoing => return Err(AppError::validation("request already sent")),
        Relation::PendingIncoming => {
            return Err(AppError::validation("they already sent you a request"));
        }
    }

    let request = FriendRequest {
        id: Uuid::now_v7().to_string(),
        from_user: from.to_owned(),
        to_user: to.to_owned(),
        status: "pending".to_owned(),
        created_at: db::now_ms(),
    };
    sqlx::query(
        "INSERT INTO friend_requests (id,from_user,to_user,status,created_at) VALUES (?,?,?,?,?)",
    )
    .bind(&request.id)
    .bind(&request.from_user)
    .bind(&request.to_user)
    .bind(&request.status)
    .bind(request.created_at)
    .execute(pool)
    .await?;

    Ok(request)
}

/// Accept or decline a pending request. Only the recipient may respond.
/// Returns false when the request is gone or already resolved (stale view
/// on the client; treated as a no-op, not an error).
pub async fn respond(
    pool: &SqlitePool,
    request_id: &str,
    responder: &str,
    decision: Decision,
) -> AppResult<bool> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT to_user, status FROM friend_requests WHERE id = ?")
            .bind(request_id)
            .fetch_optional(pool)
            .await?;

    let Some((to_user, status)) = row else {
        return Ok(false);
    };
    if responder != to_user {
        return Err(AppError::authorization("only the recipient can respond"));
    }
    if status != "pending" {
        return Ok(false);
    }

    let result = sqlx::query(
        "UPDATE friend_requests SET status = ? WHERE id = ? AND to_user = ? AND status = 'pending'",
    )
    .bind(decision.as_str())
    .bind(request_id)
    .bind(responder)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// All profiles reachable through accepted requests where `user` is either
/// side, de-duplicated by the other party's id.
pub async fn list_friends(pool: &SqlitePool, user: &str) -> AppResult<Vec<Profile>> {
    let accepted: Vec<(String, String)> = sqlx::query_as(
        "SELECT from_user, to_user FROM friend_requests
         WHERE status = 'accepted' AND (from_user = ? OR to_user = ?)",
    )
    .bind(user)
    .bind(user)
    .fetch_all(pool)
    .await?;

    let mut other_ids: Vec<String> = Vec::new();
    for (from_user, to_user) in accepted {
        let other = if from_user == user { to_user } else { from_user };
        if !other_ids.contains(&other) {
            other_ids.push(other);
        }
    }
    if other_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders = vec!["?"; other_ids.len()].join(",");
    let sql = format!("SELECT * FROM profiles WHERE id IN ({placeholders})");
    let mut query = sqlx::query_as::<_, Profile>(&sql);
    for id in &other_ids {
        query = query.bind(id);
    }
    let mut by_id: HashMap<String, Profile> = query
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    Ok(other_ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

#[derive(Debug, Serialize)]
pub struct IncomingRequest {
    #[serde(flatten)]
    pub request: FriendRequest,
    pub from_profile: Option<Profile>,
}

/// Pending requests addressed to `user`, joined with each requester's
/// profile for display.
pub async fn list_pending_incoming(
    pool: &SqlitePool,
    user: &str,
) -> AppResult<Vec<IncomingRequest>> {
    let requests: Vec<FriendRequest> = sqlx::query_as(
        "SELECT * FROM friend_requests WHERE to_user = ? AND status = 'pending'
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user)
    .fetch_all(pool)
    .await?;

    let mut joined = Vec::with_capacity(requests.len());
    for request in requests {
        let from_profile = profiles::fetch(pool, &request.from_user).await?;
        joined.push(IncomingRequest { request, from_profile });
    }
    Ok(joined)
}

pub async fn relation_of(pool: &SqlitePool, user: &str, candidate: &str) -> AppResult<Relation> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT from_user, status FROM friend_requests
         WHERE (from_user = ? AND to_user = ?) OR (from_user = ? AND to_user = ?)",
    )
    .bind(user)
    .bind(candidate)
    .bind(candidate)
    .bind(user)
    .fetch_all(pool)
    .await?;

    let mut relation = Relation::None;
    for (from_user, status) in rows {
        match status.as_str() {
            "accepted" => return Ok(Relation::Friend),
            "pending" if from_user == user => relation = Relation::PendingOutgoing,
            "pending" => relation = Relation::PendingIncoming,
            _ => {}
        }
    }
    Ok(relation)
}

/// Remove a friendship: every request row linking the pair, then the room's
/// messages and read receipts, all in one transaction so a partial failure
/// rolls back instead of leaving the pair half-deleted. Live subscribers
/// get a delete event per message.
pub async fn remove(
    pool: &SqlitePool,
    feeds: &RoomFeeds,
    user: &str,
    other: &str,
) -> AppResult<()> {
    let room_id = room::resolve(user, other)?;

    let doomed: Vec<Message> = sqlx::query_as("SELECT * FROM messages WHERE room_id = ?")
        .bind(&room_id)
        .fetch_all(pool)
        .await?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM friend_requests
         WHERE (from_user = ? AND to_user = ?) OR (from_user = ? AND to_user = ?)",
    )
    .bind(user)
    .bind(other)
    .bind(other)
    .bind(user)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM messages WHERE room_id = ?")
        .bind(&room_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM room_reads WHERE room_id = ?")
        .bind(&room_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(user, other, %room_id, "friendship removed");

    for message in doomed {
        feeds.publish(&room_id, FeedEvent { kind: FeedEventKind::Delete, message });
    }

    Ok(())
}

/// One row of the friend list: the friend's profile plus that room's
/// unread digest.
#[derive(Debug, Serialize)]
pub struct FriendEntry {
    pub profile: Profile,
    pub room_id: String,
    #[serde(flatten)]
    pub digest: unread::RoomDigest,
}

async fn friend_list(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Vec<FriendEntry>>> {
    let user_id = session::require_user(&session).await?;
    let friends = list_friends(&db_pool, &user_id).await?;

    let rooms: Vec<String> = friends
        .iter()
        .map(|p| room::resolve(&user_id, &p.id))
        .collect::<AppResult<_>>()?;

    // Degrade on aggregation failure: the list still renders, without
    // previews or counts. User-initiated refresh retries.
    let mut digests = match unread::compute(&db_pool, &rooms, &user_id).await {
        Ok(digests) => digests,
        Err(err) => {
            tracing::warn!(error = %err, "unread aggregation failed");
            HashMap::new()
        }
    };

    let mut entries: Vec<FriendEntry> = friends
        .into_iter()
        .zip(rooms)
        .map(|(profile, room_id)| {
            let digest = digests.remove(&room_id).unwrap_or_default();
            FriendEntry { profile, room_id, digest }
        })
        .collect();
    entries.sort_by(|a, b| {
        b.digest
            .latest_activity
            .cmp(&a.digest.latest_activity)
            .then_with(|| a.room_id.cmp(&b.room_id))
    });

    Ok(Json(entries))
}

#[derive(Deserialize)]
struct SendRequestBody {
    to: String,
}

async fn send_request_route(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(body): Json<SendRequestBody>,
) -> AppResult<Json<FriendRequest>> {
    let user_id = session::require_user(&session).await?;
    Ok(Json(send_request(&db_pool, &user_id, &body.to).await?))
}

async fn pending_requests(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Vec<IncomingRequest>>> {
    let user_id = session::require_user(&session).await?;
    Ok(Json(list_pending_incoming(&db_pool, &user_id).await?))
}

#[derive(Deserialize)]
struct RespondBody {
    decision: Decision,
}

#[derive(Serialize)]
struct RespondOutcome {
    updated: bool,
}

async fn respond_route(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Path(id): Path<String>,
    Json(body): Json<RespondBody>,
) -> AppResult<Json<RespondOutcome>> {
    let user_id = session::require_user(&session).await?;
    let updated = respond(&db_pool, &id, &user_id, body.decision).await?;
    Ok(Json(RespondOutcome { updated }))
}

async fn relation_route(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Path(id): Path<String>,
) -> AppResult<Json<Relation>> {
    let user_id = session::require_user(&session).await?;
    Ok(Json(relation_of(&db_pool, &user_id, &id).await?))
}

async fn remove_route(
    State(db_pool): State<SqlitePool>,
    State(feeds): State<RoomFeeds>,
    session: Session,
    Path(id): Path<String>,
) -> AppResult<()> {
    let user_id = session::require_user(&session).await?;
    remove(&db_pool, &feeds, &user_id, &id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, reads, rooms::msg};
    use crate::presence::Presence;

    async fn fixtures(pool: &SqlitePool) {
        for (id, name) in [("a", "Alice"), ("b", "Bob"), ("c", "Carol")] {
            profiles::create(pool, id, &format!("{id}@example.com"), Some(name), None)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn new_request_is_pending_in_both_directions() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;

        send_request(&pool, "a", "b").await.unwrap();
        assert_eq!(relation_of(&pool, "a", "b").await.unwrap(), Relation::PendingOutgoing);
        assert_eq!(relation_of(&pool, "b", "a").await.unwrap(), Relation::PendingIncoming);
        assert_eq!(relation_of(&pool, "a", "c").await.unwrap(), Relation::None);
    }

    #[tokio::test]
    async fn request_validation() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;

        assert!(matches!(send_request(&pool, "a", "  ").await, Err(AppError::Validation(_))));
        assert!(matches!(send_request(&pool, "a", "a").await, Err(AppError::Validation(_))));
        assert!(matches!(send_request(&pool, "a", "ghost").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_and_reverse_requests_are_rejected() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;

        send_request(&pool, "a", "b").await.unwrap();
        assert!(matches!(send_request(&pool, "a", "b").await, Err(AppError::Validation(_))));
        assert!(matches!(send_request(&pool, "b", "a").await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn accepting_makes_friends_both_ways() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;

        let request = send_request(&pool, "a", "b").await.unwrap();
        let updated = respond(&pool, &request.id, "b", Decision::Accepted).await.unwrap();
        assert!(updated);

        assert_eq!(relation_of(&pool, "a", "b").await.unwrap(), Relation::Friend);
        assert_eq!(relation_of(&pool, "b", "a").await.unwrap(), Relation::Friend);

        let friends = list_friends(&pool, "a").await.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].display_name, "Bob");
    }

    #[tokio::test]
    async fn declined_requests_leave_no_relation() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;

        let request = send_request(&pool, "a", "b").await.unwrap();
        respond(&pool, &request.id, "b", Decision::Declined).await.unwrap();

        assert_eq!(relation_of(&pool, "a", "b").await.unwrap(), Relation::None);
        assert!(list_friends(&pool, "a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_the_recipient_may_respond() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;

        let request = send_request(&pool, "a", "b").await.unwrap();
        let err = respond(&pool, &request.id, "a", Decision::Accepted).await;
        assert!(matches!(err, Err(AppError::Authorization(_))));
        // untouched
        assert_eq!(relation_of(&pool, "a", "b").await.unwrap(), Relation::PendingOutgoing);
    }

    #[tokio::test]
    async fn responding_to_a_resolved_or_missing_request_is_a_no_op() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;

        assert!(!respond(&pool, "gone", "b", Decision::Accepted).await.unwrap());

        let request = send_request(&pool, "a", "b").await.unwrap();
        respond(&pool, &request.id, "b", Decision::Accepted).await.unwrap();
        // terminal: no transition back out of accepted
        assert!(!respond(&pool, &request.id, "b", Decision::Declined).await.unwrap());
        assert_eq!(relation_of(&pool, "a", "b").await.unwrap(), Relation::Friend);
    }

    #[tokio::test]
    async fn pending_incoming_includes_the_requester_profile() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;

        send_request(&pool, "a", "b").await.unwrap();
        send_request(&pool, "c", "b").await.unwrap();

        let incoming = list_pending_incoming(&pool, "b").await.unwrap();
        assert_eq!(incoming.len(), 2);
        // newest first
        assert_eq!(incoming[0].request.from_user, "c");
        assert_eq!(
            incoming[0].from_profile.as_ref().unwrap().display_name,
            "Carol"
        );
        assert!(list_pending_incoming(&pool, "a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_cascades_requests_messages_and_receipts() {
        let pool = db::test_pool().await;
        fixtures(&pool).await;
        let feeds = RoomFeeds::default();
        let presence = Presence::default();

        let request = send_request(&pool, "a", "b").await.unwrap();
        respond(&pool, &request.id, "b", Decision::Accepted).await.unwrap();

        let room_id = room::resolve("a", "b").unwrap();
        msg::send(&pool, &feeds, &presence, &room_id, "a", "hi").await.unwrap();
        reads::mark_read(&pool, &room_id, "b").await.unwrap();

        let mut rx = feeds.subscribe(&room_id);
        remove(&pool, &feeds, "a", "b").await.unwrap();

        assert_eq!(relation_of(&pool, "a", "b").await.unwrap(), Relation::None);
        assert!(msg::fetch_recent(&pool, &room_id, 100).await.unwrap().is_empty());
        assert_eq!(reads::last_read_at(&pool, &room_id, "b").await.unwrap(), None);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, FeedEventKind::Delete);
        assert_eq!(event.message.text, "hi");
    }
}
