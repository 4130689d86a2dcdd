use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedEventKind {
    Insert,
    Delete,
}

/// One row-level change in a room's message log, pushed to live subscribers
/// in commit order for that room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEvent {
    pub kind: FeedEventKind,
    pub message: Message,
}

/// Registry of per-room broadcast channels. The receiver handle returned by
/// [`RoomFeeds::subscribe`] is the subscription; dropping it is the one and
/// only release. Channels with no remaining receivers are pruned on publish.
#[derive(Clone, Default)]
pub struct RoomFeeds {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<FeedEvent>>>>,
}

impl RoomFeeds {
    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<FeedEvent> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(room_id.to_owned())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    pub fn publish(&self, room_id: &str, event: FeedEvent) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(tx) = channels.get(room_id) {
            if tx.send(event).is_err() {
                // every subscriber hung up
                channels.remove(room_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}

/// Merge one live event into a newest-first snapshot. The realtime echo of a
/// just-committed insert can race the snapshot fetch, so inserts are dropped
/// when the id is already present (never prepend blindly).
pub fn merge_event(messages: &mut Vec<Message>, event: FeedEvent) {
    match event.kind {
        FeedEventKind::Insert => {
            if !messages.iter().any(|m| m.id == event.message.id) {
                messages.insert(0, event.message);
            }
        }
        FeedEventKind::Delete => {
            messages.retain(|m| m.id != event.message.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, text: &str) -> Message {
        Message {
            id: id.to_owned(),
            room_id: "a:b".to_owned(),
            user_id: "a".to_owned(),
            display_name: "A".to_owned(),
            text: text.to_owned(),
            created_at: 1,
        }
    }

    #[test]
    fn merge_prepends_new_and_dedupes_by_id() {
        let mut snapshot = vec![msg("2", "second"), msg("1", "first")];

        // echo of a message already in the snapshot
        merge_event(&mut snapshot, FeedEvent { kind: FeedEventKind::Insert, message: msg("2", "second") });
        assert_eq!(snapshot.len(), 2);

        merge_event(&mut snapshot, FeedEvent { kind: FeedEventKind::Insert, message: msg("3", "third") });
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].id, "3");
    }

    #[test]
    fn merge_delete_removes_row() {
        let mut snapshot = vec![msg("2", "second"), msg("1", "first")];
        merge_event(&mut snapshot, FeedEvent { kind: FeedEventKind::Delete, message: msg("1", "first") });
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "2");
    }

    #[tokio::test]
    async fn publish_reaches_only_room_subscribers() {
        let feeds = RoomFeeds::default();
        let mut rx_ab = feeds.subscribe("a:b");
        let mut rx_cd = feeds.subscribe("c:d");

        feeds.publish("a:b", FeedEvent { kind: FeedEventKind::Insert, message: msg("1", "hi") });

        let event = rx_ab.recv().await.unwrap();
        assert_eq!(event.message.text, "hi");
        assert!(rx_cd.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_room_channel_is_pruned() {
        let feeds = RoomFeeds::default();
        let rx = feeds.subscribe("a:b");
        drop(rx);

        feeds.publish("a:b", FeedEvent { kind: FeedEventKind::Insert, message: msg("1", "hi") });
        assert_eq!(feeds.channel_count(), 0);
    }
}
