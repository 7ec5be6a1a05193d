use super::*;
use crate::transport::{LinkPeer, TransportEvent, TransportLink};
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::protocol::HistoryRecord;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};
use tokio::sync::{broadcast, mpsc};

struct FakeConnector {
    peers: mpsc::UnboundedSender<LinkPeer>,
    urls: StdMutex<Vec<String>>,
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().expect("urls lock").push(url.to_string());
        if self.fail {
            bail!("connection refused");
        }
        let (link, peer) = TransportLink::channel();
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

#[derive(Default)]
struct FakeHistory {
    direct_pages: StdMutex<HashMap<(String, usize), Vec<HistoryRecord>>>,
    group_pages: StdMutex<HashMap<Option<String>, Vec<HistoryRecord>>>,
    direct_calls: StdMutex<Vec<(String, usize)>>,
    group_calls: StdMutex<Vec<(String, GroupHistoryQuery)>>,
    fail: bool,
}

impl FakeHistory {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn with_direct_page(self, contact: &str, offset: usize, page: Vec<HistoryRecord>) -> Self {
        self.direct_pages
            .lock()
            .expect("pages lock")
            .insert((contact.to_string(), offset), page);
        self
    }

    fn with_group_page(self, before_id: Option<&str>, page: Vec<HistoryRecord>) -> Self {
        self.group_pages
            .lock()
            .expect("pages lock")
            .insert(before_id.map(str::to_string), page);
        self
    }

    fn direct_calls(&self) -> Vec<(String, usize)> {
        self.direct_calls.lock().expect("calls lock").clone()
    }

    fn group_calls(&self) -> Vec<(String, GroupHistoryQuery)> {
        self.group_calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl HistoryApi for FakeHistory {
    async fn direct_history(
        &self,
        counterparty: &CanonicalId,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>> {
        self.direct_calls
            .lock()
            .expect("calls lock")
            .push((counterparty.to_string(), offset));
        if self.fail {
            bail!("history unavailable");
        }
        Ok(self
            .direct_pages
            .lock()
            .expect("pages lock")
            .get(&(counterparty.to_string(), offset))
            .cloned()
            .unwrap_or_default())
    }

    async fn group_history(
        &self,
        group_id: &CanonicalId,
        query: GroupHistoryQuery,
    ) -> Result<Vec<HistoryRecord>> {
        self.group_calls
            .lock()
            .expect("calls lock")
            .push((group_id.to_string(), query.clone()));
        if self.fail {
            bail!("history unavailable");
        }
        Ok(self
            .group_pages
            .lock()
            .expect("pages lock")
            .get(&query.before_id)
            .cloned()
            .unwrap_or_default())
    }
}

struct Harness {
    client: Arc<ChatClient>,
    connector: Arc<FakeConnector>,
    history: Arc<FakeHistory>,
    notifications: Arc<NotificationList>,
    peers: mpsc::UnboundedReceiver<LinkPeer>,
}

impl Harness {
    fn new() -> Self {
        Self::build(test_settings(), FakeHistory::default(), false)
    }

    fn build(settings: ClientSettings, history: FakeHistory, fail_connect: bool) -> Self {
        Self::build_with_identity(
            settings,
            history,
            fail_connect,
            Arc::new(StaticIdentity::new("1")),
        )
    }

    fn build_with_identity(
        settings: ClientSettings,
        history: FakeHistory,
        fail_connect: bool,
        identity: Arc<dyn SessionIdentity>,
    ) -> Self {
        let (peer_tx, peers) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            peers: peer_tx,
            urls: StdMutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail: fail_connect,
        });
        let history = Arc::new(history);
        let notifications = Arc::new(NotificationList::default());
        let client = ChatClient::new_with_dependencies(
            settings,
            connector.clone(),
            history.clone(),
            identity,
            notifications.clone(),
        );
        Self {
            client,
            connector,
            history,
            notifications,
            peers,
        }
    }

    async fn open(&mut self) -> LinkPeer {
        self.client.connect().await.expect("connect");
        tokio::time::timeout(Duration::from_secs(2), self.peers.recv())
            .await
            .expect("connector called in time")
            .expect("connector alive")
    }

    /// Opens a link and consumes the roster request written on open.
    async fn open_idle(&mut self) -> LinkPeer {
        let mut peer = self.open().await;
        assert_eq!(next_written(&mut peer).await, json!({"type": "user_list_request"}));
        peer
    }

    async fn deliver(&self, frame: Value) {
        self.client.handle_frame(&frame.to_string()).await;
    }
}

fn test_settings() -> ClientSettings {
    ClientSettings {
        server_url: "http://chat.test".into(),
        ..ClientSettings::default()
    }
}

fn id(value: &str) -> CanonicalId {
    CanonicalId::from(value)
}

fn record(id: i64, sender: &str, content: &str) -> HistoryRecord {
    HistoryRecord {
        id: Some(CanonicalId::from(id)),
        sender_id: Some(CanonicalId::from(sender)),
        receiver_id: None,
        content: content.into(),
        sender_name: None,
        created_at: Some("2024-03-01T10:00:00Z".into()),
    }
}

fn direct(sender: &str, receiver: &str, content: &str) -> Value {
    json!({
        "type": "message",
        "sender_id": sender.parse::<i64>().expect("numeric id"),
        "receiver_id": receiver,
        "sender_name": format!("name-{sender}"),
        "content": content,
    })
}

async fn next_written(peer: &mut LinkPeer) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(2), peer.written.recv())
        .await
        .expect("frame written in time")
        .expect("link still open");
    serde_json::from_str(&text).expect("written frame is json")
}

async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    wanted: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("event in time")
}

async fn ids_of(client: &ChatClient, contact: &str) -> Vec<String> {
    client
        .conversation(&id(contact))
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|message| message.id)
        .collect()
}

async fn unread_of(client: &ChatClient, contact: &str) -> Option<u32> {
    client
        .contacts()
        .await
        .into_iter()
        .find(|c| c.id.as_str() == contact)
        .map(|c| c.unread)
}

#[tokio::test]
async fn queued_sends_flush_in_order_before_roster_request() {
    let mut harness = Harness::new();
    harness.client.set_active_contact(Some(id("5"))).await;

    assert_eq!(
        harness.client.send_group_message(Some(id("9")), "first").await,
        Ok(SendOutcome::Queued)
    );
    assert_eq!(
        harness.client.send_group_message(Some(id("9")), " second ").await,
        Ok(SendOutcome::Queued)
    );
    assert_eq!(harness.client.pending_outbound().await, 2);

    let mut peer = harness.open().await;
    assert_eq!(
        next_written(&mut peer).await,
        json!({"type": "group_message", "group_id": 9, "content": "first"})
    );
    assert_eq!(
        next_written(&mut peer).await,
        json!({"type": "group_message", "group_id": 9, "content": "second"})
    );
    assert_eq!(next_written(&mut peer).await, json!({"type": "user_list_request"}));

    assert!(harness.client.is_connected().await);
    assert_eq!(harness.client.pending_outbound().await, 0);
    assert_eq!(
        harness.connector.urls.lock().expect("urls lock").as_slice(),
        ["ws://chat.test/ws"]
    );
}

#[tokio::test]
async fn open_link_sends_immediately_to_the_active_contact() {
    let mut harness = Harness::new();
    let mut peer = harness.open_idle().await;
    harness.client.set_active_contact(Some(id("5"))).await;

    assert_eq!(
        harness.client.send_message(None, "  hi  ").await,
        Ok(SendOutcome::Sent)
    );
    assert_eq!(
        next_written(&mut peer).await,
        json!({"type": "message", "receiver_id": "5", "content": "hi"})
    );
    assert_eq!(harness.client.pending_outbound().await, 0);
}

#[tokio::test]
async fn blank_content_is_neither_queued_nor_written() {
    let mut harness = Harness::new();
    assert_eq!(
        harness.client.send_message(Some(id("2")), "   ").await,
        Err(SendError::EmptyContent)
    );
    assert_eq!(harness.client.pending_outbound().await, 0);

    let mut peer = harness.open_idle().await;
    assert_eq!(
        harness.client.send_group_message(Some(id("9")), "\n\t").await,
        Err(SendError::EmptyContent)
    );
    assert!(peer.written.try_recv().is_err());
    assert_eq!(harness.client.next_error().await, None);
}

#[tokio::test]
async fn missing_targets_surface_user_errors() {
    let harness = Harness::new();

    assert_eq!(
        harness.client.send_message(None, "hello").await,
        Err(SendError::MissingReceiver)
    );
    assert_eq!(
        harness.client.send_group_message(None, "hello").await,
        Err(SendError::MissingGroup)
    );

    assert_eq!(harness.client.next_error().await.as_deref(), Some(CHOOSE_RECIPIENT));
    assert_eq!(harness.client.next_error().await.as_deref(), Some(GROUP_ID_REQUIRED));
    assert_eq!(harness.client.next_error().await, None);
    assert_eq!(harness.client.pending_outbound().await, 0);
}

#[tokio::test]
async fn full_queue_rejects_new_sends() {
    let settings = ClientSettings {
        max_pending_outbound: 2,
        ..test_settings()
    };
    let harness = Harness::build(settings, FakeHistory::default(), false);

    for content in ["a", "b"] {
        harness
            .client
            .send_message(Some(id("2")), content)
            .await
            .expect("room in queue");
    }
    assert_eq!(
        harness.client.send_message(Some(id("2")), "c").await,
        Err(SendError::QueueFull { capacity: 2 })
    );
    assert_eq!(harness.client.pending_outbound().await, 2);
    assert_eq!(harness.client.next_error().await.as_deref(), Some(QUEUE_FULL));
}

#[tokio::test]
async fn disconnect_discards_queue_and_releases_link() {
    let mut harness = Harness::new();
    harness
        .client
        .send_message(Some(id("2")), "never sent")
        .await
        .expect("queued");
    harness.client.disconnect().await;
    assert_eq!(harness.client.pending_outbound().await, 0);

    let mut peer = harness.open_idle().await;
    harness.client.disconnect().await;

    assert!(!harness.client.is_connected().await);
    let closed = tokio::time::timeout(Duration::from_secs(2), peer.written.recv())
        .await
        .expect("close observed in time");
    assert_eq!(closed, None);
    assert_eq!(
        harness.client.send_message(Some(id("2")), "later").await,
        Ok(SendOutcome::Queued)
    );
}

#[tokio::test]
async fn repeated_connect_keeps_a_single_link() {
    let mut harness = Harness::new();
    harness.client.connect().await.expect("first connect");
    harness.client.connect().await.expect("second connect while opening");
    let _peer = harness.peers.recv().await.expect("connector called");
    harness.client.connect().await.expect("third connect while open");
    tokio::task::yield_now().await;

    assert_eq!(harness.connector.calls.load(Ordering::SeqCst), 1);
    assert!(harness.peers.try_recv().is_err());
}

#[tokio::test]
async fn unsupported_server_scheme_is_rejected() {
    let settings = ClientSettings {
        server_url: "ftp://chat.test".into(),
        ..test_settings()
    };
    let harness = Harness::build(settings, FakeHistory::default(), false);

    assert!(matches!(
        harness.client.connect().await,
        Err(ConnectError::UnsupportedScheme(_))
    ));
    assert_eq!(harness.connector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn inbound_burst_flushes_at_threshold_then_on_timer() {
    let harness = Harness::new();

    for n in 0..25 {
        harness
            .deliver(direct("2", "1", &format!("m{n}")))
            .await;
        if n == 19 {
            assert_eq!(ids_of(&harness.client, "2").await.len(), 20);
        }
    }
    assert_eq!(ids_of(&harness.client, "2").await.len(), 20);

    tokio::time::sleep(Duration::from_millis(299)).await;
    assert_eq!(ids_of(&harness.client, "2").await.len(), 20);

    tokio::time::sleep(Duration::from_millis(2)).await;
    tokio::task::yield_now().await;
    let messages = harness.client.conversation(&id("2")).await.expect("conversation");
    assert_eq!(messages.len(), 25);
    assert_eq!(messages[24].content, "m24");
    assert!(messages.iter().all(|m| !m.outgoing));
    assert_eq!(unread_of(&harness.client, "2").await, Some(25));
}

#[tokio::test(start_paused = true)]
async fn forced_flush_delivers_and_disarms_the_timer() {
    let harness = Harness::new();
    for content in ["a", "b", "c"] {
        harness.deliver(direct("2", "1", content)).await;
    }
    assert_eq!(harness.client.conversation(&id("2")).await, None);

    harness.client.flush_incoming().await;
    assert_eq!(ids_of(&harness.client, "2").await.len(), 3);
    assert!(harness.client.inner.lock().await.flush_timer.is_none());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(ids_of(&harness.client, "2").await.len(), 3);
}

#[tokio::test]
async fn placeholder_contacts_follow_direction_and_selection() {
    let harness = Harness::new();
    harness.deliver(direct("1", "3", "echo of mine")).await;
    harness.deliver(direct("4", "1", "hello")).await;
    harness.client.flush_incoming().await;

    let contacts = harness.client.contacts().await;
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].id.as_str(), "3");
    assert_eq!(contacts[0].display_name, "User 3");
    assert_eq!(contacts[0].unread, 0);
    assert_eq!(contacts[1].nickname, "name-4");
    assert_eq!(contacts[1].unread, 1);
    assert!(contacts[1].is_online);

    let mine = harness.client.conversation(&id("3")).await.expect("conversation");
    assert!(mine[0].outgoing);
    assert!(!mine[0].id.is_empty());

    harness.client.set_active_contact(Some(id("6"))).await;
    harness.deliver(direct("6", "1", "while active")).await;
    harness.client.flush_incoming().await;
    assert_eq!(unread_of(&harness.client, "6").await, Some(0));
}

#[tokio::test]
async fn zero_ids_are_treated_as_unassigned() {
    let harness = Harness::new();
    harness
        .deliver(json!({"type": "message", "id": 0, "sender_id": 2, "receiver_id": 1, "content": "a"}))
        .await;
    harness
        .deliver(json!({"type": "message", "id": "0", "sender_id": 2, "receiver_id": 1, "content": "b"}))
        .await;
    harness
        .deliver(json!({"type": "message", "id": 12, "sender_id": 2, "receiver_id": 1, "content": "c"}))
        .await;
    harness.client.flush_incoming().await;

    let ids = ids_of(&harness.client, "2").await;
    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], "0");
    assert!(ids[0].ends_with("-0"));
    assert!(ids[1].ends_with("-1"));
    assert_eq!(ids[2], "12");

    harness
        .deliver(json!({"type": "group_message", "id": 0, "group_id": 9, "sender_id": 2, "content": "g"}))
        .await;
    let group = harness.client.group_conversation(&id("9")).await.expect("group");
    assert!(group[0].id.ends_with("-0"));
}

#[tokio::test]
async fn reopened_link_keeps_the_captured_user_after_identity_clears() {
    let identity = Arc::new(SharedIdentity::default());
    identity.set("1");
    let mut harness = Harness::build_with_identity(
        test_settings(),
        FakeHistory::default(),
        false,
        identity.clone(),
    );
    let _first = harness.open_idle().await;
    harness.client.disconnect().await;
    identity.clear();
    let _second = harness.open_idle().await;
    assert_eq!(harness.client.inner.lock().await.current_user, Some(id("1")));

    harness.deliver(direct("1", "3", "sent from another tab")).await;
    harness.client.flush_incoming().await;
    let mine = harness.client.conversation(&id("3")).await.expect("conversation");
    assert!(mine[0].outgoing);
    assert_eq!(unread_of(&harness.client, "3").await, Some(0));
}

#[tokio::test]
async fn selecting_contacts_refetches_history_every_time() {
    let history = FakeHistory::default()
        .with_direct_page("2", 0, vec![record(10, "2", "hi"), record(11, "1", "hey")])
        .with_direct_page("3", 0, vec![record(20, "3", "yo")]);
    let harness = Harness::build(test_settings(), history, false);

    assert_eq!(harness.client.set_active_contact(Some(id("2"))).await, 2);
    assert_eq!(harness.client.set_active_contact(Some(id("3"))).await, 1);
    assert_eq!(harness.client.set_active_contact(Some(id("2"))).await, 2);

    assert_eq!(
        harness.history.direct_calls(),
        [("2".to_string(), 0), ("3".to_string(), 0), ("2".to_string(), 0)]
    );
    let active = harness.client.active_conversation().await;
    assert_eq!(active.len(), 2);
    assert!(!active[0].outgoing);
    assert!(active[1].outgoing);
    assert_eq!(harness.client.active_contact_id().await, Some(id("2")));

    assert_eq!(harness.client.set_active_contact(None).await, 0);
    assert_eq!(harness.client.active_contact_id().await, None);
    assert!(harness.client.active_conversation().await.is_empty());
}

#[tokio::test]
async fn activation_replaces_live_messages_with_the_fetched_page() {
    let history = FakeHistory::default().with_direct_page("2", 0, vec![record(7, "2", "from server")]);
    let harness = Harness::build(test_settings(), history, false);
    harness.deliver(direct("2", "1", "live one")).await;
    harness.deliver(direct("2", "1", "live two")).await;
    harness.client.flush_incoming().await;
    assert_eq!(unread_of(&harness.client, "2").await, Some(2));

    harness.client.set_active_contact(Some(id("2"))).await;

    assert_eq!(ids_of(&harness.client, "2").await, ["7"]);
    assert_eq!(unread_of(&harness.client, "2").await, Some(0));
}

#[tokio::test]
async fn history_failures_leave_conversations_untouched() {
    let harness = Harness::build(test_settings(), FakeHistory::failing(), false);
    harness.deliver(direct("2", "1", "kept")).await;
    harness.client.flush_incoming().await;

    assert_eq!(harness.client.set_active_contact(Some(id("2"))).await, 0);
    assert_eq!(harness.client.load_more_history(&id("2")).await, 0);
    assert_eq!(harness.client.set_active_group(Some(id("9"))).await, 0);
    assert_eq!(harness.client.load_more_group_history(&id("9")).await, 0);

    let kept = harness.client.conversation(&id("2")).await.expect("conversation");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].content, "kept");
    assert_eq!(harness.client.active_contact_id().await, Some(id("2")));
    assert_eq!(harness.client.group_conversation(&id("9")).await, Some(Vec::new()));
}

#[tokio::test]
async fn older_direct_pages_are_prepended_without_dedup() {
    let history = FakeHistory::default()
        .with_direct_page("2", 0, vec![record(10, "2", "b"), record(11, "2", "c")])
        .with_direct_page("2", 2, vec![record(9, "2", "a"), record(10, "2", "b")]);
    let harness = Harness::build(test_settings(), history, false);

    harness.client.set_active_contact(Some(id("2"))).await;
    assert_eq!(harness.client.load_more_history(&id("2")).await, 2);
    assert_eq!(ids_of(&harness.client, "2").await, ["9", "10", "10", "11"]);

    assert_eq!(harness.client.load_more_history(&id("2")).await, 0);
    assert_eq!(harness.history.direct_calls().last(), Some(&("2".to_string(), 4)));
}

#[tokio::test]
async fn backfilling_an_unseen_conversation_creates_it() {
    let harness = Harness::new();
    assert_eq!(harness.client.load_more_history(&id("7")).await, 0);
    assert_eq!(harness.client.conversation(&id("7")).await, Some(Vec::new()));
    assert_eq!(harness.history.direct_calls(), [("7".to_string(), 0)]);

    let failing = Harness::build(test_settings(), FakeHistory::failing(), false);
    assert_eq!(failing.client.load_more_history(&id("8")).await, 0);
    assert_eq!(failing.client.conversation(&id("8")).await, Some(Vec::new()));
    assert_eq!(failing.client.load_more_group_history(&id("9")).await, 0);
    assert_eq!(failing.client.group_conversation(&id("9")).await, Some(Vec::new()));
}

#[tokio::test]
async fn group_history_uses_oldest_id_as_cursor() {
    let history = FakeHistory::default()
        .with_group_page(None, vec![record(40, "5", "newest")])
        .with_group_page(Some("40"), vec![record(38, "1", "older"), record(39, "5", "old")]);
    let harness = Harness::build(test_settings(), history, false);

    assert_eq!(harness.client.set_active_group(Some(id("9"))).await, 1);
    assert_eq!(harness.client.active_group_id().await, Some(id("9")));
    assert_eq!(harness.client.load_more_group_history(&id("9")).await, 2);

    let calls = harness.history.group_calls();
    assert_eq!(calls[0], ("9".to_string(), GroupHistoryQuery::default()));
    assert_eq!(
        calls[1],
        (
            "9".to_string(),
            GroupHistoryQuery {
                before_id: Some("40".into()),
                limit: Some(50),
            }
        )
    );
    let group = harness.client.group_conversation(&id("9")).await.expect("group");
    let contents: Vec<_> = group.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["older", "old", "newest"]);
    assert!(group[0].outgoing);
}

#[tokio::test]
async fn group_frames_append_immediately_without_unread() {
    let harness = Harness::new();
    harness
        .deliver(json!({
            "type": "group_message",
            "id": 71,
            "group_id": 9,
            "sender_id": 1,
            "content": "mine",
            "created_at": {"String": "2024-05-01 09:00:00", "Valid": true}
        }))
        .await;
    harness
        .deliver(json!({"type": "group_message", "sender_id": 2, "content": "nowhere"}))
        .await;

    let group = harness.client.group_conversation(&id("9")).await.expect("group");
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].id, "71");
    assert!(group[0].outgoing);
    assert_eq!(group[0].timestamp, "2024-05-01 09:00:00");
    assert!(harness.client.contacts().await.is_empty());
    assert_eq!(harness.notifications.len(), 2);
}

#[tokio::test]
async fn roster_snapshot_replaces_contacts_and_moves_selection() {
    let history = FakeHistory::default().with_direct_page("3", 0, vec![record(5, "3", "hello")]);
    let harness = Harness::build(test_settings(), history, false);
    let mut events = harness.client.subscribe_events();

    harness
        .deliver(json!({"type": "user_list", "users": [{"id": 2, "nickname": "amy"}, {"id": 4}]}))
        .await;
    assert_eq!(harness.client.active_contact_id().await, Some(id("2")));
    for content in ["x", "y", "z"] {
        harness.deliver(direct("4", "1", content)).await;
    }
    harness.client.flush_incoming().await;
    assert_eq!(unread_of(&harness.client, "4").await, Some(3));

    harness
        .deliver(json!({"type": "user_list", "users": [{"id": "3", "avatar": "a/3.png", "is_online": 1}]}))
        .await;

    let contacts = harness.client.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].id.as_str(), "3");
    assert_eq!(contacts[0].unread, 0);
    assert_eq!(contacts[0].avatar, "http://chat.test/a/3.png");
    assert!(contacts[0].is_online);
    assert_eq!(harness.client.active_contact_id().await, Some(id("3")));

    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::ConversationUpdated { counterparty } if counterparty.as_str() == "3")
    })
    .await;
    assert_eq!(ids_of(&harness.client, "3").await, ["5"]);
}

#[tokio::test]
async fn roster_entries_that_fail_to_decode_are_skipped() {
    let harness = Harness::new();
    harness
        .deliver(json!({
            "type": "user_list",
            "users": [{"id": null}, {"id": 5, "nickname": 7}, {"id": 6, "nickname": "fay"}]
        }))
        .await;

    let contacts = harness.client.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].id.as_str(), "6");
    assert_eq!(contacts[0].nickname, "fay");
    assert_eq!(harness.client.active_contact_id().await, Some(id("6")));
}

#[tokio::test]
async fn roster_carries_unread_and_accepts_encoded_content() {
    let harness = Harness::new();
    harness.deliver(direct("7", "1", "before roster")).await;
    harness.client.flush_incoming().await;
    harness.client.set_active_contact(Some(id("8"))).await;

    harness
        .deliver(json!({
            "type": "user_list",
            "content": "[{\"id\":7,\"display_name\":\"Ann\"},{\"id\":8}]"
        }))
        .await;
    let contacts = harness.client.contacts().await;
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].nickname, "Ann");
    assert_eq!(contacts[0].unread, 1);
    assert_eq!(harness.client.active_contact_id().await, Some(id("8")));

    harness
        .deliver(json!({"type": "user_list", "content": "not json"}))
        .await;
    assert_eq!(harness.client.contacts().await, contacts);
}

#[tokio::test]
async fn typing_presence_follows_frames() {
    let mut harness = Harness::new();
    assert!(!harness.client.send_typing(&id("4"), true).await);

    harness.deliver(json!({"type": "typing", "sender_id": 4})).await;
    harness.deliver(json!({"type": "typing", "sender_id": "6"})).await;
    assert_eq!(harness.client.typing_users().await, [id("4"), id("6")]);
    harness.deliver(json!({"type": "stop_typing", "sender_id": 4})).await;
    assert_eq!(harness.client.typing_users().await, [id("6")]);

    let mut peer = harness.open_idle().await;
    assert!(harness.client.send_typing(&id("4"), true).await);
    assert!(harness.client.send_typing(&id("4"), false).await);
    assert_eq!(
        next_written(&mut peer).await,
        json!({"type": "typing", "receiver_id": "4"})
    );
    assert_eq!(
        next_written(&mut peer).await,
        json!({"type": "stop_typing", "receiver_id": "4"})
    );
    assert_eq!(harness.client.pending_outbound().await, 0);
}

#[tokio::test]
async fn error_frames_queue_user_messages() {
    let harness = Harness::new();
    harness
        .deliver(json!({"type": "error", "content": "User is offline"}))
        .await;
    harness.deliver(json!({"type": "error", "content": ""})).await;
    harness.deliver(json!({"type": "error"})).await;

    assert_eq!(harness.client.next_error().await.as_deref(), Some("User is offline"));
    assert_eq!(harness.client.next_error().await.as_deref(), Some(UNDELIVERED));
    assert_eq!(harness.client.next_error().await.as_deref(), Some(UNDELIVERED));
    assert_eq!(harness.client.next_error().await, None);
}

#[tokio::test]
async fn malformed_and_unknown_frames_change_nothing() {
    let harness = Harness::new();
    for text in ["not json", "[1,2]", "42", r#"{"type":"typing"}"#, r#"{"type":"presence","user_id":3}"#] {
        harness.client.handle_frame(text).await;
    }
    harness.client.flush_incoming().await;

    assert_eq!(harness.client.next_error().await, None);
    assert!(harness.client.typing_users().await.is_empty());
    assert!(harness.client.contacts().await.is_empty());
    assert!(harness.notifications.is_empty());
}

#[tokio::test]
async fn whitelisted_frames_are_mirrored_to_notifications() {
    let harness = Harness::new();
    let mut events = harness.client.subscribe_events();

    harness
        .deliver(json!({"type": "group_invite", "data": {"group_id": 3}}))
        .await;
    harness.deliver(json!({"type": "follow_request"})).await;
    harness.deliver(json!({"type": "presence"})).await;

    let records = harness.notifications.snapshot();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, "follow_request");
    assert_eq!(records[1].kind, "group_invite");
    assert_eq!(records[1].data, r#"{"group_id":3}"#);
    assert!(records.iter().all(|r| r.id < 0 && r.recipient_id == 1 && !r.is_read));
    assert!(records[0].id < records[1].id);

    let first = wait_for(&mut events, |e| matches!(e, ClientEvent::NotificationMirrored { .. })).await;
    assert_eq!(
        first,
        ClientEvent::NotificationMirrored {
            id: records[1].id,
            kind: "group_invite".into()
        }
    );
}

#[tokio::test]
async fn transport_error_then_close_without_reconnect() {
    let mut harness = Harness::new();
    let mut events = harness.client.subscribe_events();
    let peer = harness.open_idle().await;

    peer.events
        .send(TransportEvent::Frame(direct("2", "1", "over the wire").to_string()))
        .expect("link alive");
    peer.events
        .send(TransportEvent::Error("reset by peer".into()))
        .expect("link alive");
    wait_for(&mut events, |e| *e == ClientEvent::ErrorQueued).await;
    assert_eq!(harness.client.next_error().await.as_deref(), Some(CONNECTION_PROBLEM));
    assert!(harness.client.is_connected().await);

    peer.events.send(TransportEvent::Closed).expect("link alive");
    wait_for(&mut events, |e| *e == ClientEvent::ConnectionChanged { connected: false }).await;
    assert!(!harness.client.is_connected().await);
    assert!(harness.client.inner.lock().await.link.is_none());

    harness.client.flush_incoming().await;
    assert_eq!(ids_of(&harness.client, "2").await.len(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.connector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_connect_reports_and_releases_the_handle() {
    let mut harness = Harness::build(test_settings(), FakeHistory::default(), true);
    let mut events = harness.client.subscribe_events();

    harness.client.connect().await.expect("connect spawns");
    wait_for(&mut events, |e| *e == ClientEvent::ErrorQueued).await;
    assert_eq!(harness.client.next_error().await.as_deref(), Some(CONNECTION_PROBLEM));

    tokio::time::timeout(Duration::from_secs(2), async {
        while harness.client.inner.lock().await.link.is_some() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("handle released");
    assert!(!harness.client.is_connected().await);

    harness.client.connect().await.expect("retry allowed");
    wait_for(&mut events, |e| *e == ClientEvent::ErrorQueued).await;
    assert_eq!(harness.connector.calls.load(Ordering::SeqCst), 2);
    assert!(harness.peers.try_recv().is_err());
}

#[tokio::test]
async fn callbacks_from_a_replaced_link_are_ignored() {
    let mut harness = Harness::new();
    let _first = harness.open_idle().await;
    let stale_generation = harness.client.inner.lock().await.link_generation;
    harness.client.disconnect().await;
    let _second = harness.open_idle().await;

    harness.client.on_transport_error(stale_generation).await;
    harness.client.on_close(stale_generation).await;

    assert!(harness.client.is_connected().await);
    assert_eq!(harness.client.next_error().await, None);
}

#[tokio::test]
async fn reset_forgets_the_session() {
    let mut harness = Harness::new();
    let _peer = harness.open_idle().await;
    harness
        .deliver(json!({"type": "user_list", "users": [{"id": 2}]}))
        .await;
    harness.deliver(json!({"type": "typing", "sender_id": 2})).await;
    harness.deliver(json!({"type": "error"})).await;
    harness.deliver(direct("3", "1", "buffered")).await;

    harness.client.reset().await;

    assert!(!harness.client.is_connected().await);
    assert!(harness.client.contacts().await.is_empty());
    assert_eq!(harness.client.active_contact_id().await, None);
    assert!(harness.client.typing_users().await.is_empty());
    assert_eq!(harness.client.next_error().await, None);
    harness.client.flush_incoming().await;
    assert_eq!(harness.client.conversation(&id("3")).await, None);
}

mod live_socket {
    use super::*;
    use axum::{
        extract::{
            ws::{Message, WebSocket, WebSocketUpgrade},
            State,
        },
        http::HeaderMap,
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use futures::{SinkExt, StreamExt};
    use tokio::{net::TcpListener, sync::Mutex};

    #[derive(Clone, Default)]
    struct WsServerState {
        received: Arc<Mutex<Vec<Value>>>,
        cookies: Arc<Mutex<Vec<String>>>,
    }

    async fn ws_chat(
        ws: WebSocketUpgrade,
        headers: HeaderMap,
        State(state): State<WsServerState>,
    ) -> impl IntoResponse {
        if let Some(cookie) = headers.get("cookie").and_then(|v| v.to_str().ok()) {
            state.cookies.lock().await.push(cookie.to_string());
        }
        ws.on_upgrade(move |socket| ws_chat_session(state, socket))
    }

    async fn ws_chat_session(state: WsServerState, socket: WebSocket) {
        let (mut sender, mut receiver) = socket.split();
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            let roster_requested = frame["type"] == "user_list_request";
            state.received.lock().await.push(frame);
            if roster_requested {
                let roster = json!({
                    "type": "user_list",
                    "users": [{"id": 2, "nickname": "amy", "avatar": "/uploads/amy.png", "is_online": true}]
                });
                if sender.send(Message::Text(roster.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }

    async fn empty_history() -> Json<Value> {
        Json(Value::Null)
    }

    async fn spawn_chat_server() -> anyhow::Result<(String, WsServerState)> {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = WsServerState::default();
        let app = Router::new()
            .route("/ws", get(ws_chat))
            .route("/api/messages/history", get(empty_history))
            .with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((format!("http://{addr}"), state))
    }

    #[tokio::test]
    async fn websocket_session_round_trip() {
        let (server_url, state) = spawn_chat_server().await.expect("server");
        let settings = ClientSettings {
            server_url: server_url.clone(),
            session_cookie: Some("session=abc".into()),
            ..ClientSettings::default()
        };
        let client = ChatClient::new_with_session(
            settings,
            Arc::new(StaticIdentity::new("1")),
            Arc::new(NullNotificationSink),
        );
        let mut events = client.subscribe_events();

        client.connect().await.expect("connect");
        wait_for(&mut events, |e| *e == ClientEvent::ActiveContactChanged(Some(id("2")))).await;

        let contacts = client.contacts().await;
        assert_eq!(contacts[0].nickname, "amy");
        assert_eq!(contacts[0].avatar, format!("{server_url}/uploads/amy.png"));
        assert_eq!(state.cookies.lock().await.as_slice(), ["session=abc"]);

        assert_eq!(client.send_message(None, "hello amy").await, Ok(SendOutcome::Sent));
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.received.lock().await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server saw both frames");
        assert_eq!(
            state.received.lock().await[1],
            json!({"type": "message", "receiver_id": "2", "content": "hello amy"})
        );

        client.disconnect().await;
        assert!(!client.is_connected().await);
    }
}
