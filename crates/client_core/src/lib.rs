use std::{
    collections::{BTreeSet, VecDeque},
    sync::Arc,
};

use shared::protocol::{
    parse_frame_object, DirectMessageFrame, GroupMessageFrame, InboundFrame, OutboundFrame,
    RosterFrame,
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

pub mod batcher;
pub mod config;
pub mod contacts;
pub mod conversations;
pub mod error;
pub mod history;
pub mod identity;
pub mod notifications;
pub mod outbound;
pub mod transport;
pub mod types;

use batcher::{BatchDecision, InboundBatcher};
use contacts::ContactDirectory;
use conversations::{messages_from_history, ConversationKind, ConversationStore};
use notifications::NotificationBridge;
use outbound::OutboundQueue;
use transport::{websocket_url, TransportEvent, TransportLink};

pub use config::{load_settings, load_settings_from, ClientSettings};
pub use error::{ConnectError, SendError};
pub use history::{GroupHistoryQuery, HistoryApi, HttpHistoryClient};
pub use identity::{SessionIdentity, SharedIdentity, StaticIdentity};
pub use notifications::{NotificationList, NotificationSink, NullNotificationSink};
pub use shared::domain::CanonicalId;
pub use transport::{Connector, WsConnector};
pub use types::{ChatMessage, ClientEvent, Contact, NotificationRecord, SendOutcome};

pub const CONNECTION_PROBLEM: &str = "Connection problem. Please try again.";
pub const CHOOSE_RECIPIENT: &str = "Choose someone to chat with.";
pub const GROUP_ID_REQUIRED: &str = "Group id required";
pub const QUEUE_FULL: &str = "Too many unsent messages. Reconnect and try again.";
pub const UNDELIVERED: &str = "Unable to deliver message.";

/// Session-scoped realtime chat engine. Owns one socket, the pending
/// outbound queue and every conversation and contact held in memory.
pub struct ChatClient {
    settings: ClientSettings,
    connector: Arc<dyn Connector>,
    history: Arc<dyn HistoryApi>,
    identity: Arc<dyn SessionIdentity>,
    inner: Mutex<ChatClientState>,
    events: broadcast::Sender<ClientEvent>,
}

struct LinkHandle {
    generation: u64,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    task: JoinHandle<()>,
}

struct FlushTimer {
    generation: u64,
    task: JoinHandle<()>,
}

struct ChatClientState {
    connected: bool,
    link: Option<LinkHandle>,
    link_generation: u64,
    current_user: Option<CanonicalId>,
    outbound: OutboundQueue,
    batcher: InboundBatcher,
    flush_timer: Option<FlushTimer>,
    timer_generation: u64,
    conversations: ConversationStore,
    contacts: ContactDirectory,
    active_group: Option<CanonicalId>,
    typing: BTreeSet<CanonicalId>,
    errors: VecDeque<String>,
    notifications: NotificationBridge,
}

impl ChatClient {
    pub fn new(settings: ClientSettings) -> Arc<Self> {
        Self::new_with_session(
            settings,
            Arc::new(StaticIdentity::anonymous()),
            Arc::new(NullNotificationSink),
        )
    }

    pub fn new_with_session(
        settings: ClientSettings,
        identity: Arc<dyn SessionIdentity>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let connector = Arc::new(WsConnector::new(settings.session_cookie.clone()));
        let history = Arc::new(HttpHistoryClient::new(
            settings.server_url.clone(),
            settings.session_cookie.clone(),
        ));
        Self::new_with_dependencies(settings, connector, history, identity, notifications)
    }

    pub fn new_with_dependencies(
        settings: ClientSettings,
        connector: Arc<dyn Connector>,
        history: Arc<dyn HistoryApi>,
        identity: Arc<dyn SessionIdentity>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let asset_base = match Url::parse(&settings.server_url) {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(server_url = %settings.server_url, error = %err, "chat: server url does not parse, avatars stay relative");
                None
            }
        };
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            inner: Mutex::new(ChatClientState {
                connected: false,
                link: None,
                link_generation: 0,
                current_user: None,
                outbound: OutboundQueue::new(settings.max_pending_outbound),
                batcher: InboundBatcher::new(settings.batch_max_items),
                flush_timer: None,
                timer_generation: 0,
                conversations: ConversationStore::default(),
                contacts: ContactDirectory::new(asset_base),
                active_group: None,
                typing: BTreeSet::new(),
                errors: VecDeque::new(),
                notifications: NotificationBridge::new(notifications),
            }),
            settings,
            connector,
            history,
            identity,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn push_error(&self, state: &mut ChatClientState, message: impl Into<String>) {
        state.errors.push_back(message.into());
        self.emit(ClientEvent::ErrorQueued);
    }

    fn frame_user(&self, state: &ChatClientState) -> Option<CanonicalId> {
        self.identity
            .current_user_id()
            .or_else(|| state.current_user.clone())
    }

    // Connection

    /// Opens the socket in the background. Does nothing while a link is
    /// open or still opening.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectError> {
        let mut guard = self.inner.lock().await;
        if guard.link.is_some() {
            debug!("chat: connect ignored, link already present");
            return Ok(());
        }
        let url = websocket_url(&self.settings.server_url, &self.settings.ws_path)?;

        guard.link_generation += 1;
        let generation = guard.link_generation;
        info!(url = %url, generation, "chat: opening websocket");
        let client = Arc::clone(self);
        let task = tokio::spawn(async move { client.run_link(generation, url).await });
        guard.link = Some(LinkHandle {
            generation,
            outgoing: None,
            task,
        });
        Ok(())
    }

    async fn run_link(self: Arc<Self>, generation: u64, url: String) {
        let TransportLink {
            outgoing,
            mut incoming,
        } = match self.connector.connect(&url).await {
            Ok(link) => link,
            Err(err) => {
                warn!(url = %url, error = %format!("{err:#}"), "chat: websocket connect failed");
                self.on_transport_error(generation).await;
                self.on_close(generation).await;
                return;
            }
        };
        if !self.on_open(generation, outgoing).await {
            return;
        }

        while let Some(event) = incoming.recv().await {
            match event {
                TransportEvent::Frame(text) => self.handle_frame(&text).await,
                TransportEvent::Error(err) => {
                    warn!(error = %err, "chat: transport error");
                    self.on_transport_error(generation).await;
                }
                TransportEvent::Closed => break,
            }
        }
        self.on_close(generation).await;
    }

    async fn on_open(&self, generation: u64, outgoing: mpsc::UnboundedSender<String>) -> bool {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        let Some(link) = state
            .link
            .as_mut()
            .filter(|link| link.generation == generation)
        else {
            debug!(generation, "chat: stale link opened, dropping it");
            return false;
        };

        state.connected = true;
        state.current_user = self
            .identity
            .current_user_id()
            .or(state.current_user.take());
        let pending = state.outbound.drain();
        info!(
            generation,
            pending = pending.len(),
            user_id = ?state.current_user,
            "chat: websocket connected"
        );
        for frame in &pending {
            write_frame(&outgoing, frame);
        }
        write_frame(&outgoing, &OutboundFrame::UserListRequest);
        link.outgoing = Some(outgoing);
        drop(guard);

        self.emit(ClientEvent::ConnectionChanged { connected: true });
        true
    }

    async fn on_close(&self, generation: u64) {
        let mut guard = self.inner.lock().await;
        if guard.link.as_ref().map(|link| link.generation) != Some(generation) {
            return;
        }
        guard.link = None;
        let was_connected = std::mem::replace(&mut guard.connected, false);
        drop(guard);

        info!(generation, "chat: websocket closed");
        if was_connected {
            self.emit(ClientEvent::ConnectionChanged { connected: false });
        }
    }

    async fn on_transport_error(&self, generation: u64) {
        let mut guard = self.inner.lock().await;
        if guard.link.as_ref().map(|link| link.generation) == Some(generation) {
            self.push_error(&mut guard, CONNECTION_PROBLEM);
        }
    }

    pub async fn disconnect(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(link) = guard.link.take() {
            info!(generation = link.generation, "chat: disconnecting");
            drop(link.outgoing);
            link.task.abort();
        }
        let was_connected = std::mem::replace(&mut guard.connected, false);
        let discarded = guard.outbound.clear();
        if discarded > 0 {
            info!(discarded, "chat: dropped unsent messages");
        }
        drop(guard);

        if was_connected {
            self.emit(ClientEvent::ConnectionChanged { connected: false });
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn pending_outbound(&self) -> usize {
        self.inner.lock().await.outbound.len()
    }

    pub async fn next_error(&self) -> Option<String> {
        self.inner.lock().await.errors.pop_front()
    }

    // Outbound

    pub async fn send_message(
        &self,
        receiver_id: Option<CanonicalId>,
        content: &str,
    ) -> Result<SendOutcome, SendError> {
        let mut guard = self.inner.lock().await;
        let receiver_id = receiver_id
            .filter(|id| !id.is_empty())
            .or_else(|| guard.contacts.active_id().cloned());
        let Some(receiver_id) = receiver_id else {
            self.push_error(&mut guard, CHOOSE_RECIPIENT);
            return Err(SendError::MissingReceiver);
        };
        let content = content.trim();
        if content.is_empty() {
            return Err(SendError::EmptyContent);
        }

        let frame = OutboundFrame::Message {
            receiver_id,
            content: content.to_string(),
        };
        self.dispatch_outbound(&mut guard, frame)
    }

    pub async fn send_group_message(
        &self,
        group_id: Option<CanonicalId>,
        content: &str,
    ) -> Result<SendOutcome, SendError> {
        let mut guard = self.inner.lock().await;
        let Some(group_id) = group_id.filter(|id| !id.is_empty()) else {
            self.push_error(&mut guard, GROUP_ID_REQUIRED);
            return Err(SendError::MissingGroup);
        };
        let content = content.trim();
        if content.is_empty() {
            return Err(SendError::EmptyContent);
        }

        let frame = OutboundFrame::GroupMessage {
            group_id,
            content: content.to_string(),
        };
        self.dispatch_outbound(&mut guard, frame)
    }

    /// Typing hints are written only on an open link and never queued.
    pub async fn send_typing(&self, receiver_id: &CanonicalId, typing: bool) -> bool {
        let guard = self.inner.lock().await;
        let Some(outgoing) = open_writer(&guard) else {
            return false;
        };
        let frame = if typing {
            OutboundFrame::Typing {
                receiver_id: receiver_id.clone(),
            }
        } else {
            OutboundFrame::StopTyping {
                receiver_id: receiver_id.clone(),
            }
        };
        write_frame(outgoing, &frame)
    }

    fn dispatch_outbound(
        &self,
        state: &mut ChatClientState,
        frame: OutboundFrame,
    ) -> Result<SendOutcome, SendError> {
        if let Some(outgoing) = open_writer(state) {
            if write_frame(outgoing, &frame) {
                return Ok(SendOutcome::Sent);
            }
        }
        match state.outbound.push(frame) {
            Ok(()) => {
                debug!(pending = state.outbound.len(), "chat: queued outbound frame");
                Ok(SendOutcome::Queued)
            }
            Err(err) => {
                warn!(error = %err, "chat: outbound queue full");
                self.push_error(state, QUEUE_FULL);
                Err(err)
            }
        }
    }

    // Inbound

    pub async fn handle_frame(self: &Arc<Self>, text: &str) {
        let object = match parse_frame_object(text) {
            Ok(object) => object,
            Err(err) => {
                warn!(error = %err, "chat: dropping malformed frame");
                return;
            }
        };

        let mut guard = self.inner.lock().await;
        let recipient_id = self
            .frame_user(&guard)
            .and_then(|id| id.as_i64())
            .unwrap_or(0);
        if let Some((id, kind)) = guard.notifications.mirror(&object, recipient_id) {
            debug!(id, kind = %kind, "chat: mirrored notification");
            self.emit(ClientEvent::NotificationMirrored { id, kind });
        }

        let frame = match InboundFrame::from_object(object) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "chat: dropping frame with unexpected shape");
                return;
            }
        };
        match frame {
            InboundFrame::Message(message) => self.buffer_direct_message(&mut guard, message),
            InboundFrame::GroupMessage(message) => self.apply_group_message(&mut guard, message),
            InboundFrame::UserList(roster) => {
                let activate = self.apply_roster(&mut guard, roster);
                drop(guard);
                if let Some(contact_id) = activate {
                    let client = Arc::clone(self);
                    tokio::spawn(async move {
                        client.refresh_direct_history(&contact_id).await;
                    });
                }
            }
            InboundFrame::Typing(typing) => {
                guard.typing.insert(typing.sender_id.clone());
                self.emit(ClientEvent::TypingChanged {
                    sender_id: typing.sender_id,
                    typing: true,
                });
            }
            InboundFrame::StopTyping(typing) => {
                guard.typing.remove(&typing.sender_id);
                self.emit(ClientEvent::TypingChanged {
                    sender_id: typing.sender_id,
                    typing: false,
                });
            }
            InboundFrame::Error(error) => {
                let message = error
                    .content
                    .filter(|content| !content.is_empty())
                    .unwrap_or_else(|| UNDELIVERED.to_string());
                self.push_error(&mut guard, message);
            }
            InboundFrame::Unknown => debug!("chat: ignoring unhandled frame type"),
        }
    }

    fn buffer_direct_message(self: &Arc<Self>, state: &mut ChatClientState, frame: DirectMessageFrame) {
        match state.batcher.push(frame) {
            BatchDecision::ArmTimer => self.arm_flush_timer(state),
            BatchDecision::Pending => {}
            BatchDecision::FlushNow => self.flush_buffer(state),
        }
    }

    fn arm_flush_timer(self: &Arc<Self>, state: &mut ChatClientState) {
        state.timer_generation += 1;
        let generation = state.timer_generation;
        let window = self.settings.batch_window();
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            client.flush_from_timer(generation).await;
        });
        if let Some(stale) = state.flush_timer.replace(FlushTimer { generation, task }) {
            stale.task.abort();
        }
    }

    async fn flush_from_timer(&self, generation: u64) {
        let mut guard = self.inner.lock().await;
        if guard.flush_timer.as_ref().map(|timer| timer.generation) != Some(generation) {
            return;
        }
        guard.flush_timer = None;
        self.flush_buffer(&mut guard);
    }

    pub async fn flush_incoming(&self) {
        let mut guard = self.inner.lock().await;
        self.flush_buffer(&mut guard);
    }

    fn flush_buffer(&self, state: &mut ChatClientState) {
        if let Some(timer) = state.flush_timer.take() {
            timer.task.abort();
        }
        let batch = state.batcher.take();
        if batch.is_empty() {
            return;
        }

        let me = self.frame_user(state);
        let mut touched: Vec<CanonicalId> = Vec::new();
        for frame in batch {
            let outgoing = me.is_some() && frame.sender_id == me;
            let counterparty = if outgoing {
                frame.receiver_id.clone()
            } else {
                frame.sender_id.clone()
            };
            let Some(counterparty) = counterparty.filter(|id| !id.is_empty()) else {
                debug!("chat: direct message without counterparty, skipping");
                continue;
            };

            state
                .conversations
                .append_with(ConversationKind::Direct, &counterparty, |index| {
                    ChatMessage::new(
                        frame.id.as_ref(),
                        frame.content,
                        outgoing,
                        frame.sender_name.clone(),
                        frame.created_at,
                        index,
                    )
                });

            let active = state.contacts.is_active(&counterparty);
            if active {
                state.contacts.mark_read(&counterparty);
            } else if !outgoing {
                state.contacts.increment_unread(&counterparty);
            }
            if !state.contacts.contains(&counterparty) {
                let unread = u32::from(!outgoing && !active);
                let name = if outgoing { None } else { frame.sender_name };
                state
                    .contacts
                    .insert(Contact::placeholder(counterparty.clone(), name, unread));
            }
            if !touched.contains(&counterparty) {
                touched.push(counterparty);
            }
        }

        debug!(conversations = touched.len(), "chat: flushed inbound batch");
        for counterparty in touched {
            self.emit(ClientEvent::ConversationUpdated { counterparty });
        }
        self.emit(ClientEvent::ContactsUpdated);
    }

    fn apply_group_message(&self, state: &mut ChatClientState, frame: GroupMessageFrame) {
        let Some(group_id) = frame.group_id.filter(|id| !id.is_empty()) else {
            debug!("chat: group message without group id, ignoring");
            return;
        };
        let me = self.frame_user(state);
        let outgoing = me.is_some() && frame.sender_id == me;
        state
            .conversations
            .append_with(ConversationKind::Group, &group_id, |index| {
                ChatMessage::new(
                    frame.id.as_ref(),
                    frame.content,
                    outgoing,
                    frame.sender_name,
                    frame.created_at,
                    index,
                )
            });
        self.emit(ClientEvent::GroupConversationUpdated { group_id });
    }

    fn apply_roster(&self, state: &mut ChatClientState, roster: RosterFrame) -> Option<CanonicalId> {
        let snapshot = match roster.into_users() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "chat: cannot parse user list");
                return None;
            }
        };
        if snapshot.skipped > 0 {
            warn!(skipped = snapshot.skipped, "chat: ignoring malformed roster entries");
        }
        let previous = state.contacts.active_id().cloned();
        let activate = state.contacts.apply_snapshot(snapshot.users);
        info!(contacts = state.contacts.contacts().len(), "chat: roster updated");
        self.emit(ClientEvent::ContactsUpdated);

        match &activate {
            Some(contact_id) => self.select_contact(state, Some(contact_id.clone())),
            None if previous.is_some() && state.contacts.active_id().is_none() => {
                self.emit(ClientEvent::ActiveContactChanged(None));
            }
            None => {}
        }
        activate
    }

    // Conversations

    fn select_contact(&self, state: &mut ChatClientState, contact_id: Option<CanonicalId>) {
        if let Some(contact_id) = &contact_id {
            state
                .conversations
                .ensure(ConversationKind::Direct, contact_id);
            state.contacts.mark_read(contact_id);
        }
        state.contacts.set_active(contact_id.clone());
        self.emit(ClientEvent::ActiveContactChanged(contact_id));
    }

    /// Selects a contact and replaces its conversation with the newest
    /// history page. Returns how many messages the page held.
    pub async fn set_active_contact(&self, contact_id: Option<CanonicalId>) -> usize {
        let contact_id = contact_id.filter(|id| !id.is_empty());
        {
            let mut guard = self.inner.lock().await;
            self.select_contact(&mut guard, contact_id.clone());
        }
        match contact_id {
            Some(contact_id) => self.refresh_direct_history(&contact_id).await,
            None => 0,
        }
    }

    async fn refresh_direct_history(&self, contact_id: &CanonicalId) -> usize {
        let records = match self.history.direct_history(contact_id, 0).await {
            Ok(records) => records,
            Err(err) => {
                warn!(contact_id = %contact_id, error = %format!("{err:#}"), "chat: failed to load history");
                return 0;
            }
        };
        let messages = messages_from_history(records, self.identity.current_user_id().as_ref());
        let loaded = messages.len();

        let mut guard = self.inner.lock().await;
        guard
            .conversations
            .replace(ConversationKind::Direct, contact_id, messages);
        guard.contacts.mark_read(contact_id);
        drop(guard);

        debug!(contact_id = %contact_id, loaded, "chat: history replaced");
        self.emit(ClientEvent::ConversationUpdated {
            counterparty: contact_id.clone(),
        });
        self.emit(ClientEvent::ContactsUpdated);
        loaded
    }

    /// Prepends the page that precedes what is held. Overlap with held
    /// messages is not filtered.
    pub async fn load_more_history(&self, contact_id: &CanonicalId) -> usize {
        let offset = self
            .inner
            .lock()
            .await
            .conversations
            .ensure(ConversationKind::Direct, contact_id)
            .len();
        let records = match self.history.direct_history(contact_id, offset).await {
            Ok(records) => records,
            Err(err) => {
                warn!(contact_id = %contact_id, offset, error = %format!("{err:#}"), "chat: failed to load older history");
                return 0;
            }
        };
        if records.is_empty() {
            return 0;
        }
        let messages = messages_from_history(records, self.identity.current_user_id().as_ref());

        let added = self.inner.lock().await.conversations.prepend(
            ConversationKind::Direct,
            contact_id,
            messages,
        );
        self.emit(ClientEvent::ConversationUpdated {
            counterparty: contact_id.clone(),
        });
        added
    }

    pub async fn set_active_group(&self, group_id: Option<CanonicalId>) -> usize {
        let group_id = group_id.filter(|id| !id.is_empty());
        {
            let mut guard = self.inner.lock().await;
            if let Some(group_id) = &group_id {
                guard.conversations.ensure(ConversationKind::Group, group_id);
            }
            guard.active_group = group_id.clone();
        }
        let Some(group_id) = group_id else {
            return 0;
        };

        let records = match self
            .history
            .group_history(&group_id, GroupHistoryQuery::default())
            .await
        {
            Ok(records) => records,
            Err(err) => {
                warn!(group_id = %group_id, error = %format!("{err:#}"), "chat: failed to load group history");
                return 0;
            }
        };
        let messages = messages_from_history(records, self.identity.current_user_id().as_ref());
        let loaded = messages.len();
        self.inner
            .lock()
            .await
            .conversations
            .replace(ConversationKind::Group, &group_id, messages);
        self.emit(ClientEvent::GroupConversationUpdated { group_id });
        loaded
    }

    pub async fn load_more_group_history(&self, group_id: &CanonicalId) -> usize {
        let before_id = {
            let mut guard = self.inner.lock().await;
            guard.conversations.ensure(ConversationKind::Group, group_id);
            guard
                .conversations
                .oldest_message_id(ConversationKind::Group, group_id)
        };
        let query = GroupHistoryQuery {
            before_id,
            limit: Some(self.settings.group_history_limit),
        };
        let records = match self.history.group_history(group_id, query).await {
            Ok(records) => records,
            Err(err) => {
                warn!(group_id = %group_id, error = %format!("{err:#}"), "chat: failed to load older group history");
                return 0;
            }
        };
        if records.is_empty() {
            return 0;
        }
        let messages = messages_from_history(records, self.identity.current_user_id().as_ref());

        let added = self.inner.lock().await.conversations.prepend(
            ConversationKind::Group,
            group_id,
            messages,
        );
        self.emit(ClientEvent::GroupConversationUpdated {
            group_id: group_id.clone(),
        });
        added
    }

    pub async fn conversation(&self, contact_id: &CanonicalId) -> Option<Vec<ChatMessage>> {
        self.inner
            .lock()
            .await
            .conversations
            .get(ConversationKind::Direct, contact_id)
            .map(<[ChatMessage]>::to_vec)
    }

    pub async fn group_conversation(&self, group_id: &CanonicalId) -> Option<Vec<ChatMessage>> {
        self.inner
            .lock()
            .await
            .conversations
            .get(ConversationKind::Group, group_id)
            .map(<[ChatMessage]>::to_vec)
    }

    pub async fn active_conversation(&self) -> Vec<ChatMessage> {
        let guard = self.inner.lock().await;
        guard
            .contacts
            .active_id()
            .and_then(|id| guard.conversations.get(ConversationKind::Direct, id))
            .map(<[ChatMessage]>::to_vec)
            .unwrap_or_default()
    }

    pub async fn active_contact(&self) -> Option<Contact> {
        self.inner.lock().await.contacts.active().cloned()
    }

    pub async fn active_contact_id(&self) -> Option<CanonicalId> {
        self.inner.lock().await.contacts.active_id().cloned()
    }

    pub async fn active_group_id(&self) -> Option<CanonicalId> {
        self.inner.lock().await.active_group.clone()
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.inner.lock().await.contacts.contacts().to_vec()
    }

    pub async fn typing_users(&self) -> Vec<CanonicalId> {
        self.inner.lock().await.typing.iter().cloned().collect()
    }

    /// Logout: closes the link and forgets every conversation, contact and
    /// pending error.
    pub async fn reset(&self) {
        self.disconnect().await;
        let mut guard = self.inner.lock().await;
        if let Some(timer) = guard.flush_timer.take() {
            timer.task.abort();
        }
        let dropped = guard.batcher.take().len();
        guard.conversations.clear();
        guard.contacts.clear();
        guard.active_group = None;
        guard.typing.clear();
        guard.errors.clear();
        guard.current_user = None;
        drop(guard);

        info!(dropped, "chat: session state reset");
        self.emit(ClientEvent::ActiveContactChanged(None));
        self.emit(ClientEvent::ContactsUpdated);
    }
}

fn open_writer(state: &ChatClientState) -> Option<&mpsc::UnboundedSender<String>> {
    if !state.connected {
        return None;
    }
    state.link.as_ref().and_then(|link| link.outgoing.as_ref())
}

fn write_frame(outgoing: &mpsc::UnboundedSender<String>, frame: &OutboundFrame) -> bool {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(err) => {
            warn!(kind = frame.kind(), error = %err, "chat: failed to encode frame");
            return false;
        }
    };
    if outgoing.send(text).is_err() {
        warn!(kind = frame.kind(), "chat: link closed before frame was written");
        return false;
    }
    true
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
