use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use studyroom_api::{ApiError, ChatApi};
use studyroom_realtime::{RealtimeSource, SubscriptionHandle};
use studyroom_types::api::SendMessageRequest;
use studyroom_types::{ChatMessage, Role, RoomCode, SubscriptionKey};

use crate::panel::{LoadOutcome, PanelCell};
use crate::session::SessionProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was written: blank input, no identity, no room, or a send already in flight.
    Ignored,
    Sent,
    /// The write failed and was logged; the input is kept for another try.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub message: ChatMessage,
    /// Written by the signed-in user.
    pub mine: bool,
    pub assistant: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatView {
    /// No messages yet; show the placeholder.
    Empty,
    Messages(Vec<ChatLine>),
}

#[derive(Default)]
struct Composer {
    input: String,
    sending: bool,
}

/// Subscription and tasks owned by the current room.
struct LiveFeed {
    subscription: Option<SubscriptionHandle>,
    pump: Option<JoinHandle<()>>,
    history: AbortHandle,
}

impl LiveFeed {
    fn close(self) {
        if let Some(subscription) = self.subscription {
            subscription.close();
        }
        if let Some(pump) = self.pump {
            pump.abort();
        }
        self.history.abort();
    }
}

/// Chat panel: the room's message history plus rows pushed live, in arrival order.
pub struct ChatPanel {
    api: Arc<dyn ChatApi>,
    realtime: Arc<dyn RealtimeSource>,
    session: SessionProvider,
    cell: PanelCell<Vec<ChatMessage>>,
    feed: Mutex<Option<LiveFeed>>,
    composer: Mutex<Composer>,
}

impl ChatPanel {
    pub fn new(
        api: Arc<dyn ChatApi>,
        realtime: Arc<dyn RealtimeSource>,
        session: SessionProvider,
    ) -> Self {
        Self {
            api,
            realtime,
            session,
            cell: PanelCell::new(),
            feed: Mutex::new(None),
            composer: Mutex::new(Composer::default()),
        }
    }

    fn feed(&self) -> MutexGuard<'_, Option<LiveFeed>> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn composer(&self) -> MutexGuard<'_, Composer> {
        self.composer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_feed(&self) {
        if let Some(feed) = self.feed().take() {
            feed.close();
        }
    }

    /// Bind to `room`: request its history, open its live subscription, and
    /// wait for the history to land.
    ///
    /// Rows pushed before the history resolves are kept after it.
    pub async fn mount(&self, room: RoomCode) -> LoadOutcome {
        let history = {
            let mut feed = self.feed();
            if let Some(old) = feed.take() {
                old.close();
            }
            let generation = self.cell.retarget(Some(room.clone()));

            let history = tokio::spawn(load_history(
                self.api.clone(),
                self.cell.clone(),
                room.clone(),
                generation,
            ));

            let key = SubscriptionKey::messages(room.clone());
            let (subscription, pump) = match self.realtime.subscribe(key) {
                Ok(subscription) => {
                    let handle = subscription.handle();
                    let cell = self.cell.clone();
                    let pump = tokio::spawn(async move {
                        let mut subscription = subscription;
                        while let Some(event) = subscription.recv().await {
                            let message = match event.decode::<ChatMessage>() {
                                Ok(message) => message,
                                Err(e) => {
                                    warn!("Dropping undecodable chat row on {}: {}", event.key, e);
                                    continue;
                                }
                            };
                            if !cell.update(generation, |messages| messages.push(message)) {
                                break;
                            }
                        }
                    });
                    (Some(handle), Some(pump))
                }
                Err(e) => {
                    error!("Live updates unavailable for room {}: {}", room, e);
                    (None, None)
                }
            };

            *feed = Some(LiveFeed {
                subscription,
                pump,
                history: history.abort_handle(),
            });
            history
        };

        history.await.unwrap_or(LoadOutcome::Stale)
    }

    /// Rebind only if `room` differs from the current one. The old
    /// subscription is closed before the new one opens.
    pub async fn set_room(&self, room: RoomCode) -> LoadOutcome {
        if self.cell.room().as_ref() == Some(&room) {
            return LoadOutcome::Loaded;
        }
        self.mount(room).await
    }

    pub fn unmount(&self) {
        self.close_feed();
        self.cell.retarget(None);
        *self.composer() = Composer::default();
    }

    pub fn room(&self) -> Option<RoomCode> {
        self.cell.room()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.cell.snapshot()
    }

    pub fn view(&self) -> ChatView {
        let messages = self.cell.snapshot();
        if messages.is_empty() {
            return ChatView::Empty;
        }
        let me = self.session.identity().map(|identity| identity.id);
        ChatView::Messages(
            messages
                .into_iter()
                .map(|message| ChatLine {
                    mine: me.is_some_and(|id| message.is_from(id)),
                    assistant: message.is_assistant(),
                    message,
                })
                .collect(),
        )
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.composer().input = text.into();
    }

    pub fn input(&self) -> String {
        self.composer().input.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.composer().sending
    }

    /// Write the composed text as the signed-in user. The message is not
    /// appended locally; it comes back through the live subscription.
    pub async fn send(&self) -> SendOutcome {
        let Some(identity) = self.session.identity() else {
            debug!("Send ignored: not signed in");
            return SendOutcome::Ignored;
        };
        let Some((room, _)) = self.cell.current() else {
            return SendOutcome::Ignored;
        };

        let content = {
            let mut composer = self.composer();
            if composer.input.trim().is_empty() || composer.sending {
                return SendOutcome::Ignored;
            }
            composer.sending = true;
            composer.input.clone()
        };
        let _sending = SendingGuard(&self.composer);

        let req = SendMessageRequest {
            session_id: room.clone(),
            user_id: identity.id,
            role: Role::User,
            content,
        };
        match self.api.send_message(&req).await {
            Ok(()) => {
                self.composer().input.clear();
                SendOutcome::Sent
            }
            Err(e) => {
                error!("Failed to send message to room {}: {}", room, e);
                SendOutcome::Failed
            }
        }
    }

    /// Delete every message in the room. Local state empties as soon as the
    /// backend confirms; errors are returned so the caller can alert.
    pub async fn clear(&self) -> Result<(), ApiError> {
        let Some((room, generation)) = self.cell.current() else {
            return Ok(());
        };
        // Captured now so a room switch during the request keeps its own history load.
        let history = self.feed().as_ref().map(|feed| feed.history.clone());
        self.api.clear_chat(&room).await?;

        // A history response still in flight would bring the cleared rows back.
        if let Some(history) = history {
            history.abort();
        }
        self.cell.update(generation, Vec::clear);
        info!("Cleared chat for room {}", room);
        Ok(())
    }
}

impl Drop for ChatPanel {
    fn drop(&mut self) {
        self.close_feed();
    }
}

struct SendingGuard<'a>(&'a Mutex<Composer>);

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).sending = false;
    }
}

async fn load_history(
    api: Arc<dyn ChatApi>,
    cell: PanelCell<Vec<ChatMessage>>,
    room: RoomCode,
    generation: u64,
) -> LoadOutcome {
    match api.chat_history(&room).await {
        Ok(history) => {
            let applied = cell.update(generation, |held| {
                let live = std::mem::replace(held, history);
                held.extend(live);
            });
            if applied {
                debug!("Loaded chat history for room {}", room);
                LoadOutcome::Loaded
            } else {
                LoadOutcome::Stale
            }
        }
        Err(e) => {
            error!("Failed to fetch chat history for room {}: {}", room, e);
            LoadOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use studyroom_realtime::Dispatcher;
    use studyroom_types::RowEvent;

    use super::*;
    use crate::testing::{FakeAuth, FakeChat, FakeProfiles, eventually, message, room, user};

    struct Harness {
        panel: Arc<ChatPanel>,
        api: Arc<FakeChat>,
        hub: Dispatcher,
        session: SessionProvider,
    }

    fn harness() -> Harness {
        let api = Arc::new(FakeChat::default());
        let hub = Dispatcher::new();
        let session = SessionProvider::new(
            Arc::new(FakeAuth::default()),
            Arc::new(FakeProfiles::default()),
        );
        let panel = Arc::new(ChatPanel::new(
            api.clone(),
            Arc::new(hub.clone()),
            session.clone(),
        ));
        Harness {
            panel,
            api,
            hub,
            session,
        }
    }

    fn push(hub: &Dispatcher, code: &str, content: &str) -> usize {
        hub.publish(RowEvent::new(
            SubscriptionKey::messages(room(code)),
            json!({"room_id": code, "role": "user", "content": content}),
        ))
    }

    fn contents(panel: &ChatPanel) -> Vec<String> {
        panel.messages().into_iter().map(|m| m.content).collect()
    }

    #[tokio::test]
    async fn empty_room_shows_placeholder_and_writes_nothing() {
        let h = harness();
        h.session.sign_in("ada@example.com", "pw").await.unwrap();
        assert_eq!(h.panel.mount(room("ABC123")).await, LoadOutcome::Loaded);

        assert_eq!(h.panel.view(), ChatView::Empty);
        assert_eq!(h.panel.send().await, SendOutcome::Ignored);
        h.panel.set_input("   ");
        assert_eq!(h.panel.send().await, SendOutcome::Ignored);
        assert!(h.api.sent().is_empty());
    }

    #[tokio::test]
    async fn pushes_after_history_append_in_arrival_order() {
        let h = harness();
        h.api.set_history(vec![message("first")]);
        h.panel.mount(room("ABC123")).await;

        for n in 0..5 {
            assert_eq!(push(&h.hub, "ABC123", &format!("push {n}")), 1);
        }
        eventually(|| h.panel.messages().len() == 6).await;
        assert_eq!(
            contents(&h.panel),
            vec!["first", "push 0", "push 1", "push 2", "push 3", "push 4"]
        );
    }

    #[tokio::test]
    async fn pushes_before_history_are_kept_after_snapshot() {
        let h = harness();
        h.api.set_history(vec![message("old")]);
        let gate = h.api.hold_history();

        let mounting = {
            let panel = h.panel.clone();
            tokio::spawn(async move { panel.mount(room("ABC123")).await })
        };
        let key = SubscriptionKey::messages(room("ABC123"));
        eventually(|| h.hub.active(&key) == 1).await;

        for n in 0..3 {
            push(&h.hub, "ABC123", &format!("live {n}"));
        }
        eventually(|| h.panel.messages().len() == 3).await;

        let _ = gate.send(());
        assert_eq!(mounting.await.unwrap(), LoadOutcome::Loaded);
        assert_eq!(contents(&h.panel), vec!["old", "live 0", "live 1", "live 2"]);
    }

    #[tokio::test]
    async fn empty_history_then_pushes_yields_exactly_n() {
        let h = harness();
        h.panel.mount(room("ABC123")).await;
        for n in 0..4 {
            push(&h.hub, "ABC123", &n.to_string());
        }
        eventually(|| h.panel.messages().len() == 4).await;
        tokio::task::yield_now().await;
        assert_eq!(contents(&h.panel), vec!["0", "1", "2", "3"]);
    }

    #[tokio::test]
    async fn history_failure_degrades_to_empty() {
        let h = harness();
        h.api.fail_history();
        assert_eq!(h.panel.mount(room("ABC123")).await, LoadOutcome::Failed);
        assert_eq!(h.panel.view(), ChatView::Empty);

        push(&h.hub, "ABC123", "still live");
        eventually(|| h.panel.messages().len() == 1).await;
    }

    #[tokio::test]
    async fn send_writes_once_without_optimistic_append() {
        let h = harness();
        let me = h.session.sign_in("ada@example.com", "pw").await.unwrap();
        h.panel.mount(room("ABC123")).await;

        h.panel.set_input("  what is a monad?  ");
        assert_eq!(h.panel.send().await, SendOutcome::Sent);

        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].session_id, room("ABC123"));
        assert_eq!(sent[0].user_id, me.id);
        assert_eq!(sent[0].role, Role::User);
        assert_eq!(sent[0].content, "  what is a monad?  ");
        assert!(h.panel.input().is_empty());
        assert!(h.panel.messages().is_empty());
    }

    #[tokio::test]
    async fn failed_send_keeps_input() {
        let h = harness();
        h.session.sign_in("ada@example.com", "pw").await.unwrap();
        h.panel.mount(room("ABC123")).await;
        h.api.fail_send();

        h.panel.set_input("hello");
        assert_eq!(h.panel.send().await, SendOutcome::Failed);
        assert_eq!(h.panel.input(), "hello");
        assert!(!h.panel.is_sending());
    }

    #[tokio::test]
    async fn send_without_identity_is_ignored() {
        let h = harness();
        h.panel.mount(room("ABC123")).await;
        h.panel.set_input("hello");
        assert_eq!(h.panel.send().await, SendOutcome::Ignored);
        assert!(h.api.sent().is_empty());
    }

    #[tokio::test]
    async fn view_marks_own_and_assistant_lines() {
        let h = harness();
        let me = h.session.sign_in("ada@example.com", "pw").await.unwrap();
        let mut mine = message("mine");
        mine.user_id = Some(me.id);
        let mut reply = message("reply");
        reply.role = Role::Assistant;
        let mut other = message("other");
        other.user_id = Some(user(9));
        h.api.set_history(vec![mine, reply, other]);
        h.panel.mount(room("ABC123")).await;

        let ChatView::Messages(lines) = h.panel.view() else {
            panic!("expected messages");
        };
        let flags: Vec<(bool, bool)> = lines.iter().map(|l| (l.mine, l.assistant)).collect();
        assert_eq!(flags, vec![(true, false), (false, true), (false, false)]);
    }

    #[tokio::test]
    async fn clear_empties_immediately() {
        let h = harness();
        h.api.set_history(vec![message("a"), message("b")]);
        h.panel.mount(room("ABC123")).await;
        assert_eq!(h.panel.messages().len(), 2);

        h.panel.clear().await.unwrap();
        assert_eq!(h.api.cleared(), vec![room("ABC123")]);
        assert_eq!(h.panel.view(), ChatView::Empty);
    }

    #[tokio::test]
    async fn failed_clear_keeps_messages_and_reports() {
        let h = harness();
        h.api.set_history(vec![message("a")]);
        h.panel.mount(room("ABC123")).await;
        h.api.fail_clear();

        assert!(h.panel.clear().await.is_err());
        assert_eq!(h.panel.messages().len(), 1);
    }

    #[tokio::test]
    async fn switching_rooms_leaves_one_subscription_for_new_room() {
        let h = harness();
        let a = SubscriptionKey::messages(room("AAAAAA"));
        let b = SubscriptionKey::messages(room("BBBBBB"));

        h.panel.mount(room("AAAAAA")).await;
        assert_eq!(h.hub.active(&a), 1);

        h.panel.set_room(room("BBBBBB")).await;
        assert_eq!(h.hub.active(&a), 0);
        assert_eq!(h.hub.active(&b), 1);
        assert_eq!(h.hub.total_active(), 1);

        assert_eq!(push(&h.hub, "AAAAAA", "from a"), 0);
        push(&h.hub, "BBBBBB", "from b");
        eventually(|| !h.panel.messages().is_empty()).await;
        assert_eq!(contents(&h.panel), vec!["from b"]);
    }

    #[tokio::test]
    async fn set_room_to_same_room_keeps_subscription() {
        let h = harness();
        h.panel.mount(room("AAAAAA")).await;
        h.panel.set_room(room("AAAAAA")).await;
        assert_eq!(h.hub.total_active(), 1);
        assert_eq!(h.api.history_calls(), 1);
    }

    #[tokio::test]
    async fn unmount_and_drop_close_the_subscription() {
        let h = harness();
        h.panel.mount(room("AAAAAA")).await;
        h.panel.unmount();
        assert_eq!(h.hub.total_active(), 0);
        assert!(h.panel.room().is_none());

        h.panel.mount(room("AAAAAA")).await;
        assert_eq!(h.hub.total_active(), 1);
        drop(h.panel);
        assert_eq!(h.hub.total_active(), 0);
    }

    #[tokio::test]
    async fn history_for_previous_room_is_discarded() {
        let h = harness();
        h.api.set_history(vec![message("from a")]);
        let gate = h.api.hold_history();

        let mounting = {
            let panel = h.panel.clone();
            tokio::spawn(async move { panel.mount(room("AAAAAA")).await })
        };
        eventually(|| h.hub.total_active() == 1).await;

        h.api.set_history(Vec::new());
        h.panel.set_room(room("BBBBBB")).await;
        let _ = gate.send(());
        assert_eq!(mounting.await.unwrap(), LoadOutcome::Stale);
        assert!(h.panel.messages().is_empty());
    }

    #[tokio::test]
    async fn clear_finishing_after_room_switch_spares_new_history() {
        let h = harness();
        h.api.set_history(vec![message("from a")]);
        h.panel.mount(room("AAAAAA")).await;

        let clear_gate = h.api.hold_clear();
        let clearing = {
            let panel = h.panel.clone();
            tokio::spawn(async move { panel.clear().await })
        };
        eventually(|| h.api.clear_calls() == 1).await;

        h.api.set_history(vec![message("from b")]);
        let history_gate = h.api.hold_history();
        let mounting = {
            let panel = h.panel.clone();
            tokio::spawn(async move { panel.set_room(room("BBBBBB")).await })
        };
        let b = SubscriptionKey::messages(room("BBBBBB"));
        eventually(|| h.hub.active(&b) == 1).await;

        let _ = clear_gate.send(());
        clearing.await.unwrap().unwrap();
        let _ = history_gate.send(());

        assert_eq!(mounting.await.unwrap(), LoadOutcome::Loaded);
        assert_eq!(contents(&h.panel), vec!["from b"]);
    }
}
