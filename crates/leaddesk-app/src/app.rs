// Application state and orchestration logic.
//
// One task owns `AppState` and runs the event loop below. It reacts to
// commands from the front end and to conversation snapshots forwarded from
// the store, and pushes UI updates back out.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use leaddesk_core::config::Config;
use leaddesk_core::{AuthProvider, CoreError, DocumentStore};

use crate::conversation::{ConversationFeed, ConversationMerger, StreamUpdate};
use crate::leads::{self, Lead, LeadRow, UserProfile, UserSummary};
use crate::messaging;
use crate::notice::{Notice, NoticeKind};
use crate::protocol::{UiUpdate, UserCommand, View};
use crate::session::Session;
use crate::stats::{self, MortgageStats};

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Everything the dashboard shows, owned by the event loop.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub session: Session,
    pub view: View,
    pub stats: Option<MortgageStats>,
    pub leads: Vec<Lead>,
    pub users: Vec<UserSummary>,
    pub notices: Vec<Notice>,
    pub merger: ConversationMerger,
    /// Subscriptions behind the open conversation, if any.
    pub feed: Option<ConversationFeed>,
    pub counterpart: Option<UserSummary>,
    /// Handed to each new feed so its forwarders can reach the loop.
    pub stream_tx: mpsc::UnboundedSender<StreamUpdate>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        stream_tx: mpsc::UnboundedSender<StreamUpdate>,
    ) -> Self {
        AppState {
            config,
            store,
            auth,
            session: Session::new(),
            view: View::Dashboard,
            stats: None,
            leads: Vec::new(),
            users: Vec::new(),
            notices: Vec::new(),
            merger: ConversationMerger::new(),
            feed: None,
            counterpart: None,
            stream_tx,
        }
    }

    pub fn lead_rows(&self) -> Vec<LeadRow> {
        let currency = &self.config.display.currency_symbol;
        self.leads
            .iter()
            .map(|lead| LeadRow::new(lead, currency))
            .collect()
    }

    pub fn conversation_update(&self) -> UiUpdate {
        UiUpdate::Conversation {
            counterpart: self.counterpart.clone(),
            view: self.merger.view().clone(),
        }
    }

    /// Clear statistics, leads, and notices.
    pub fn clear_data(&mut self) {
        self.stats = None;
        self.leads.clear();
        self.notices.clear();
    }

    /// Cancel the open conversation's subscriptions, then clear its view.
    pub fn close_conversation(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.cancel();
        }
        self.merger.close();
        self.counterpart = None;
    }

    /// Switch to the conversation with `user_id`. The previous
    /// conversation is fully closed before the new one opens.
    pub async fn open_conversation(&mut self, user_id: &str) -> Result<(), CoreError> {
        self.close_conversation();

        let counterpart = match self.users.iter().find(|u| u.id == user_id) {
            Some(user) => user.clone(),
            None => {
                let profile = leads::fetch_user(
                    self.store.as_ref(),
                    &self.config.messages.users_collection,
                    user_id,
                )
                .await?
                .ok_or_else(|| CoreError::invalid(format!("no user with id `{user_id}`")))?;
                UserSummary {
                    id: user_id.to_string(),
                    profile,
                }
            }
        };

        let generation = self.merger.open(user_id);
        match ConversationFeed::open(
            self.store.as_ref(),
            &self.config.messages,
            user_id,
            generation,
            self.stream_tx.clone(),
        ) {
            Ok(feed) => {
                self.feed = Some(feed);
                self.counterpart = Some(counterpart);
                Ok(())
            }
            Err(e) => {
                self.merger.close();
                Err(e)
            }
        }
    }

    /// Fetch statistics and recent leads concurrently and apply them.
    pub async fn load_dashboard(&mut self) {
        let store = self.store.as_ref();
        let (stats_result, leads_result) = tokio::join!(
            stats::load_stats(
                store,
                &self.config.statistics,
                &self.config.display.currency_symbol,
            ),
            leads::recent_leads(store, &self.config.leads, self.config.leads.limit),
        );

        match stats_result {
            Ok(stats) => {
                self.stats = Some(stats);
                self.notices.push(Notice::success(
                    "Fetch Success",
                    "successfully updated data from server.",
                ));
            }
            Err(e) => {
                warn!("Statistics fetch failed: {}", e);
                self.stats = None;
                self.notices.push(Notice::warning("Fetch Error", e.to_string()));
            }
        }

        match leads_result {
            Ok(leads) => self.leads = leads,
            Err(e) => {
                warn!("Recent leads fetch failed: {}", e);
                self.notices.push(Notice::warning("Fetch Error", e.to_string()));
            }
        }
    }

    /// Change view. Notices are cleared and any conversation is closed.
    pub async fn show_view(&mut self, view: View) {
        self.view = view;
        self.notices.clear();
        self.close_conversation();

        if view == View::Messages {
            match leads::list_users(self.store.as_ref(), &self.config.messages.users_collection)
                .await
            {
                Ok(users) => {
                    self.users = users;
                    self.notices
                        .push(Notice::success("Fetch Success", "Users fetched successfully."));
                }
                Err(e) => {
                    warn!("User directory fetch failed: {}", e);
                    self.users.clear();
                    self.notices.push(Notice::warning("Fetch Error", e.to_string()));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the application event loop until `Quit` or the command channel
/// closes.
///
/// Listens on two channels using `tokio::select!`:
/// 1. User commands from the front end
/// 2. Conversation snapshots from the feed forwarders
///
/// Pushes UI updates through `ui_tx`.
pub async fn run(
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    mut stream_rx: mpsc::UnboundedReceiver<StreamUpdate>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    // `state` holds a sender, so this only closes if the state is rebuilt
    // without one; stop polling rather than spin.
    let mut stream_open = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => {
                        handle_user_command(&mut state, cmd, &ui_tx).await;
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }

            update = stream_rx.recv(), if stream_open => {
                match update {
                    Some(update) => {
                        handle_stream_update(&mut state, update, &ui_tx).await;
                    }
                    None => {
                        info!("Conversation update channel closed");
                        stream_open = false;
                    }
                }
            }
        }
    }

    state.close_conversation();
    info!("Application event loop exiting");
    Ok(())
}

/// Apply a conversation snapshot and re-render.
///
/// Stale updates (from a closed or replaced conversation) are dropped by
/// the merger. A stream error keeps the previous view and raises a notice.
pub async fn handle_stream_update(
    state: &mut AppState,
    update: StreamUpdate,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    let rendered = state.merger.apply(update).map(|view| view.is_some());
    match rendered {
        Ok(true) => {
            let _ = ui_tx.send(state.conversation_update()).await;
        }
        Ok(false) => {}
        Err(e) => {
            state
                .notices
                .push(Notice::warning("Message Fetch Error", e.to_string()));
            let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
        }
    }
}

/// Handle a command from the front end. Only `SignIn` is accepted while
/// signed out.
pub async fn handle_user_command(
    state: &mut AppState,
    cmd: UserCommand,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    if !state.session.is_signed_in() && cmd != UserCommand::SignIn {
        debug!("Ignoring {:?} while {:?}", cmd, state.session.state());
        return;
    }

    match cmd {
        UserCommand::SignIn => handle_sign_in(state, ui_tx).await,
        UserCommand::SignOut => handle_sign_out(state, ui_tx).await,
        UserCommand::Reload => {
            info!("Reloading dashboard data");
            state.clear_data();
            state.load_dashboard().await;
            send_dashboard(state, ui_tx).await;
        }
        UserCommand::ShowView(view) => {
            info!("Switched to view: {:?}", view);
            state.show_view(view).await;
            let _ = ui_tx.send(UiUpdate::ViewChanged(view)).await;
            let _ = ui_tx.send(state.conversation_update()).await;
            if view == View::Messages {
                let _ = ui_tx.send(UiUpdate::Users(state.users.clone())).await;
            }
            let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
        }
        UserCommand::OpenLead(path) => {
            let lookup = lookup_lead_owner(state, &path).await;
            match lookup {
                Ok((user_id, Some(profile))) => {
                    let _ = ui_tx.send(UiUpdate::LeadDetail { user_id, profile }).await;
                }
                Ok((user_id, None)) => {
                    state.notices.push(Notice::warning(
                        "Fetch Error",
                        format!("user {user_id} was not found"),
                    ));
                    let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
                }
                Err(e) => {
                    warn!("Lead detail lookup failed for {}: {}", path, e);
                    state.notices.push(Notice::warning("Fetch Error", e.to_string()));
                    let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
                }
            }
        }
        UserCommand::SelectUser(user_id) => {
            if let Err(e) = state.open_conversation(&user_id).await {
                warn!("Could not open conversation with {}: {}", user_id, e);
                state.notices.push(Notice::warning("Fetch Error", e.to_string()));
                let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
            }
            let _ = ui_tx.send(state.conversation_update()).await;
        }
        UserCommand::CloseConversation => {
            state.close_conversation();
            let _ = ui_tx.send(state.conversation_update()).await;
        }
        UserCommand::SendMessage(text) => {
            let Some(user_id) = state.merger.counterpart().map(str::to_string) else {
                debug!("No conversation open, message not sent");
                return;
            };
            if let Err(e) = messaging::send_message(
                state.store.as_ref(),
                &state.config.messages,
                &user_id,
                &text,
            )
            .await
            {
                warn!("Message to {} failed: {}", user_id, e);
                state
                    .notices
                    .push(Notice::warning("Message Send Error", e.to_string()));
                let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
            }
        }
        UserCommand::Quit => {
            // Handled in the main loop
        }
    }
}

async fn handle_sign_in(state: &mut AppState, ui_tx: &mpsc::Sender<UiUpdate>) {
    if let Err(e) = state.session.begin_sign_in() {
        debug!("Sign-in ignored: {}", e);
        return;
    }
    state.clear_data();

    let outcome = state.auth.sign_in().await;
    match state.session.complete_sign_in(outcome) {
        Ok(identity) => {
            info!("Operator {} signed in", identity.email);
            let _ = ui_tx.send(UiUpdate::SignedIn(identity.clone())).await;

            state.show_view(View::Dashboard).await;
            let _ = ui_tx.send(UiUpdate::ViewChanged(View::Dashboard)).await;
            state.notices.push(Notice::success(
                "Login Success",
                format!("{} logged in successfully", identity.email),
            ));
            state.load_dashboard().await;
            send_dashboard(state, ui_tx).await;
        }
        Err(e) => {
            warn!("Sign-in failed: {}", e);
            state
                .notices
                .push(Notice::new(NoticeKind::Warning, "Login Failed", e.to_string()));
            let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
        }
    }
}

async fn handle_sign_out(state: &mut AppState, ui_tx: &mpsc::Sender<UiUpdate>) {
    let email = state
        .session
        .identity()
        .map(|identity| identity.email.clone())
        .unwrap_or_default();
    if let Err(e) = state.session.begin_sign_out() {
        debug!("Sign-out ignored: {}", e);
        return;
    }
    state.close_conversation();
    state.clear_data();
    state.users.clear();

    let outcome = state.auth.sign_out().await;
    // The local session ends either way.
    let _ = state.session.complete_sign_out();
    match outcome {
        Ok(()) => {
            info!("Operator {} signed out", email);
            state.notices.push(Notice::success(
                "Logout Success",
                "user logged out successfully",
            ));
        }
        Err(e) => {
            warn!("Sign-out failed at the identity provider: {}", e);
            state.notices.push(Notice::warning("Logout Error", e.to_string()));
        }
    }

    let _ = ui_tx.send(state.conversation_update()).await;
    let _ = ui_tx.send(UiUpdate::Stats(None)).await;
    let _ = ui_tx.send(UiUpdate::Leads(Vec::new())).await;
    let _ = ui_tx.send(UiUpdate::SignedOut).await;
    let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
}

async fn lookup_lead_owner(
    state: &AppState,
    lead_path: &str,
) -> Result<(String, Option<UserProfile>), CoreError> {
    let user_id = leads::extract_user_id(lead_path)?;
    let profile = leads::fetch_user(
        state.store.as_ref(),
        &state.config.messages.users_collection,
        &user_id,
    )
    .await?;
    Ok((user_id, profile))
}

async fn send_dashboard(state: &AppState, ui_tx: &mpsc::Sender<UiUpdate>) {
    let _ = ui_tx.send(UiUpdate::Stats(state.stats.clone())).await;
    let _ = ui_tx.send(UiUpdate::Leads(state.lead_rows())).await;
    let _ = ui_tx.send(UiUpdate::Notices(state.notices.clone())).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationView, Direction};
    use leaddesk_core::config::{
        CredentialsConfig, DisplayConfig, LeadsConfig, MessagesConfig, StatisticsConfig,
    };
    use leaddesk_core::memory::MemoryStore;
    use leaddesk_core::store::ConfiguredOperator;
    use leaddesk_core::{Collection, Identity};
    use serde_json::json;

    fn test_config() -> Config {
        Config {
            database_path: ":memory:".into(),
            statistics: StatisticsConfig {
                collection: "mortgages".into(),
                field: "loan".into(),
                bucket_width: 200_000.0,
                bucket_count: 5,
            },
            leads: LeadsConfig {
                collection: "mortgages".into(),
                order_field: "start".into(),
                limit: 10,
            },
            messages: MessagesConfig {
                users_collection: "users".into(),
                inbound_collection: "clientMessages".into(),
                outbound_collection: "companyMessages".into(),
            },
            display: DisplayConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }

    fn operator() -> Identity {
        Identity {
            email: "ops@broker.example".into(),
            display_name: "Ops".into(),
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert("users/u1", json!({"name": "Ada", "email": "ada@example.com"}));
        store.insert("users/u2", json!({"name": "Grace", "email": "grace@example.com"}));
        store.insert(
            "users/u1/mortgages/m1",
            json!({"loan": 250000, "lender": "Halifax", "rate": 0.0425, "rent": 1500,
                   "start": "2024-03-03T12:00:00.000Z", "term": 25}),
        );
        store.insert(
            "users/u1/clientMessages/c1",
            json!({"message": "Hi", "sent": "2024-03-03T09:00:00.000Z", "read": false}),
        );
        store
    }

    fn make_state(
        store: Arc<MemoryStore>,
        identity: Option<Identity>,
    ) -> (AppState, mpsc::UnboundedReceiver<StreamUpdate>) {
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let state = AppState::new(
            test_config(),
            store,
            Arc::new(ConfiguredOperator::new(identity)),
            stream_tx,
        );
        (state, stream_rx)
    }

    fn drain(ui_rx: &mut mpsc::Receiver<UiUpdate>) -> Vec<UiUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = ui_rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    fn last_notices(updates: &[UiUpdate]) -> Vec<Notice> {
        updates
            .iter()
            .rev()
            .find_map(|u| match u {
                UiUpdate::Notices(n) => Some(n.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn titles(notices: &[Notice]) -> Vec<&str> {
        notices.iter().map(|n| n.title.as_str()).collect()
    }

    #[tokio::test]
    async fn commands_are_ignored_while_signed_out() {
        let (mut state, _stream_rx) = make_state(seeded_store(), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);

        handle_user_command(&mut state, UserCommand::Reload, &ui_tx).await;
        handle_user_command(&mut state, UserCommand::SelectUser("u1".into()), &ui_tx).await;
        assert!(drain(&mut ui_rx).is_empty());
        assert!(state.stats.is_none());
        assert!(state.feed.is_none());
    }

    #[tokio::test]
    async fn sign_in_loads_dashboard() {
        let (mut state, _stream_rx) = make_state(seeded_store(), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);

        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        assert!(state.session.is_signed_in());
        assert_eq!(state.stats.as_ref().unwrap().counts, vec![0, 1, 0, 0, 0, 0]);
        assert_eq!(state.leads.len(), 1);

        let updates = drain(&mut ui_rx);
        assert!(updates.contains(&UiUpdate::SignedIn(operator())));
        let notices = last_notices(&updates);
        assert_eq!(titles(&notices), vec!["Login Success", "Fetch Success"]);
        assert!(notices[0].message.ends_with("ops@broker.example logged in successfully"));
    }

    #[tokio::test]
    async fn failed_sign_in_is_a_warning() {
        let (mut state, _stream_rx) = make_state(seeded_store(), None);
        let (ui_tx, mut ui_rx) = mpsc::channel(64);

        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        assert!(!state.session.is_signed_in());
        let notices = last_notices(&drain(&mut ui_rx));
        assert_eq!(titles(&notices), vec!["Login Failed"]);
        assert_eq!(notices[0].kind, NoticeKind::Warning);
    }

    #[tokio::test]
    async fn statistics_failure_clears_stats_and_warns() {
        let store = seeded_store();
        let (mut state, _stream_rx) = make_state(Arc::clone(&store), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        drain(&mut ui_rx);

        store.fail_range_at(Some(0.0));
        handle_user_command(&mut state, UserCommand::Reload, &ui_tx).await;
        assert!(state.stats.is_none());
        // Leads are independent and still load.
        assert_eq!(state.leads.len(), 1);

        let updates = drain(&mut ui_rx);
        assert!(updates.contains(&UiUpdate::Stats(None)));
        assert_eq!(titles(&last_notices(&updates)), vec!["Fetch Error"]);
    }

    #[tokio::test]
    async fn conversation_switch_discards_late_updates() {
        let store = seeded_store();
        let (mut state, mut stream_rx) = make_state(Arc::clone(&store), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;

        handle_user_command(&mut state, UserCommand::SelectUser("u1".into()), &ui_tx).await;
        let old_generation = state.merger.generation();
        for _ in 0..2 {
            let update = stream_rx.recv().await.unwrap();
            handle_stream_update(&mut state, update, &ui_tx).await;
        }
        assert_eq!(state.merger.view().messages().len(), 1);

        handle_user_command(&mut state, UserCommand::SelectUser("u2".into()), &ui_tx).await;
        assert_eq!(state.counterpart.as_ref().unwrap().id, "u2");
        assert_eq!(store.subscriber_count(), 2);

        // A snapshot from the first conversation arriving late.
        let late = StreamUpdate {
            generation: old_generation,
            direction: Direction::Inbound,
            payload: Ok(store
                .list(&Collection::path("users/u1/clientMessages"))
                .await
                .unwrap()),
        };
        drain(&mut ui_rx);
        handle_stream_update(&mut state, late, &ui_tx).await;
        assert!(drain(&mut ui_rx).is_empty());
        assert_eq!(state.merger.view(), &ConversationView::Loading);

        for _ in 0..2 {
            let update = stream_rx.recv().await.unwrap();
            handle_stream_update(&mut state, update, &ui_tx).await;
        }
        assert_eq!(state.merger.view(), &ConversationView::Empty);
    }

    #[tokio::test]
    async fn send_message_goes_to_counterpart() {
        let store = seeded_store();
        let (mut state, _stream_rx) = make_state(Arc::clone(&store), Some(operator()));
        let (ui_tx, _ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;

        // No conversation open: nothing is written.
        handle_user_command(&mut state, UserCommand::SendMessage("hello".into()), &ui_tx).await;
        handle_user_command(&mut state, UserCommand::SelectUser("u1".into()), &ui_tx).await;
        handle_user_command(&mut state, UserCommand::SendMessage("hello".into()), &ui_tx).await;

        let sent = store
            .list(&Collection::path("users/u1/companyMessages"))
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get("message"), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn send_failure_raises_notice() {
        let store = seeded_store();
        let (mut state, _stream_rx) = make_state(Arc::clone(&store), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        handle_user_command(&mut state, UserCommand::SelectUser("u1".into()), &ui_tx).await;
        drain(&mut ui_rx);

        store.fail_writes(true);
        handle_user_command(&mut state, UserCommand::SendMessage("hello".into()), &ui_tx).await;
        let notices = last_notices(&drain(&mut ui_rx));
        assert_eq!(notices.last().unwrap().title, "Message Send Error");
    }

    #[tokio::test]
    async fn messages_view_lists_users_and_closes_conversation() {
        let store = seeded_store();
        let (mut state, _stream_rx) = make_state(Arc::clone(&store), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        handle_user_command(&mut state, UserCommand::SelectUser("u1".into()), &ui_tx).await;
        assert_eq!(store.subscriber_count(), 2);
        drain(&mut ui_rx);

        handle_user_command(&mut state, UserCommand::ShowView(View::Messages), &ui_tx).await;
        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(state.merger.view(), &ConversationView::Closed);
        assert_eq!(state.users.len(), 2);

        let updates = drain(&mut ui_rx);
        assert!(updates.contains(&UiUpdate::ViewChanged(View::Messages)));
        let notices = last_notices(&updates);
        assert_eq!(titles(&notices), vec!["Fetch Success"]);
        assert!(notices[0].message.ends_with("Users fetched successfully."));
    }

    #[tokio::test]
    async fn open_lead_reports_profile() {
        let (mut state, _stream_rx) = make_state(seeded_store(), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        drain(&mut ui_rx);

        handle_user_command(
            &mut state,
            UserCommand::OpenLead("users/u1/mortgages/m1".into()),
            &ui_tx,
        )
        .await;
        match drain(&mut ui_rx).as_slice() {
            [UiUpdate::LeadDetail { user_id, profile }] => {
                assert_eq!(user_id, "u1");
                assert_eq!(profile.name, "Ada");
            }
            other => panic!("expected LeadDetail, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sign_out_cancels_and_clears() {
        let store = seeded_store();
        let (mut state, _stream_rx) = make_state(Arc::clone(&store), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        handle_user_command(&mut state, UserCommand::SelectUser("u1".into()), &ui_tx).await;
        drain(&mut ui_rx);

        handle_user_command(&mut state, UserCommand::SignOut, &ui_tx).await;
        assert!(!state.session.is_signed_in());
        assert_eq!(store.subscriber_count(), 0);
        assert!(state.stats.is_none());
        assert!(state.leads.is_empty());

        let updates = drain(&mut ui_rx);
        assert!(updates.contains(&UiUpdate::SignedOut));
        assert_eq!(titles(&last_notices(&updates)), vec!["Logout Success"]);
    }

    #[tokio::test]
    async fn stream_error_keeps_view_and_warns() {
        let store = seeded_store();
        let (mut state, mut stream_rx) = make_state(Arc::clone(&store), Some(operator()));
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        handle_user_command(&mut state, UserCommand::SelectUser("u1".into()), &ui_tx).await;
        for _ in 0..2 {
            let update = stream_rx.recv().await.unwrap();
            handle_stream_update(&mut state, update, &ui_tx).await;
        }
        let before = state.merger.view().clone();
        assert_eq!(before.messages().len(), 1);
        drain(&mut ui_rx);

        store.break_subscription(
            &Collection::path("users/u1/companyMessages"),
            CoreError::query("permission denied"),
        );
        let update = stream_rx.recv().await.unwrap();
        assert_eq!(update.direction, Direction::Outbound);
        handle_stream_update(&mut state, update, &ui_tx).await;

        assert_eq!(state.merger.view(), &before);
        let updates = drain(&mut ui_rx);
        assert!(!updates
            .iter()
            .any(|u| matches!(u, UiUpdate::Conversation { .. })));
        let notices = last_notices(&updates);
        let last = notices.last().unwrap();
        assert_eq!(last.title, "Message Fetch Error");
        assert_eq!(last.kind, NoticeKind::Warning);
        assert!(last.message.contains("permission denied"));
    }

    struct RejectingSignOut;

    #[async_trait::async_trait]
    impl AuthProvider for RejectingSignOut {
        async fn sign_in(&self) -> Result<Identity, CoreError> {
            Ok(operator())
        }

        async fn sign_out(&self) -> Result<(), CoreError> {
            Err(CoreError::AuthError("network unreachable".into()))
        }
    }

    #[tokio::test]
    async fn sign_out_failure_still_ends_session() {
        let store = seeded_store();
        let (stream_tx, _stream_rx) = mpsc::unbounded_channel();
        let mut state = AppState::new(
            test_config(),
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(RejectingSignOut),
            stream_tx,
        );
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        handle_user_command(&mut state, UserCommand::SignIn, &ui_tx).await;
        handle_user_command(&mut state, UserCommand::SelectUser("u1".into()), &ui_tx).await;
        drain(&mut ui_rx);

        handle_user_command(&mut state, UserCommand::SignOut, &ui_tx).await;
        assert!(!state.session.is_signed_in());
        assert_eq!(store.subscriber_count(), 0);

        let updates = drain(&mut ui_rx);
        assert!(updates.contains(&UiUpdate::SignedOut));
        let notices = last_notices(&updates);
        assert_eq!(titles(&notices), vec!["Logout Error"]);
        assert!(notices[0].message.contains("network unreachable"));
    }
}
