use super::*;
use crate::auth::Credential;
use crate::auth::claims::test_tokens::token;
use crate::config::parse_base_url;
use crate::hub::HubError;
use crate::hub::testing::FakeChannel;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONVERSATION: &str = "11111111-1111-1111-1111-111111111111";
const SECOND: &str = "22222222-2222-2222-2222-222222222222";
const ALICE: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Default)]
struct RecordingSink {
    statuses: Mutex<Vec<String>>,
    chat: Mutex<Vec<String>>,
    clears: Mutex<u32>,
    snapshots: Mutex<Vec<Vec<Uuid>>>,
    notifications: Mutex<Vec<String>>,
    alerts: Mutex<Vec<(AlertLevel, String)>>,
}

impl RecordingSink {
    fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    fn has_status(&self, line: &str) -> bool {
        self.statuses().iter().any(|l| l == line)
    }

    fn alerts(&self) -> Vec<(AlertLevel, String)> {
        self.alerts.lock().unwrap().clone()
    }
}

impl SessionSink for RecordingSink {
    fn status(&self, line: &str) {
        self.statuses.lock().unwrap().push(line.to_string());
    }

    fn chat_line(&self, line: &str) {
        self.chat.lock().unwrap().push(line.to_string());
    }

    fn clear_chat(&self) {
        *self.clears.lock().unwrap() += 1;
        self.chat.lock().unwrap().clear();
    }

    fn conversations(&self, snapshot: &[Conversation]) {
        self.snapshots
            .lock()
            .unwrap()
            .push(snapshot.iter().map(|c| c.id).collect());
    }

    fn notification(&self, notification: &Notification) {
        self.notifications
            .lock()
            .unwrap()
            .push(notification.text.clone());
    }

    fn alert(&self, level: AlertLevel, _title: &str, message: &str) {
        self.alerts.lock().unwrap().push((level, message.to_string()));
    }
}

/// Hands out pre-built fake channels by hub path.
struct FakeFactory {
    channels: HashMap<String, Arc<FakeChannel>>,
    builds: Mutex<Vec<String>>,
}

impl FakeFactory {
    fn new(chat: &Arc<FakeChannel>, notification: &Arc<FakeChannel>) -> Arc<Self> {
        let mut channels = HashMap::new();
        channels.insert("chat".to_string(), chat.clone());
        channels.insert("notification".to_string(), notification.clone());
        Arc::new(Self {
            channels,
            builds: Mutex::new(Vec::new()),
        })
    }
}

impl ChannelFactory for FakeFactory {
    fn build(&self, hub_path: &str, _token: &Credential) -> Result<Arc<dyn HubChannel>, HubError> {
        self.builds.lock().unwrap().push(hub_path.to_string());
        self.channels
            .get(hub_path)
            .map(|c| c.clone() as Arc<dyn HubChannel>)
            .ok_or_else(|| HubError::InvalidUrl(hub_path.to_string()))
    }
}

struct Harness {
    server: MockServer,
    chat: Arc<FakeChannel>,
    notification: Arc<FakeChannel>,
    factory: Arc<FakeFactory>,
    sink: Arc<RecordingSink>,
    orchestrator: Orchestrator,
}

async fn harness_with_token(raw_token: String) -> Harness {
    let server = MockServer::start().await;
    let chat = FakeChannel::new("https://chat.test/hubs/chat", HubState::Disconnected);
    let notification = FakeChannel::new("https://chat.test/hubs/notification", HubState::Disconnected);
    let factory = FakeFactory::new(&chat, &notification);
    let sink = Arc::new(RecordingSink::default());
    let ctx = RequestContext::new(parse_base_url(&server.uri()).unwrap(), Credential::new(raw_token)).unwrap();
    let orchestrator = Orchestrator::new(
        ClientConfig {
            base_url: server.uri(),
            rejoin_on_reconnect: false,
            ..ClientConfig::default()
        },
        ctx,
        factory.clone(),
        sink.clone(),
    );
    Harness {
        server,
        chat,
        notification,
        factory,
        sink,
        orchestrator,
    }
}

async fn harness() -> Harness {
    harness_with_token(token(json!({"nameid": "user-1", "unique_name": "ada"}))).await
}

fn conversations_payload() -> serde_json::Value {
    json!([
        {
            "id": CONVERSATION,
            "conversationName": "Team",
            "isGroup": true,
            "users": [
                {"id": "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb", "userId": ALICE, "name": "Alice"}
            ]
        },
        {"id": SECOND, "conversationName": "Direct", "isGroup": false, "users": []}
    ])
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/User/GetMe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "user-1"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Chat/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversations_payload()))
        .mount(server)
        .await;
}

async fn mount_empty_history(server: &MockServer, conversation: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/Chat/conversations/{conversation}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [], "totalPages": 0, "totalCount": 0, "currentPage": 1, "pageSize": 50
        })))
        .mount(server)
        .await;
}

// =============================================================================
// Login sequence
// =============================================================================

#[tokio::test]
async fn login_connects_both_hubs_and_loads_conversations() {
    let h = harness().await;
    mount_login(&h.server).await;

    assert!(h.orchestrator.connect().await);

    assert!(h.sink.has_status("Extracted user ID from token: user-1"));
    assert!(h.sink.has_status("Token contains 2 claims:"));
    assert!(h.sink.has_status("Creating connection to chat..."));
    assert!(h.sink.has_status("Connected to https://chat.test/hubs/chat"));
    assert!(h.sink.has_status("Chat hub connection initialized and ready"));
    assert!(h.sink.has_status("Notification hub connection initialized and ready"));
    assert!(h.sink.has_status("Conversations loaded"));
    assert_eq!(h.orchestrator.chat_state().await, Some(HubState::Connected));
    assert_eq!(h.orchestrator.notification_state().await, Some(HubState::Connected));
    assert_eq!(h.orchestrator.conversations().len(), 2);
    assert!(h.sink.alerts().is_empty());
}

#[tokio::test]
async fn rejected_token_halts_before_hubs() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/api/User/GetMe"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;

    assert!(!h.orchestrator.connect().await);

    assert!(h.factory.builds.lock().unwrap().is_empty());
    assert!(h.sink.has_status("Token validation failed. Please check your token."));
    assert_eq!(h.sink.alerts()[0].0, AlertLevel::Error);
}

#[tokio::test]
async fn missing_identity_warns_and_continues() {
    let h = harness_with_token(token(json!({"email": "a@b.c"}))).await;
    mount_login(&h.server).await;

    assert!(h.orchestrator.connect().await);

    assert_eq!(h.sink.alerts()[0].0, AlertLevel::Warning);
    assert_eq!(h.orchestrator.chat_state().await, Some(HubState::Connected));
}

#[tokio::test]
async fn chat_hub_failure_is_isolated() {
    let h = harness().await;
    mount_login(&h.server).await;
    h.chat.fail_start(true);

    assert!(h.orchestrator.connect().await);

    let statuses = h.sink.statuses();
    assert!(
        statuses
            .iter()
            .any(|l| l.starts_with("Failed to connect to https://chat.test/hubs/chat: "))
    );
    assert!(statuses.iter().any(|l| l.starts_with("Inner exception: ")));
    assert!(h.sink.has_status("Failed to connect to chat hub"));
    assert!(h.sink.has_status("Notification hub connection initialized and ready"));
    assert!(!h.sink.has_status("Conversations loaded"));
    assert_eq!(h.orchestrator.chat_state().await, None);
}

#[tokio::test]
async fn notification_events_reach_sink() {
    let h = harness().await;
    mount_login(&h.server).await;
    assert!(h.orchestrator.connect().await);

    h.notification.fire("Connected", vec![json!("hello from notifications")]);
    h.notification.fire(
        "ReceiveNotification",
        vec![json!({
            "id": "cccccccc-cccc-cccc-cccc-cccccccccccc",
            "text": "You have a new follower",
            "type": 1
        })],
    );

    assert!(h.sink.has_status("Notification Hub: hello from notifications"));
    assert!(h.sink.has_status("Notification: You have a new follower"));
    assert_eq!(
        *h.sink.notifications.lock().unwrap(),
        vec!["You have a new follower".to_string()]
    );
}

// =============================================================================
// Selection and messaging
// =============================================================================

#[tokio::test]
async fn send_falls_back_to_rest_when_live_send_fails() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_empty_history(&h.server, CONVERSATION).await;
    Mock::given(method("POST"))
        .and(path(format!("/api/Chat/conversations/{CONVERSATION}/messages")))
        .and(body_json(json!({"Content": "hello", "Type": 2})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    assert!(h.orchestrator.connect().await);
    assert!(h.orchestrator.select_conversation(0).await);
    h.chat.script("SendMessage", Err("Hub method failed"));

    assert!(h.orchestrator.send_message("hello").await);

    let sends: Vec<_> = h
        .chat
        .calls()
        .into_iter()
        .filter(|(m, _)| m == "SendMessage")
        .collect();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].1, vec![json!(CONVERSATION), json!("hello")]);
    assert!(h.sink.has_status("Message sent via REST API"));
}

#[tokio::test]
async fn live_send_success_skips_rest() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_empty_history(&h.server, CONVERSATION).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    assert!(h.orchestrator.connect().await);
    assert!(h.orchestrator.select_conversation(0).await);
    assert!(h.orchestrator.send_message("hi").await);
}

#[tokio::test]
async fn send_requires_selection_and_content() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_empty_history(&h.server, CONVERSATION).await;
    assert!(h.orchestrator.connect().await);

    assert!(!h.orchestrator.send_message("hello").await);
    assert_eq!(h.sink.alerts()[0].0, AlertLevel::Warning);

    assert!(h.orchestrator.select_conversation(0).await);
    assert!(!h.orchestrator.send_message("   ").await);
    assert!(h.chat.calls().iter().all(|(m, _)| m != "SendMessage"));
}

#[tokio::test]
async fn selection_maps_onto_latest_snapshot() {
    let h = harness().await;
    mount_login(&h.server).await;
    mount_empty_history(&h.server, SECOND).await;
    assert!(h.orchestrator.connect().await);

    assert!(h.orchestrator.refresh_conversations().await);
    assert!(h.orchestrator.refresh_conversations().await);
    let snapshots = h.sink.snapshots.lock().unwrap().clone();
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots.windows(2).all(|w| w[0] == w[1]));

    assert!(h.orchestrator.select_conversation(1).await);
    assert_eq!(h.orchestrator.selected().await, Some(SECOND.parse().unwrap()));
    let joins: Vec<_> = h
        .chat
        .calls()
        .into_iter()
        .filter(|(m, _)| m == "JoinConversation")
        .collect();
    assert_eq!(joins[0].1, vec![json!(SECOND)]);
}

#[tokio::test]
async fn out_of_range_selection_is_rejected() {
    let h = harness().await;
    mount_login(&h.server).await;
    assert!(h.orchestrator.connect().await);

    assert!(!h.orchestrator.select_conversation(5).await);
    assert_eq!(h.orchestrator.selected().await, None);
    assert!(h.chat.calls().is_empty());
}

#[tokio::test]
async fn failed_join_raises_alert() {
    let h = harness().await;
    mount_login(&h.server).await;
    assert!(h.orchestrator.connect().await);
    for cause in ["a", "b", "c"] {
        h.chat.script("JoinConversation", Err(cause));
    }

    assert!(!h.orchestrator.select_conversation(0).await);
    assert!(
        h.sink
            .alerts()
            .iter()
            .any(|(level, m)| *level == AlertLevel::Error && m.contains(CONVERSATION))
    );
}

#[tokio::test]
async fn history_renders_sender_names() {
    let h = harness().await;
    mount_login(&h.server).await;
    Mock::given(method("GET"))
        .and(path(format!("/api/Chat/conversations/{CONVERSATION}/messages")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/conversations/{CONVERSATION}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                {"id": "dddddddd-dddd-dddd-dddd-dddddddddddd", "senderID": "00000000-0000-0000-0000-000000000000",
                 "date": "2024-05-01T10:00:00", "type": 0, "content": "welcome"},
                {"id": "eeeeeeee-eeee-eeee-eeee-eeeeeeeeeeee", "senderID": ALICE,
                 "date": "2024-05-01T10:01:00", "type": 2, "content": "hi"}
            ],
            "totalPages": 1, "totalCount": 2, "currentPage": 1, "pageSize": 50
        })))
        .mount(&h.server)
        .await;
    assert!(h.orchestrator.connect().await);

    assert!(h.orchestrator.select_conversation(0).await);

    assert_eq!(
        *h.sink.chat.lock().unwrap(),
        vec![
            "[SYSTEM] welcome".to_string(),
            "[2024-05-01 10:01:00] Alice: hi".to_string()
        ]
    );
    assert_eq!(*h.sink.clears.lock().unwrap(), 1);
    assert!(h.sink.has_status("Loaded 2 messages from alternative endpoint"));
}

#[tokio::test]
async fn pushed_messages_are_rendered() {
    let h = harness().await;
    mount_login(&h.server).await;
    assert!(h.orchestrator.connect().await);

    h.chat.fire(
        "ReceiveMessage",
        vec![json!({
            "id": "ffffffff-ffff-ffff-ffff-ffffffffffff",
            "senderID": "99999999-9999-9999-9999-999999999999",
            "date": "2024-05-01T12:00:00Z",
            "type": 2,
            "content": "from a stranger"
        })],
    );

    assert_eq!(
        *h.sink.chat.lock().unwrap(),
        vec!["[2024-05-01 12:00:00] 99999999-9999-9999-9999-999999999999: from a stranger".to_string()]
    );
}

// =============================================================================
// Diagnostics, creation, shutdown
// =============================================================================

#[tokio::test]
async fn connection_test_restarts_dropped_hub() {
    let h = harness().await;
    mount_login(&h.server).await;
    Mock::given(method("GET"))
        .and(path("/api/WebSocketStatus"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&h.server)
        .await;
    assert!(h.orchestrator.connect().await);
    h.chat.set_state(HubState::Disconnected);

    h.orchestrator.test_connection().await;

    assert!(h.sink.has_status("API Connection successful: ok"));
    assert!(h.sink.has_status("Chat Hub State: Disconnected"));
    assert!(h.sink.has_status("Successfully reconnected to Chat Hub"));
    assert!(h.sink.has_status("Notification Hub State: Connected"));
    assert_eq!(h.chat.starts.load(Ordering::SeqCst), 2);
    assert_eq!(h.notification.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn group_creation_skips_bad_participants() {
    let h = harness().await;
    mount_login(&h.server).await;
    Mock::given(method("POST"))
        .and(path("/api/Chat/conversations/group"))
        .and(body_json(json!({"Name": "Team", "ParticipantIds": [ALICE]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    assert!(
        h.orchestrator
            .create_group(" Team ", &format!("not-a-guid, {ALICE} ,"))
            .await
    );
    assert!(h.sink.has_status("Conversations loaded"));
}

#[tokio::test]
async fn direct_creation_validates_user_id() {
    let h = harness().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    assert!(!h.orchestrator.create_direct("").await);
    assert!(!h.orchestrator.create_direct("bob").await);
    assert_eq!(h.sink.alerts().len(), 2);
    assert!(!h.orchestrator.create_group("  ", ALICE).await);
}

#[tokio::test]
async fn direct_creation_failure_reports_body() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path(format!("/api/Chat/conversations/direct/{ALICE}")))
        .respond_with(ResponseTemplate::new(400).set_body_string("already exists"))
        .mount(&h.server)
        .await;

    assert!(!h.orchestrator.create_direct(ALICE).await);
    let (level, message) = h.sink.alerts().remove(0);
    assert_eq!(level, AlertLevel::Error);
    assert!(message.starts_with("Error creating direct message: 400"));
    assert!(message.ends_with("already exists"));
}

#[tokio::test]
async fn shutdown_stops_both_channels() {
    let h = harness().await;
    mount_login(&h.server).await;
    assert!(h.orchestrator.connect().await);

    h.orchestrator.shutdown().await;

    assert_eq!(h.chat.stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.notification.stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.orchestrator.chat_state().await, None);
}

#[test]
fn participants_parse_leniently() {
    let parsed = parse_participants(&format!("{ALICE}, nope,,{SECOND}"));
    assert_eq!(parsed, vec![ALICE.parse().unwrap(), SECOND.parse::<Uuid>().unwrap()]);
    assert!(parse_participants("").is_empty());
}
