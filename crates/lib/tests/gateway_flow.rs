//! Integration tests: an in-process axum mock gateway on a free port, with
//! the real client/resolver/managers driven against it. No external gateway
//! is required.

use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use lib::chat::ChatSession;
use lib::config::{ConfigStore, GatewayConfig};
use lib::connection::ConnectionManager;
use lib::directory::ContactDirectory;
use lib::gateway::{EndpointResolver, GatewayClient, GatewayError, Operation, OperationParams};
use lib::model::{ConnectionStatus, Contact, DeliveryStatus, Direction};
use lib::notify::BufferNotifier;
use lib::webhook::{WebhookEvent, WebhookReceiver};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock gateway");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

fn client_for(base_url: &str) -> Arc<GatewayClient> {
    let config = GatewayConfig {
        base_url: base_url.to_string(),
        api_key: "test-key".to_string(),
        instance_name: "main".to_string(),
    };
    Arc::new(GatewayClient::new(ConfigStore::new(config)))
}

fn test_contact() -> Contact {
    Contact {
        id: "5511999990000".to_string(),
        display_name: "Maria".to_string(),
        phone: "+55 (11) 99999-0000".to_string(),
        email: String::new(),
        notes: String::new(),
        tags: Vec::new(),
        payment_method: "cash".to_string(),
        source: "WhatsApp".to_string(),
    }
}

#[tokio::test]
async fn resolver_falls_back_to_second_candidate() {
    // First candidate (connectionState) is unrouted -> 404; the resolver must
    // accept the fetchInstances fallback and tag it as the match.
    let app = Router::new().route(
        "/instance/fetchInstances/:inst",
        get(|| async { Json(json!({ "data": { "state": "open" } })) }),
    );
    let base = serve(app).await;
    let resolver = EndpointResolver::new(client_for(&base));

    let resolved = resolver
        .resolve(Operation::ConnectionState, &OperationParams::default())
        .await
        .expect("resolve via fallback");
    assert!(resolved.endpoint.contains("fetchInstances"));
    assert_eq!(
        resolved.body.pointer("/data/state").and_then(Value::as_str),
        Some("open")
    );
}

#[tokio::test]
async fn resolver_reports_all_endpoints_failed() {
    let app = Router::new();
    let base = serve(app).await;
    let resolver = EndpointResolver::new(client_for(&base));

    let err = resolver
        .resolve(Operation::ListMessages, &OperationParams::with_phone("5511999990000"))
        .await
        .expect_err("every candidate is 404");
    match err {
        GatewayError::AllEndpointsFailed { operation, .. } => {
            assert_eq!(operation, "list-messages");
        }
        other => panic!("expected AllEndpointsFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn connect_surfaces_qr_then_connected() {
    // Phase flag: false = still pairing, true = session open.
    let open = Arc::new(AtomicBool::new(false));

    let state_open = open.clone();
    let app = Router::new()
        .route(
            "/instance/connectionState/:inst",
            get(move || {
                let open = state_open.clone();
                async move {
                    if open.load(Ordering::SeqCst) {
                        Json(json!({ "instance": { "state": "open" } }))
                    } else {
                        Json(json!({ "state": "close" }))
                    }
                }
            }),
        )
        .route(
            "/instance/create",
            post(|| async { Json(json!({ "instance": { "instanceName": "main" } })) }),
        )
        .route(
            "/instance/connect/:inst",
            get(|| async { Json(json!({ "qrcode": "aGVsbG8=" })) }),
        );
    let base = serve(app).await;

    let notifier = Arc::new(BufferNotifier::new());
    let manager = ConnectionManager::new(client_for(&base), notifier);

    let state = manager.connect().await.expect("connect");
    assert_eq!(state.status, ConnectionStatus::Connecting);
    let qr = state.pending_qr_code.expect("pending qr");
    assert!(qr.starts_with("data:image/png;base64,"));

    // The user scans the code; the gateway now reports an open session.
    open.store(true, Ordering::SeqCst);
    let state = manager.check_status().await;
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.pending_qr_code, None);

    // Unchanged gateway state => unchanged snapshot on a repeat check.
    let again = manager.check_status().await;
    assert_eq!(again, manager.snapshot());
    assert_eq!(again.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn connect_without_qr_fails_as_pairing_unavailable() {
    // No QR endpoint routed and the session never opens: connect must report
    // a pairing failure, not pretend success.
    let app = Router::new()
        .route(
            "/instance/connectionState/:inst",
            get(|| async { Json(json!({ "state": "close" })) }),
        )
        .route(
            "/instance/create",
            post(|| async { Json(json!({ "instance": { "instanceName": "main" } })) }),
        );
    let base = serve(app).await;

    let manager = ConnectionManager::new(client_for(&base), Arc::new(BufferNotifier::new()));
    let err = manager.connect().await.expect_err("no pairing possible");
    assert!(matches!(err, GatewayError::PairingUnavailable));
}

#[tokio::test]
async fn disconnect_resets_state_immediately() {
    let app = Router::new()
        .route(
            "/instance/connectionState/:inst",
            get(|| async { Json(json!({ "instance": { "state": "open" } })) }),
        )
        .route(
            "/instance/logout/:inst",
            post(|| async { Json(json!({ "status": "SUCCESS" })) }),
        );
    let base = serve(app).await;

    let manager = ConnectionManager::new(client_for(&base), Arc::new(BufferNotifier::new()));
    let state = manager.check_status().await;
    assert_eq!(state.status, ConnectionStatus::Connected);

    // No poll tick runs here: the reset must be visible right after the call.
    manager.disconnect().await.expect("disconnect");
    let state = manager.snapshot();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.pending_qr_code, None);
}

#[tokio::test]
async fn failed_logout_leaves_state_unchanged() {
    let app = Router::new().route(
        "/instance/connectionState/:inst",
        get(|| async { Json(json!({ "instance": { "state": "open" } })) }),
    );
    let base = serve(app).await;

    let manager = ConnectionManager::new(client_for(&base), Arc::new(BufferNotifier::new()));
    manager.check_status().await;
    manager.disconnect().await.expect_err("logout is unrouted");
    assert_eq!(manager.snapshot().status, ConnectionStatus::Connected);
}

fn message_history() -> Value {
    // Deliberately out of order on the wire.
    json!({
        "messages": [
            { "id": "m3", "body": "third", "fromMe": false, "timestamp": 3 },
            { "id": "m1", "body": "first", "fromMe": true, "timestamp": 1 },
            { "id": "m2", "body": "second", "fromMe": false, "timestamp": 2 }
        ]
    })
}

#[tokio::test]
async fn load_messages_sorts_ascending_by_timestamp() {
    let app = Router::new().route(
        "/instance/fetchMessages/:inst",
        get(|| async { Json(message_history()) }),
    );
    let base = serve(app).await;

    let session = ChatSession::new(client_for(&base), Arc::new(BufferNotifier::new()), &test_contact());
    session.load_messages().await;

    let state = session.snapshot();
    assert!(state.error.is_none());
    let ids: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
    assert_eq!(state.messages[0].direction, Direction::Outgoing);
    assert!(state.messages.iter().all(|m| m.contact_id == "5511999990000"));
}

#[tokio::test]
async fn send_appends_one_outgoing_message_at_the_tail() {
    let app = Router::new()
        .route(
            "/instance/fetchMessages/:inst",
            get(|| async { Json(message_history()) }),
        )
        .route(
            "/message/text/:inst",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body.get("number").and_then(Value::as_str), Some("5511999990000"));
                assert_eq!(
                    body.pointer("/options/presence").and_then(Value::as_str),
                    Some("composing")
                );
                Json(json!({ "key": { "id": "SENT1" } }))
            }),
        );
    let base = serve(app).await;

    let session = ChatSession::new(client_for(&base), Arc::new(BufferNotifier::new()), &test_contact());
    session.load_messages().await;
    let before = session.snapshot().messages.len();

    let sent = session.send_message("hello").await.expect("send");
    assert_eq!(sent.id, "SENT1");

    let state = session.snapshot();
    assert_eq!(state.messages.len(), before + 1);
    let tail = state.messages.last().expect("tail");
    assert_eq!(tail.id, "SENT1");
    assert_eq!(tail.content, "hello");
    assert_eq!(tail.direction, Direction::Outgoing);
    assert_eq!(tail.delivery_status, DeliveryStatus::Sent);
    assert!(state.messages.iter().all(|m| m.timestamp <= tail.timestamp));
}

#[tokio::test]
async fn failed_fetch_keeps_previous_messages_and_sets_error() {
    // First call serves history, later calls fail with 500 on every candidate
    // path so the whole operation fails.
    let calls = Arc::new(AtomicU32::new(0));
    let calls_handler = calls.clone();
    let handler = move || {
        let calls = calls_handler.clone();
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                (StatusCode::OK, Json(message_history()))
            } else {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" })))
            }
        }
    };
    let app = Router::new().route("/instance/fetchMessages/:inst", get(handler));
    let base = serve(app).await;

    let session = ChatSession::new(client_for(&base), Arc::new(BufferNotifier::new()), &test_contact());
    session.load_messages().await;
    assert_eq!(session.snapshot().messages.len(), 3);
    assert!(session.snapshot().error.is_none());

    session.load_messages().await;
    let state = session.snapshot();
    assert_eq!(state.messages.len(), 3, "transient failure must not blank the list");
    assert!(state.error.is_some(), "failure must be distinguishable from empty");
}

#[tokio::test]
async fn directory_discards_unidentifiable_contacts() {
    let app = Router::new().route(
        "/chat/getAllChats/:inst",
        get(|| async {
            Json(json!({
                "contacts": [
                    { "id": { "user": "5511999990000" }, "name": "Maria" },
                    { "name": "no id at all" },
                    { "jid": "5521888887777@s.whatsapp.net", "pushname": "Jo" }
                ]
            }))
        }),
    );
    let base = serve(app).await;

    let directory = ContactDirectory::new(client_for(&base), Arc::new(BufferNotifier::new()));
    directory.load_contacts().await;

    let state = directory.snapshot();
    assert!(state.error.is_none());
    assert_eq!(state.contacts.len(), 2);
    assert_eq!(state.contacts[0].display_name, "Maria");
    assert_eq!(state.contacts[1].phone, "5521888887777");
}

#[tokio::test]
async fn directory_failure_is_distinct_from_empty() {
    let empty_app = Router::new().route(
        "/chat/getAllChats/:inst",
        get(|| async { Json(json!({ "contacts": [] })) }),
    );
    let base = serve(empty_app).await;
    let directory = ContactDirectory::new(client_for(&base), Arc::new(BufferNotifier::new()));
    directory.load_contacts().await;
    let state = directory.snapshot();
    assert!(state.contacts.is_empty());
    assert!(state.error.is_none());

    let failing = ContactDirectory::new(client_for("http://127.0.0.1:9"), Arc::new(BufferNotifier::new()));
    failing.load_contacts().await;
    let state = failing.snapshot();
    assert!(state.contacts.is_empty());
    assert!(state.error.is_some());
}

#[tokio::test]
async fn config_update_applies_to_next_request() {
    // Two mock gateways with different states; retargeting the store must
    // redirect the very next status check without rebuilding the client.
    let app_a = Router::new().route(
        "/instance/connectionState/:inst",
        get(|| async { Json(json!({ "state": "close" })) }),
    );
    let app_b = Router::new().route(
        "/instance/connectionState/:inst",
        get(|| async { Json(json!({ "instance": { "state": "open" } })) }),
    );
    let base_a = serve(app_a).await;
    let base_b = serve(app_b).await;

    let store = ConfigStore::new(GatewayConfig {
        base_url: base_a,
        api_key: "test-key".to_string(),
        instance_name: "main".to_string(),
    });
    let client = Arc::new(GatewayClient::new(store.clone()));
    let manager = ConnectionManager::new(client, Arc::new(BufferNotifier::new()));

    assert_eq!(manager.check_status().await.status, ConnectionStatus::Disconnected);
    store.update(|c| c.base_url = base_b.clone()).expect("update");
    assert_eq!(manager.check_status().await.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn status_poll_updates_state_until_stopped() {
    let app = Router::new().route(
        "/instance/connectionState/:inst",
        get(|| async { Json(json!({ "instance": { "state": "open" } })) }),
    );
    let base = serve(app).await;

    let manager = Arc::new(ConnectionManager::new(
        client_for(&base),
        Arc::new(BufferNotifier::new()),
    ));
    assert_eq!(manager.snapshot().status, ConnectionStatus::Disconnected);

    manager.clone().start_polling(Duration::from_millis(20));
    let mut connected = false;
    for _ in 0..100 {
        if manager.snapshot().status == ConnectionStatus::Connected {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(connected, "poll loop never observed the open session");

    // Stopping cancels the task; the snapshot stays stable afterwards.
    manager.stop_polling();
    let frozen = manager.snapshot();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.snapshot(), frozen);
}

#[tokio::test]
async fn directory_poll_refreshes_contacts() {
    let app = Router::new().route(
        "/chat/getAllChats/:inst",
        get(|| async {
            Json(json!({ "contacts": [ { "id": { "user": "5511999990000" }, "name": "Maria" } ] }))
        }),
    );
    let base = serve(app).await;

    let directory = Arc::new(ContactDirectory::new(
        client_for(&base),
        Arc::new(BufferNotifier::new()),
    ));
    directory.clone().start_polling(Duration::from_millis(20));
    let mut loaded = false;
    for _ in 0..100 {
        if directory.snapshot().contacts.len() == 1 {
            loaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    directory.stop_polling();
    assert!(loaded, "poll loop never loaded the contact list");
}

#[tokio::test]
async fn webhook_receiver_delivers_normalized_messages() {
    let (receiver, mut events) = WebhookReceiver::start("127.0.0.1", 0)
        .await
        .expect("start webhook receiver");
    let url = format!("http://{}/", receiver.addr());

    let payload = json!({
        "event": "messages.upsert",
        "data": {
            "key": { "remoteJid": "5511999990000@s.whatsapp.net", "id": "WAID9" },
            "message": { "conversation": "pushed" },
            "fromMe": false,
            "messageTimestamp": 1700000000
        }
    });
    let res = reqwest::Client::new()
        .post(&url)
        .json(&payload)
        .send()
        .await
        .expect("post event");
    assert!(res.status().is_success());

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event within 5s")
        .expect("channel open");
    match event {
        WebhookEvent::Message(msg) => {
            assert_eq!(msg.contact_id, "5511999990000");
            assert_eq!(msg.content, "pushed");
        }
        other => panic!("expected message event, got {:?}", other),
    }
}
