//! Two users against a real server on a loopback port: likes, a match, a
//! message and a read receipt, all observed through the gateway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use kindred_api::auth::issue_token;
use kindred_client::{ApiClient, Callbacks, ConnectConfig, ConnectionManager, ConversationStore, GatewayTransport};
use kindred_db::Database;
use kindred_server::build_app;
use kindred_server::config::FanoutMode;
use kindred_types::events::UserEvent;
use kindred_types::models::{ActionKind, MessageType};

const SECRET: &str = "e2e-secret";

async fn start_server() -> String {
    let app = build_app(Database::open_in_memory().unwrap(), SECRET, &FanoutMode::Gateway);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct Session {
    id: Uuid,
    api: ApiClient,
    realtime: ConnectionManager<GatewayTransport>,
    events: mpsc::UnboundedReceiver<UserEvent>,
}

async fn sign_in(base: &str, name: &str) -> Session {
    let id = Uuid::new_v4();
    let token = issue_token(SECRET, id, name, None, Duration::from_secs(600)).unwrap();
    let api = ApiClient::new(base, token.clone());
    // First authenticated call registers the profile.
    api.conversations().await.unwrap();

    let (tx, events) = mpsc::unbounded_channel();
    let handler = Callbacks::new()
        .on_message({
            let tx = tx.clone();
            move |e: &kindred_types::events::MessageReceive| {
                let _ = tx.send(UserEvent::MessageReceive(e.clone()));
            }
        })
        .on_read_receipt({
            let tx = tx.clone();
            move |e: &kindred_types::events::ReadReceipt| {
                let _ = tx.send(UserEvent::ReadReceipt(e.clone()));
            }
        })
        .on_match({
            let tx = tx.clone();
            move |e: &kindred_types::events::MatchFormed| {
                let _ = tx.send(UserEvent::MatchFormed(e.clone()));
            }
        })
        .on_like(move |e: &kindred_types::events::LikeReceived| {
            let _ = tx.send(UserEvent::LikeReceived(e.clone()));
        });

    let realtime = ConnectionManager::new(GatewayTransport::from_http_base(base));
    realtime
        .connect(&ConnectConfig { user_id: id, token }, Arc::new(handler))
        .await
        .unwrap();

    Session {
        id,
        api,
        realtime,
        events,
    }
}

async fn next_event(session: &mut Session) -> UserEvent {
    tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .expect("event within 5s")
        .expect("handler alive")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn like_match_message_read_over_the_gateway() {
    let base = start_server().await;
    let mut a = sign_in(&base, "Ada").await;
    let mut b = sign_in(&base, "Bo").await;

    let resp = a.api.record_action(b.id, ActionKind::Like).await.unwrap();
    assert!(!resp.matched);
    assert!(resp.pushed);
    match next_event(&mut b).await {
        UserEvent::LikeReceived(like) => assert_eq!(like.liker.id, a.id),
        other => panic!("expected like, got {other:?}"),
    }

    let resp = b.api.record_action(a.id, ActionKind::Like).await.unwrap();
    assert!(resp.matched);
    let match_id = resp.mutual_match.unwrap().id;
    let (a_id, b_id) = (a.id, b.id);
    for (me, other) in [(&mut a, b_id), (&mut b, a_id)] {
        match next_event(me).await {
            UserEvent::MatchFormed(f) => {
                assert_eq!(f.matched.id, match_id);
                assert_eq!(f.matched.user.id, other);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    // A sends; A's own store appends optimistically, B's store fills from the push.
    let mut a_store = ConversationStore::new(a.id);
    let mut b_store = ConversationStore::new(b.id);

    let sent = a.api.send_message(b.id, "hi", MessageType::Text).await.unwrap();
    assert!(sent.pushed);
    assert_eq!(sent.message.match_id, match_id);
    a_store.append_sent(sent.message.clone());

    let pushed = next_event(&mut b).await;
    match &pushed {
        UserEvent::MessageReceive(m) => assert_eq!(m.content, "hi"),
        other => panic!("expected message, got {other:?}"),
    }
    assert!(b_store.apply(&pushed));
    assert_eq!(b_store.unread_count(match_id), 1);

    // A re-fetch merges without duplicating.
    let history = b.api.messages(match_id, 1, 50).await.unwrap();
    assert_eq!(b_store.merge_history(history.messages), 1);
    assert_eq!(b_store.messages(match_id).len(), 1);
    assert_eq!(b_store.unread_count(match_id), 0);

    // Viewing history already marked it read and told A.
    let receipt = next_event(&mut a).await;
    assert!(matches!(&receipt, UserEvent::ReadReceipt(r) if r.read_by_user_id == b.id));
    assert!(a_store.apply(&receipt));
    assert!(a_store.messages(match_id)[0].is_read);

    // An explicit receipt with nothing new still notifies.
    let r = b.api.read_receipt(match_id).await.unwrap();
    assert_eq!(r.marked, 0);
    assert!(matches!(next_event(&mut a).await, UserEvent::ReadReceipt(_)));

    for session in [&a, &b] {
        let history = session.api.messages(match_id, 1, 50).await.unwrap();
        assert_eq!(history.messages.len(), 1);
        assert!(history.messages[0].is_read);
    }

    // No echo to the sender.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a.events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gateway_refuses_foreign_channels_and_bad_tokens() {
    use kindred_client::{ClientError, Link, Transport};

    let base = start_server().await;
    let transport = GatewayTransport::from_http_base(&base);

    let bad = ConnectConfig {
        user_id: Uuid::new_v4(),
        token: "forged".into(),
    };
    assert!(matches!(
        transport.connect(&bad).await,
        Err(ClientError::Handshake(_))
    ));

    let me = Uuid::new_v4();
    let token = issue_token(SECRET, me, "me", None, Duration::from_secs(60)).unwrap();
    let mut link = transport
        .connect(&ConnectConfig { user_id: me, token })
        .await
        .unwrap();
    let someone_else = kindred_types::events::user_channel(Uuid::new_v4());
    assert!(matches!(
        link.subscribe(&someone_else).await,
        Err(ClientError::Protocol(_))
    ));
    link.subscribe(&kindred_types::events::user_channel(me)).await.unwrap();
    link.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_tab_of_a_user_receives_events() {
    let base = start_server().await;
    let mut a = sign_in(&base, "a").await;
    let b = sign_in(&base, "b").await;

    // Second "tab" for A with its own manager and connection.
    let second_tab: Arc<Mutex<Vec<UserEvent>>> = Arc::default();
    let tab = ConnectionManager::new(GatewayTransport::from_http_base(&base));
    let token = issue_token(SECRET, a.id, "a", None, Duration::from_secs(600)).unwrap();
    tab.connect(
        &ConnectConfig { user_id: a.id, token },
        Arc::new(Callbacks::new().on_like({
            let seen = second_tab.clone();
            move |e: &kindred_types::events::LikeReceived| {
                seen.lock().unwrap().push(UserEvent::LikeReceived(e.clone()));
            }
        })),
    )
    .await
    .unwrap();

    b.api.record_action(a.id, ActionKind::Like).await.unwrap();
    assert!(matches!(next_event(&mut a).await, UserEvent::LikeReceived(_)));

    tokio::time::timeout(Duration::from_secs(5), async {
        while second_tab.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("second tab got the like");

    assert_eq!(b.realtime.subscriber_count(), 1);
}
