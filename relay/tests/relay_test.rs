//! HTTP-level tests for the relay.
//!
//! Requests go through the full axum router via `tower::ServiceExt::oneshot`.
//! Trello is replaced by a local axum server that records every comment it
//! receives; the identity check and filter engine are replaced by fakes so the
//! tests need neither network access nor a `jq` binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{Request, Response, StatusCode};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tower::ServiceExt;

use hookrelay::filter::{FilterError, FilterEvaluator};
use hookrelay::identity::{IdentityError, IdentityVerifier};
use hookrelay::recent::{
    MemoryRecentStore, RecentLogError, RecentRequestLog, RecentRequestStore,
};
use hookrelay::routing::{
    self, EndpointStore, EndpointSummary, EndpointTarget, EndpointUpdate, MemoryEndpointStore,
    NewEndpoint, StoreError,
};
use hookrelay::sink::{OutgoingRequest, Sink, SinkError, TRELLO_COMMENT_KIND};
use hookrelay::{
    router, AppState, Config, FanOutDispatcher, SinkRegistry, TrelloApi, TrelloCommentSink,
};

// ============================================================================
// Fakes
// ============================================================================

/// Understands `.` and dotted paths such as `.action.type`, printing strings raw
/// like `jq -r`.
struct PathEvaluator;

#[async_trait]
impl FilterEvaluator for PathEvaluator {
    async fn evaluate(&self, payload: &[u8], filter: &str) -> Result<Bytes, FilterError> {
        let value: Value = serde_json::from_slice(payload).map_err(|e| FilterError::Engine {
            filter: filter.to_string(),
            stderr: e.to_string(),
        })?;

        let selected = if filter == "." {
            Some(&value)
        } else {
            value.pointer(&filter.replace('.', "/"))
        };

        let out = match selected {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "null".to_string(),
        };
        Ok(Bytes::from(out))
    }
}

/// Accepts the token `good` for any card, as member `alice`.
struct FakeIdentity;

#[async_trait]
impl IdentityVerifier for FakeIdentity {
    async fn verify(&self, token: &str, card: &str) -> Result<String, IdentityError> {
        if token == "good" && !card.is_empty() {
            Ok("alice@trello".to_string())
        } else {
            Err(IdentityError::MissingCredentials)
        }
    }
}

/// Fails every call the way an unreachable database would.
struct FailingStore;

#[async_trait]
impl EndpointStore for FailingStore {
    async fn targets_for(&self, _address: &str) -> Result<Vec<EndpointTarget>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn list_for_target(
        &self,
        _target: &str,
        _owner: &str,
    ) -> Result<Vec<EndpointSummary>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn create(&self, _endpoint: NewEndpoint) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn update(&self, _update: EndpointUpdate) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn delete(&self, _address: &str, _owner: &str) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

/// Recent-request backend that never answers.
struct StalledRecentStore;

#[async_trait]
impl RecentRequestStore for StalledRecentStore {
    async fn push(
        &self,
        _key: &str,
        _payload: Bytes,
        _ttl_secs: i64,
        _keep: Option<usize>,
    ) -> Result<(), RecentLogError> {
        std::future::pending().await
    }

    async fn range(&self, _key: &str) -> Result<Vec<Bytes>, RecentLogError> {
        std::future::pending().await
    }
}

/// Sets `dropped` when its in-flight dispatch future is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Sink that never finishes; reports when it starts and when it is dropped.
#[derive(Default)]
struct HangingSink {
    started: Notify,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl Sink for HangingSink {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn dispatch(
        &self,
        _request: &OutgoingRequest,
        _payload: &[u8],
        _target: &EndpointTarget,
    ) -> Result<(), SinkError> {
        let _flag = DropFlag(self.dropped.clone());
        self.started.notify_one();
        std::future::pending().await
    }
}

// ============================================================================
// Mock Trello
// ============================================================================

#[derive(Debug, Clone)]
struct PostedComment {
    card: String,
    query: HashMap<String, String>,
}

type Comments = Arc<Mutex<Vec<PostedComment>>>;

async fn record_comment(
    State(comments): State<Comments>,
    Path(card): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    comments.lock().unwrap().push(PostedComment { card, query });
    StatusCode::OK
}

/// Spawn a fake Trello API and return its base URL with the recorded comments.
async fn spawn_trello() -> (String, Comments) {
    let comments: Comments = Arc::default();
    let app = Router::new()
        .route("/1/cards/:card/actions/comments", post(record_comment))
        .with_state(comments.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), comments)
}

// ============================================================================
// Test app
// ============================================================================

struct TestApp {
    router: Router,
    endpoints: Arc<MemoryEndpointStore>,
}

impl TestApp {
    fn build(
        trello_url: &str,
        endpoints: Arc<dyn EndpointStore>,
        recent: Option<Arc<dyn RecentRequestStore>>,
    ) -> Router {
        Self::build_with_sinks(trello_url, endpoints, recent, SinkRegistry::new())
    }

    fn build_with_sinks(
        trello_url: &str,
        endpoints: Arc<dyn EndpointStore>,
        recent: Option<Arc<dyn RecentRequestStore>>,
        sinks: SinkRegistry,
    ) -> Router {
        let config = Config {
            trello_api_key: "testkey".to_string(),
            trello_api_url: trello_url.to_string(),
            ..Config::default()
        };

        let trello =
            TrelloApi::new(reqwest::Client::new(), &config.trello_api_url, "testkey").unwrap();
        let sinks = sinks.register(
            TRELLO_COMMENT_KIND,
            Arc::new(TrelloCommentSink::new(trello)),
        );
        let dispatcher = FanOutDispatcher::new(
            Arc::new(PathEvaluator),
            sinks,
            Duration::from_secs(2),
            Duration::from_secs(10),
        );
        let recent = recent.map(|store| RecentRequestLog::new(store, &config));

        router(AppState {
            config: Arc::new(config),
            endpoints,
            recent,
            dispatcher,
            identity: Arc::new(FakeIdentity),
        })
    }

    fn new(trello_url: &str) -> Self {
        let endpoints = Arc::new(MemoryEndpointStore::new());
        let router = Self::build(
            trello_url,
            endpoints.clone(),
            Some(Arc::new(MemoryRecentStore::new())),
        );
        Self { router, endpoints }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    async fn post_webhook(&self, address: &str, body: &str) -> Response<Body> {
        self.send(
            Request::post(format!("/w/{address}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn put_card(&self, body: Value) -> Response<Body> {
        self.send(
            Request::put("/trello/card")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(Request::delete(uri).body(Body::empty()).unwrap())
            .await
    }
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn trello_target(address: &str, filter: &str, card: &str) -> EndpointTarget {
    EndpointTarget {
        address: address.to_string(),
        filter: filter.to_string(),
        kind: TRELLO_COMMENT_KIND.to_string(),
        target: card.to_string(),
        data: json!({"token": "tok"}),
    }
}

// ============================================================================
// Webhook ingestion
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = TestApp::new("http://127.0.0.1:9");
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_webhook_posts_filtered_comment() {
    let (trello_url, comments) = spawn_trello().await;
    let app = TestApp::new(&trello_url);
    app.endpoints
        .link("alice@trello", trello_target("abc123", ".action.type", "cardXYZ"))
        .await;

    let response = app
        .post_webhook("abc123", r#"{"action":{"type":"commentCard"}}"#)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["targets"], 1);
    assert_eq!(body["failed"], 0);

    let comments = comments.lock().unwrap().clone();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].card, "cardXYZ");
    assert_eq!(
        comments[0].query["text"],
        "Got webhook on **abc123**:\n\n>commentCard"
    );
    assert_eq!(comments[0].query["key"], "testkey");
    assert_eq!(comments[0].query["token"], "tok");
}

#[tokio::test]
async fn test_webhook_fans_out_and_isolates_unknown_kind() {
    let (trello_url, comments) = spawn_trello().await;
    let app = TestApp::new(&trello_url);
    app.endpoints
        .link("alice@trello", trello_target("multi", ".a", "card1"))
        .await;
    app.endpoints
        .link(
            "alice@trello",
            EndpointTarget {
                kind: "email:send".to_string(),
                ..trello_target("multi", ".a", "card2")
            },
        )
        .await;
    app.endpoints
        .link("alice@trello", trello_target("multi", ".a", "card3"))
        .await;

    let response = app.post_webhook("multi", r#"{"a":"x"}"#).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["targets"], 3);
    assert_eq!(body["failed"], 1);

    let mut cards: Vec<String> = comments
        .lock()
        .unwrap()
        .iter()
        .map(|c| c.card.clone())
        .collect();
    cards.sort();
    assert_eq!(cards, vec!["card1", "card3"]);
}

#[tokio::test]
async fn test_webhook_rejects_invalid_json() {
    let app = TestApp::new("http://127.0.0.1:9");
    let response = app.post_webhook("abc123", "{not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unmapped_address_is_ok_or_gone() {
    let app = TestApp::new("http://127.0.0.1:9");

    for _ in 0..20 {
        let response = app.post_webhook("nowhere", r#"{"a":1}"#).await;
        let status = response.status();
        assert!(
            status == StatusCode::OK || status == StatusCode::GONE,
            "unexpected status {status}"
        );
    }
}

#[tokio::test]
async fn test_store_failure_is_server_error() {
    let router = TestApp::build("http://127.0.0.1:9", Arc::new(FailingStore), None);
    let response = router
        .oneshot(
            Request::post("/w/abc123")
                .body(Body::from(r#"{"a":1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_recent_log_does_not_block_response() {
    let endpoints = Arc::new(MemoryEndpointStore::new());
    let router = TestApp::build(
        "http://127.0.0.1:9",
        endpoints,
        Some(Arc::new(StalledRecentStore)),
    );

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        router.oneshot(
            Request::post("/w/nowhere")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        ),
    )
    .await
    .expect("webhook response held by recent-request log")
    .unwrap();

    let status = response.status();
    assert!(status == StatusCode::OK || status == StatusCode::GONE);
}

#[tokio::test]
async fn test_client_disconnect_cancels_dispatch() {
    let sink = Arc::new(HangingSink::default());
    let endpoints = Arc::new(MemoryEndpointStore::new());
    endpoints
        .link(
            "alice@trello",
            EndpointTarget {
                kind: "hang".to_string(),
                ..trello_target("slow", ".", "card1")
            },
        )
        .await;

    let router = TestApp::build_with_sinks(
        "http://127.0.0.1:9",
        endpoints,
        None,
        SinkRegistry::new().register("hang", sink.clone()),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"POST /w/slow HTTP/1.1\r\nHost: relay\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}",
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), sink.started.notified())
        .await
        .expect("sink never started");
    assert!(!sink.dropped.load(Ordering::SeqCst));

    drop(stream);

    // Well under the 10s sink deadline.
    let cancelled = tokio::time::timeout(Duration::from_secs(3), async {
        while !sink.dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(cancelled.is_ok(), "dispatch kept running after disconnect");
}

// ============================================================================
// Management API
// ============================================================================

#[tokio::test]
async fn test_put_card_creates_resolvable_endpoint() {
    let app = TestApp::new("http://127.0.0.1:9");

    let response = app
        .put_card(json!({
            "newAddress": "myhook",
            "filter": ".action.type",
            "card": "card1",
            "token": "good",
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!("myhook"));

    let targets = routing::resolve(app.endpoints.as_ref(), "myhook")
        .await
        .unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].kind, TRELLO_COMMENT_KIND);
    assert_eq!(targets[0].target, "card1");
    assert_eq!(targets[0].filter, ".action.type");
    assert_eq!(targets[0].data, json!({"token": "good"}));

    let listed = body_json(app.get("/trello/card?card=card1&token=good").await).await;
    assert_eq!(
        listed,
        json!([{"address": "myhook", "filter": ".action.type"}])
    );
}

#[tokio::test]
async fn test_put_card_generates_address() {
    let app = TestApp::new("http://127.0.0.1:9");

    let response = app
        .put_card(json!({"filter": ".", "card": "card1", "token": "good"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let address = body_json(response).await;
    let address = address.as_str().unwrap();
    assert_eq!(address.len(), 10);
    assert!(routing::resolve(app.endpoints.as_ref(), address).await.is_ok());
}

#[tokio::test]
async fn test_put_card_rename_and_delete() {
    let app = TestApp::new("http://127.0.0.1:9");
    app.put_card(json!({"newAddress": "first", "filter": ".", "card": "card1", "token": "good"}))
        .await;

    let response = app
        .put_card(json!({
            "address": "first",
            "newAddress": "second",
            "filter": ".b",
            "card": "card1",
            "token": "good",
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!("second"));

    assert!(routing::resolve(app.endpoints.as_ref(), "first").await.is_err());
    let targets = routing::resolve(app.endpoints.as_ref(), "second")
        .await
        .unwrap();
    assert_eq!(targets[0].filter, ".b");

    let response = app
        .delete("/trello/card?address=second&card=card1&token=good")
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .delete("/trello/card?address=second&card=card1&token=good")
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_put_card_errors() {
    let app = TestApp::new("http://127.0.0.1:9");

    let response = app
        .put_card(json!({"newAddress": "taken", "card": "card1", "token": "bad"}))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .put_card(json!({"newAddress": "has space", "card": "card1", "token": "good"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.put_card(json!({"newAddress": "taken", "card": "card1", "token": "good"}))
        .await;
    let response = app
        .put_card(json!({"newAddress": "taken", "card": "card2", "token": "good"}))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .put_card(json!({"address": "missing", "card": "card1", "token": "good"}))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(
            Request::put("/trello/card")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_card_requests_lists_recent_payloads() {
    let app = TestApp::new("http://127.0.0.1:9");
    app.put_card(json!({"newAddress": "logged", "filter": ".", "card": "card1", "token": "good"}))
        .await;

    // The sink fails (nothing listens on port 9) but the payloads are still logged.
    app.post_webhook("logged", r#"{"n":1}"#).await;
    app.post_webhook("logged", r#"{"n":2}"#).await;

    let response = app
        .get("/trello/card/requests?address=logged&card=card1&token=good")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([{"n": 2}, {"n": 1}]));

    let response = app
        .get("/trello/card/requests?address=logged&card=other&token=good")
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
