use super::*;
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
    time::Duration,
};

use axum::{body, body::Body, extract::Path, http::Request};
use session::{Clock, WorkflowConfig};
use skybox_client::{ApiKey, ClientEvent, ParticipantClient, SubmitOutcome};
use tokio::{net::TcpListener, sync::broadcast, time::timeout};
use tower::ServiceExt;

struct ManualClock(Mutex<f64>);

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.0.lock().expect("lock")
    }
}

fn test_state(now: f64) -> (Arc<AppState>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock(Mutex::new(now)));
    let state = AppState {
        store: SessionStore::new(),
        gate: SubmissionGate::default(),
        clock: clock.clone(),
    };
    (Arc::new(state), clock)
}

async fn spawn_router(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

fn submit_request(prompt: &str) -> Request<Body> {
    Request::post("/submit")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "prompt": prompt }).to_string(),
        ))
        .expect("request")
}

async fn next_state(
    events: &mut broadcast::Receiver<ClientEvent>,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.expect("feed open") {
                ClientEvent::State(snapshot) if pred(&snapshot) => return snapshot,
                ClientEvent::Disconnected => panic!("feed disconnected"),
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for state")
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (state, _) = test_state(0.0);
    let app = build_router(state);
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn state_starts_empty() {
    let (state, _) = test_state(0.0);
    let app = build_router(state);
    let request = Request::get("/state").body(Body::empty()).expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let snapshot: SessionSnapshot = serde_json::from_slice(&body).expect("snapshot");
    assert_eq!(snapshot.revision.0, 0);
    assert_eq!(snapshot.state.submission, None);
    assert_eq!(snapshot.state.status, None);
}

#[tokio::test]
async fn submit_is_accepted_then_rate_limited_inside_cooldown() {
    let (state, clock) = test_state(5.0);
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(submit_request("aurora over glaciers"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let snapshot: SessionSnapshot = serde_json::from_slice(&body).expect("snapshot");
    assert_eq!(
        snapshot.state.submission.as_deref(),
        Some("aurora over glaciers")
    );
    assert_eq!(snapshot.state.last_submitted_at, Some(5.0));

    *clock.0.lock().expect("lock") = 35.25;
    let response = app
        .oneshot(submit_request("desert night"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let err: ApiError = serde_json::from_slice(&body).expect("error body");
    assert_eq!(err, ApiError::rate_limited("Wait 89.75 seconds"));

    let current = state.store.snapshot().state;
    assert_eq!(current.submission.as_deref(), Some("aurora over glaciers"));
    assert_eq!(current.status.as_deref(), Some("Wait 89.75 seconds"));
}

#[tokio::test]
async fn change_feed_sends_current_snapshot_then_updates() {
    let (state, _) = test_state(0.0);
    let base = spawn_router(build_router(state)).await;
    let client = ParticipantClient::new(base);

    let mut feed = client.connect_feed().await.expect("feed");
    let initial = next_state(&mut feed.events, |_| true).await;
    assert_eq!(initial.revision.0, 0);

    feed.requests
        .send(ClientRequest::Submit {
            prompt: "coral reef".into(),
        })
        .await
        .expect("send");
    let accepted = next_state(&mut feed.events, |s| s.state.submission.is_some()).await;
    assert_eq!(accepted.state.submission.as_deref(), Some("coral reef"));
    assert_eq!(accepted.submission_seq.0, 1);
}

#[tokio::test]
async fn change_feed_answers_rejected_submit_with_error_event() {
    let (state, _) = test_state(0.0);
    let base = spawn_router(build_router(state)).await;
    let client = ParticipantClient::new(base.clone());

    assert!(matches!(
        client.submit("first").await.expect("submit"),
        SubmitOutcome::Accepted(_)
    ));

    let mut feed = client.connect_feed().await.expect("feed");
    feed.requests
        .send(ClientRequest::Submit {
            prompt: "second".into(),
        })
        .await
        .expect("send");

    let rejection = timeout(Duration::from_secs(5), async {
        loop {
            match feed.events.recv().await.expect("feed open") {
                ClientEvent::Rejected(err) => return err,
                ClientEvent::Disconnected => panic!("feed disconnected"),
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for rejection");
    assert_eq!(rejection, ApiError::rate_limited("Wait 120 seconds"));

    let outcome = client.submit("third").await.expect("submit");
    assert_eq!(
        outcome,
        SubmitOutcome::Rejected(ApiError::rate_limited("Wait 120 seconds"))
    );
    assert_eq!(
        client.state().await.expect("state").state.submission.as_deref(),
        Some("first")
    );
}

#[tokio::test]
async fn submitted_prompt_produces_shared_skybox() {
    let polls = Arc::new(AtomicU32::new(0));
    let blockade = {
        let polls = polls.clone();
        Router::new()
            .route(
                "/generators",
                get(|| async { Json(serde_json::json!([{ "generator": "g-main" }])) }),
            )
            .route(
                "/imagine/requests",
                post(|| async {
                    Json(serde_json::json!({ "request": { "id": 9, "file_url": "" } }))
                }),
            )
            .route(
                "/imagine/requests/:id",
                get(move |Path(id): Path<String>| {
                    let polls = polls.clone();
                    async move {
                        let attempt = polls.fetch_add(1, Ordering::SeqCst) + 1;
                        let file_url = if attempt >= 2 {
                            format!("http://cdn.test/{id}.jpg")
                        } else {
                            String::new()
                        };
                        Json(serde_json::json!({ "request": { "id": id, "file_url": file_url } }))
                    }
                }),
            )
    };
    let blockade_url = spawn_router(blockade).await;

    let (state, _) = test_state(0.0);
    let service = Arc::new(BlockadeLabsClient::new(blockade_url, ApiKey::new("k")));
    let config = WorkflowConfig {
        poll_interval: Duration::from_millis(20),
        ready_clear_delay: Duration::from_millis(100),
        max_poll_attempts: Some(10),
    };
    let controller = GenerationController::new(state.store.clone(), service, config).spawn();
    let base = spawn_router(build_router(state)).await;

    let client = ParticipantClient::new(base);
    let mut feed = client.connect_feed().await.expect("feed");
    client.submit("tropical lagoon").await.expect("submit");

    let ready = next_state(&mut feed.events, |s| s.state.skybox_url.is_some()).await;
    assert_eq!(
        ready.state.skybox_url.as_deref(),
        Some("http://cdn.test/9.jpg")
    );
    assert_eq!(polls.load(Ordering::SeqCst), 2);

    let cleared = next_state(&mut feed.events, |s| s.state.status.is_none()).await;
    assert_eq!(
        cleared.state.skybox_url.as_deref(),
        Some("http://cdn.test/9.jpg")
    );
    assert_eq!(cleared.state.submission.as_deref(), Some("tropical lagoon"));

    controller.abort();
}

#[tokio::test]
async fn malformed_submit_body_is_a_validation_error() {
    let (state, _) = test_state(0.0);
    let app = build_router(state.clone());

    let request = Request::post("/submit")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"text":"no prompt field"}"#))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let err: ApiError = serde_json::from_slice(&body).expect("error body");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(err.message.starts_with("invalid request"));
    assert_eq!(state.store.snapshot().revision.0, 0);
}

#[tokio::test]
async fn non_json_submit_body_gets_api_error_over_http() {
    let (state, _) = test_state(0.0);
    let base = spawn_router(build_router(state)).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/submit"))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = response.json().await.expect("api error body");
    assert_eq!(err.code, ErrorCode::Validation);
}
