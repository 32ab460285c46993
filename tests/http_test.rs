//! End-to-end tests for the HTTP routes over a real listener.

use std::sync::Arc;
use std::time::Duration;

use gx_dispatch::engine::{EngineConfig, Registry, SchedulerConfig};
use gx_dispatch::http::{self, AppState};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;

struct TestServer {
    base: String,
    client: reqwest::Client,
    registry: Arc<Registry>,
}

impl TestServer {
    /// Dispatching is slowed to a crawl so tasks stay queued for the test.
    async fn start() -> Self {
        let config = EngineConfig::new(["alpha"]).scheduler(SchedulerConfig {
            idle_backoff: Duration::from_secs(3600),
            ..SchedulerConfig::default()
        });
        let registry = Arc::new(Registry::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(Arc::clone(&registry));
        tokio::spawn(http::serve(listener, state, std::future::pending()));

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            registry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn get(&self, path: &str, key: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .query(&[("api_key", key), ("workspace_id", "main")])
    }

    fn post(&self, path: &str, key: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .query(&[("api_key", key), ("workspace_id", "main")])
    }

    fn delete(&self, path: &str, key: &str) -> reqwest::RequestBuilder {
        self.client
            .delete(self.url(path))
            .query(&[("api_key", key), ("workspace_id", "main")])
    }

    /// Create the workspace and let its dispatch loop settle into backoff.
    async fn warm_up(&self) {
        let resp = self.get("/tasks", "alpha").send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn error_of(resp: reqwest::Response) -> (StatusCode, String, String) {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap();
    (
        status,
        body["error"]["message"].as_str().unwrap_or_default().to_string(),
        body["error"]["type"].as_str().unwrap_or_default().to_string(),
    )
}

#[tokio::test]
async fn index_lists_every_route() {
    let server = TestServer::start().await;
    let resp = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = resp.text().await.unwrap();
    for path in ["/stats", "/ws/tasks", "/tasks/{id}", "/tasks/flush"] {
        assert!(text.contains(path), "missing {path}");
    }
}

#[tokio::test]
async fn unknown_key_is_forbidden() {
    let server = TestServer::start().await;
    let resp = server.get("/tasks", "wrong").send().await.unwrap();
    let (status, _, kind) = error_of(resp).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(kind, "FORBIDDEN");

    let resp = server.client.get(server.url("/tasks")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(server.registry.tenant_count(), 0);
}

#[tokio::test]
async fn malformed_workspace_id_is_rejected() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .get(server.url("/tasks"))
        .query(&[("api_key", "alpha"), ("workspace_id", "no spaces")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn task_lifecycle_over_http() {
    let server = TestServer::start().await;
    server.warm_up().await;

    let resp = server
        .post("/tasks", "alpha")
        .json(&json!({"name": "render", "type": "gx.heavy"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["task"],
        json!({"id": 1, "name": "render", "type": "gx.heavy", "status": "queued"})
    );

    let body: Value = server
        .get("/tasks", "alpha")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["tasks"].as_array().unwrap().len(), 1);

    let resp = server.delete("/tasks/1", "alpha").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = server.delete("/tasks/1", "alpha").send().await.unwrap();
    let (status, message, kind) = error_of(resp).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(kind, "TASK_NOT_FOUND");
    assert!(message.contains("could not be found"));

    let resp = server.delete("/tasks/abc", "alpha").send().await.unwrap();
    let (status, message, _) = error_of(resp).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message, "invalid task id");
}

#[tokio::test]
async fn create_task_validates_body() {
    let server = TestServer::start().await;

    let cases = [
        (json!({"type": "gx.tiny"}), "name is required"),
        (json!({"name": "  ", "type": "gx.tiny"}), "name is required"),
        (json!({"name": "x", "type": "gx.gigantic"}), "invalid task type"),
        (json!({"name": "x"}), "invalid task type"),
        (json!(["not", "an", "object"]), "invalid request body"),
    ];
    for (body, expected) in cases {
        let resp = server.post("/tasks", "alpha").json(&body).send().await.unwrap();
        let (status, message, _) = error_of(resp).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(message, expected, "{body}");
    }

    let resp = server
        .post("/tasks", "alpha")
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    let (status, message, _) = error_of(resp).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message, "invalid request body");
}

#[tokio::test]
async fn task_name_is_stored_as_given() {
    let server = TestServer::start().await;
    server.warm_up().await;

    let resp = server
        .post("/tasks", "alpha")
        .json(&json!({"name": "  padded name ", "type": "gx.tiny"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["task"]["name"], "  padded name ");
}

#[tokio::test]
async fn flush_clears_queued_tasks() {
    let server = TestServer::start().await;
    server.warm_up().await;

    for name in ["a", "b", "c"] {
        let resp = server
            .post("/tasks", "alpha")
            .json(&json!({"name": name, "type": "gx.small"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = server.post("/tasks/flush", "alpha").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let body: Value = server
        .get("/tasks", "alpha")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"tasks": []}));
}

#[tokio::test]
async fn stats_report_registry_counts() {
    let server = TestServer::start().await;
    server.warm_up().await;
    server
        .post("/tasks", "alpha")
        .json(&json!({"name": "a", "type": "gx.large"}))
        .send()
        .await
        .unwrap();

    let body: Value = server
        .client
        .get(server.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["tenants"], 1);
    assert_eq!(body["workspaces"], 1);
    assert_eq!(body["queued"], 1);
    assert!(body["started_at"].is_string());
    assert!(body["uptime_secs"].is_u64());
}

#[tokio::test]
async fn websocket_route_checks_credentials_before_upgrade() {
    let server = TestServer::start().await;

    let resp = server.get("/ws/tasks", "wrong").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // right key, but not a websocket handshake
    let resp = server.get("/ws/tasks", "alpha").send().await.unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn shutdown_turns_requests_away() {
    let server = TestServer::start().await;
    server.registry.shutdown();

    let resp = server.get("/tasks", "alpha").send().await.unwrap();
    let (status, _, kind) = error_of(resp).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(kind, "SHUTTING_DOWN");
}
