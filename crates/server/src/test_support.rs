use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use db::DbService;
use serde_json::Value;
use services::services::{
    mailer::RecordingMailer,
    renderer::TemplateEngine,
    worker::{QueueWorker, WorkerConfig},
};
use tower::ServiceExt;

use crate::{AppState, config::Config, http};

/// Everything a router test needs: the app over an in-memory database, the
/// recording mailer behind it, and a worker that can be ticked by hand.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    pub worker: QueueWorker,
}

pub async fn spawn_app() -> TestApp {
    let db = DbService::new_in_memory().await.unwrap();
    let mailer = Arc::new(RecordingMailer::new());
    let renderer = Arc::new(TemplateEngine::new());
    let config = Config::default();

    let worker = QueueWorker::new(
        db.clone(),
        mailer.clone(),
        renderer.clone(),
        WorkerConfig {
            // Large enough that the per-tick quota stays positive even for
            // the microsecond deltas between back-to-back test ticks.
            base_hourly_rate: 1e12,
            send_retry_backoff_base_ms: 0,
            ..Default::default()
        },
    );

    let state = AppState::new(db, config, mailer.clone(), renderer);
    let router = http::router(state.clone());
    TestApp {
        router,
        state,
        mailer,
        worker,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        key: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some((name, value)) = key {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(match body {
                Some(value) => Body::from(value.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        TestResponse { status, body }
    }

    /// Creates a project through the bootstrap endpoint and returns
    /// `(project_id, server_key, admin_key)`.
    pub async fn create_project(&self, name: &str) -> (String, String, String) {
        let response = self
            .request(
                "POST",
                "/api/v1/projects",
                None,
                Some(serde_json::json!({ "name": name })),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        let data = &response.body["data"];
        (
            data["id"].as_str().unwrap().to_string(),
            data["server_key"].as_str().unwrap().to_string(),
            data["admin_key"].as_str().unwrap().to_string(),
        )
    }

    pub async fn create_user(&self, server_key: &str, primary_email: Option<&str>) -> String {
        let response = self
            .request(
                "POST",
                "/api/v1/users",
                Some(("x-mailroom-server-key", server_key)),
                Some(serde_json::json!({ "primary_email": primary_email })),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        response.body["data"]["id"].as_str().unwrap().to_string()
    }
}
