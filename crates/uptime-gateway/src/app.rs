use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uptime_core::UptimeConfig;
use uptime_scheduler::{Pacemaker, SchedulerEngine};

use crate::http;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: UptimeConfig,
    pub engine: Arc<SchedulerEngine>,
    /// Present only with the store trigger; backs `/ping/poll`.
    pub pacemaker: Option<Pacemaker>,
}

impl AppState {
    pub fn new(
        config: UptimeConfig,
        engine: Arc<SchedulerEngine>,
        pacemaker: Option<Pacemaker>,
    ) -> Self {
        Self {
            config,
            engine,
            pacemaker,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/ping", post(http::ping::ping_handler))
        .route("/ping/poll", post(http::ping::poll_handler))
        .route("/scheduler/status", get(http::scheduler::status_handler))
        .route("/scheduler/cancel", post(http::scheduler::cancel_handler))
        .route(
            "/jobs",
            get(http::jobs::list_jobs).post(http::jobs::create_job),
        )
        .route(
            "/jobs/{id}",
            get(http::jobs::get_job)
                .delete(http::jobs::delete_job)
                .patch(http::jobs::apply_action),
        )
        .route("/jobs/{id}/start", post(http::jobs::start_job))
        .route("/jobs/{id}/stop", post(http::jobs::stop_job))
        .route("/history/{service}", get(http::history::history_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uptime_core::{HealthResult, ServiceTarget};
    use uptime_probe::{HealthCheck, ProbeError};
    use uptime_scheduler::StoreTrigger;
    use uptime_store::{MemoryHistory, MemoryStore};

    struct AlwaysUp;

    #[async_trait]
    impl HealthCheck for AlwaysUp {
        fn name(&self) -> &str {
            "always-up"
        }

        async fn check(&self, target: &ServiceTarget) -> Result<HealthResult, ProbeError> {
            Ok(HealthResult::up(&target.name, 3, Some(200)))
        }
    }

    fn router() -> Router {
        let config = UptimeConfig::default();
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(StoreTrigger::new(store.clone()));
        let engine = Arc::new(
            SchedulerEngine::new(
                store,
                Arc::new(MemoryHistory::new(config.history.retention())),
                Arc::new(AlwaysUp),
                trigger.clone(),
                config.scheduler.clone(),
            )
            .unwrap(),
        );
        let pacemaker = Pacemaker::new(engine.clone(), trigger, Duration::from_secs(5));
        build_router(Arc::new(AppState::new(config, engine, Some(pacemaker))))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn api_job() -> Value {
        json!({
            "name": "api",
            "kind": {"type": "service_check", "service": {"name": "api", "url": "http://api.internal/health"}},
            "schedule": {"kind": "interval", "every_secs": 30}
        })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = router();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["trigger"], "store");
    }

    #[tokio::test]
    async fn ping_runs_cycle_and_records_history() {
        let app = router();
        let (status, _) = call(&app, "POST", "/jobs", Some(api_job())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(&app, "POST", "/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "completed");
        assert_eq!(body["report"]["succeeded"], 1);

        let (status, body) = call(&app, "GET", "/history/api?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["status"], "up");

        let (_, status_body) = call(&app, "GET", "/scheduler/status", None).await;
        assert!(status_body["nextTriggerAt"].is_string());
        assert!(status_body["lastPingTimestamp"].is_string());
        assert_eq!(status_body["activeCycles"], 0);
    }

    #[tokio::test]
    async fn cancel_supersedes_continuations() {
        let app = router();
        let (status, body) = call(&app, "POST", "/scheduler/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["epoch"], 1);

        let (_, body) = call(&app, "POST", "/ping?epoch=0", None).await;
        assert_eq!(body["outcome"], "superseded");

        let (_, status_body) = call(&app, "GET", "/scheduler/status", None).await;
        assert_eq!(status_body["cancelEpoch"], 1);
        assert!(status_body["lastCancelTimestamp"].is_string());
        assert!(status_body["nextTriggerAt"].is_null());
    }

    #[tokio::test]
    async fn poll_is_idle_until_armed_trigger_is_due() {
        let app = router();
        let (status, body) = call(&app, "POST", "/ping/poll", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fired"], false);

        // A completed cycle arms the next one a minute out.
        call(&app, "POST", "/ping", None).await;
        let (_, body) = call(&app, "POST", "/ping/poll", None).await;
        assert_eq!(body["fired"], false);
    }

    #[tokio::test]
    async fn job_actions_follow_tagged_contract() {
        let app = router();
        let (_, job) = call(&app, "POST", "/jobs", Some(api_job())).await;
        let id = job["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "PATCH",
            &format!("/jobs/{id}"),
            Some(json!({"action": "update", "name": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("name"));

        let (status, body) = call(
            &app,
            "PATCH",
            &format!("/jobs/{id}"),
            Some(json!({"action": "stop"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["name"], "api");

        let (status, body) = call(&app, "POST", &format!("/jobs/{id}/start"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], true);

        let (status, _) = call(
            &app,
            "PATCH",
            &format!("/jobs/{id}"),
            Some(json!({"action": "explode"})),
        )
        .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn missing_jobs_are_not_found() {
        let app = router();
        for (method, uri, body) in [
            ("GET", "/jobs/nope", None),
            ("DELETE", "/jobs/nope", None),
            ("POST", "/jobs/nope/stop", None),
            ("PATCH", "/jobs/nope", Some(json!({"action": "start"}))),
        ] {
            let (status, _) = call(&app, method, uri, body).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn invalid_schedule_is_rejected() {
        let app = router();
        let mut spec = api_job();
        spec["schedule"] = json!({"kind": "cron", "expression": "whenever"});
        let (status, _) = call(&app, "POST", "/jobs", Some(spec)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, list) = call(&app, "GET", "/jobs", None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_job() {
        let app = router();
        let (_, job) = call(&app, "POST", "/jobs", Some(api_job())).await;
        let id = job["id"].as_str().unwrap().to_string();
        let (status, _) = call(&app, "DELETE", &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
