//! HTTP server for the Prometheus metrics and status endpoints.

use crate::metrics::MetricsRegistry;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use healthmon::{CheckType, HostStatus, Reason, StateManager, TimeStamp};
use prometheus_client::encoding::text::encode;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state of the HTTP handlers
#[derive(Clone)]
struct AppState {
    registry: Arc<MetricsRegistry>,
    manager: Arc<StateManager>,
}

/// One check entry in the `/status` response
#[derive(Debug, Clone, Serialize)]
pub struct CheckStatus {
    pub hostname: String,
    pub check_type: CheckType,
    pub port: u16,
    pub check_info: String,
    pub host_groups: Vec<String>,
    pub results: Vec<AddressStatus>,
}

/// Result of one address of a check
#[derive(Debug, Clone, Serialize)]
pub struct AddressStatus {
    pub address: String,
    pub status: HostStatus,
    pub hard: bool,
    pub soft: bool,
    pub reason: Reason,
    pub response_time_ms: u64,
    pub check_time: TimeStamp,
}

/// HTTP server for `/metrics` and `/status`
pub struct HttpServer {
    registry: Arc<MetricsRegistry>,
    manager: Arc<StateManager>,
    listen_addr: String,
}

impl HttpServer {
    pub fn new(registry: Arc<MetricsRegistry>, manager: Arc<StateManager>, listen_addr: String) -> Self {
        Self {
            registry,
            manager,
            listen_addr,
        }
    }

    /// Routes served by this server
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/status", get(status_handler))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(AppState {
                registry: self.registry.clone(),
                manager: self.manager.clone(),
            })
    }

    /// Run the HTTP server
    pub async fn run(self) -> std::io::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(listen_addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, app).await
    }
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(app): State<AppState>) -> Response {
    app.registry.update_engine(&app.manager.stats());

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &app.registry.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

/// Handler for /status endpoint
async fn status_handler(State(app): State<AppState>) -> Json<Vec<CheckStatus>> {
    Json(collect_status(&app.manager))
}

/// Snapshot every check of the running generation
pub fn collect_status(manager: &StateManager) -> Vec<CheckStatus> {
    let state = manager.current();
    state
        .check_list
        .all_checks()
        .into_iter()
        .map(|header| {
            let results = state
                .check_list
                .check_results(&header)
                .into_iter()
                .map(|r| AddressStatus {
                    address: r.address.to_string(),
                    status: r.host_status(),
                    hard: r.status.hard,
                    soft: r.status.soft,
                    reason: r.reason,
                    response_time_ms: r.response_time,
                    check_time: r.check_time,
                })
                .collect();
            CheckStatus {
                host_groups: state.check_list.host_groups(&header).unwrap_or_default(),
                hostname: header.hostname,
                check_type: header.check.check_type,
                port: header.check.port,
                check_info: header.check.check_info,
                results,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use healthmon::settings::ConfigLoader;
    use healthmon::types::StatusBits;
    use healthmon::{
        CheckResult, DaemonConfig, HostGroup, MemoryStorage, PluginSet, Services, StorageBackend, StoredCheck,
    };
    use tower::ServiceExt;

    struct Fixed(DaemonConfig);

    impl ConfigLoader for Fixed {
        fn load(&self) -> common::Result<DaemonConfig> {
            Ok(self.0.clone())
        }
    }

    fn web_group() -> HostGroup {
        HostGroup::new("web")
            .with_check(CheckType::Http, 0, "/health")
            .with_hosts(["web1"])
    }

    fn server() -> HttpServer {
        let group = web_group();
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        backend
            .store_check_result(&StoredCheck {
                hostname: "web1".to_string(),
                check: group.host_check(),
                settings: group.check_settings(),
                host_groups: vec!["web".to_string()],
                result: CheckResult {
                    address: "192.0.2.10".parse().unwrap(),
                    reason: Reason::Success,
                    response_time: 42,
                    check_time: TimeStamp::now(),
                    status: StatusBits {
                        hard: true,
                        soft: true,
                        flap: true,
                    },
                    ..CheckResult::default()
                },
            })
            .unwrap();

        let mut config = DaemonConfig::default();
        config.host_groups.insert(group.name.clone(), group);
        let services = Services {
            backend: Some(backend),
            plugins: Some(PluginSet::new()),
            ..Services::default()
        };
        let manager = StateManager::load_daemon_state(Arc::new(Fixed(config)), services).unwrap();
        let registry = Arc::new(MetricsRegistry::new(&[0.01, 0.1, 1.0], &[1.0, 10.0, 100.0]));
        HttpServer::new(registry, Arc::new(manager), "127.0.0.1:0".to_string())
    }

    async fn get_body(server: &HttpServer, uri: &str) -> (StatusCode, String) {
        let response = server
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = server();
        server.registry.record_check(CheckType::Http, Reason::Success, std::time::Duration::from_millis(5));

        let (status, body) = get_body(&server, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"healthmon_checks_total{check_type="http",reason="SUCCESS"} 1"#));
        assert!(body.contains("healthmon_config_version 1"));
        assert!(body.contains("healthmon_worker_threads 0"));
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let server = server();

        let (status, body) = get_body(&server, "/status").await;
        assert_eq!(status, StatusCode::OK);

        let checks: serde_json::Value = serde_json::from_str(&body).unwrap();
        let checks = checks.as_array().unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0]["hostname"], "web1");
        assert_eq!(checks[0]["port"], 80);
        assert_eq!(checks[0]["host_groups"][0], "web");

        let results = checks[0]["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["address"], "192.0.2.10");
        assert_eq!(results[0]["status"], "Up");
        assert_eq!(results[0]["response_time_ms"], 42);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let server = server();
        let (status, _) = get_body(&server, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
