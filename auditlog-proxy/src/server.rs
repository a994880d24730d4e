//! Webhook server: plaintext and TLS listeners with graceful shutdown

use axum::{
    extract::{Request, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use http::{Method, StatusCode};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::WebhookConfig,
    error::Result,
    health::{healthz, HEALTHZ_PATH},
    middleware::{request_id_layer, request_id_propagation_layer, sensitive_headers_layer},
    sink::Sink,
    tls::{load_server_config, TlsListener},
};

/// Build the webhook router
///
/// `GET /healthz` answers 200; a POST to any other path is an event list
/// delivery; everything else, `HEAD /healthz` included, is 404.
pub fn router(sink: Sink) -> Router {
    Router::new()
        .route(HEALTHZ_PATH, get(healthz).head(not_found).fallback(not_found))
        .fallback(ingest)
        .with_state(sink)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(sensitive_headers_layer())
        .layer(request_id_propagation_layer())
        .layer(request_id_layer())
        .layer(CatchPanicLayer::new())
}

async fn ingest(State(sink): State<Sink>, request: Request) -> Response {
    if request.method() != Method::POST {
        return not_found().await.into_response();
    }

    match sink.handle(request.into_body()).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Server instance
pub struct Server {
    config: WebhookConfig,
    sink: Sink,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: WebhookConfig, sink: Sink) -> Self {
        Self { config, sink }
    }

    /// Get the configuration
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Bind the configured ports on all interfaces
    pub async fn bind(self) -> Result<BoundServer> {
        let http = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let https = self
            .config
            .tls_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.config.https_port)));
        self.bind_to(http, https).await
    }

    /// Bind explicit addresses
    ///
    /// TLS material is loaded before anything is bound, so a broken
    /// certificate never leaves a plaintext-only proxy running.
    pub async fn bind_to(
        self,
        http_addr: SocketAddr,
        https_addr: Option<SocketAddr>,
    ) -> Result<BoundServer> {
        let tls = match https_addr {
            Some(_) => Some(load_server_config(&self.config.tls)?),
            None => None,
        };

        let http = TcpListener::bind(http_addr).await?;
        let http_addr = http.local_addr()?;

        let https = match (https_addr, tls) {
            (Some(addr), Some(tls)) => {
                let tcp = TcpListener::bind(addr).await?;
                let addr = tcp.local_addr()?;
                Some((TlsListener::new(tcp, tls), addr))
            }
            _ => None,
        };

        Ok(BoundServer {
            router: router(self.sink),
            http,
            http_addr,
            https,
            grace: self.config.shutdown_grace(),
        })
    }

    /// Bind and serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.bind().await?.serve(shutdown).await;
        Ok(())
    }
}

/// Server with bound listeners, ready to serve
pub struct BoundServer {
    router: Router,
    http: TcpListener,
    http_addr: SocketAddr,
    https: Option<(TlsListener, SocketAddr)>,
    grace: Duration,
}

impl BoundServer {
    /// Address of the plaintext listener
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Address of the TLS listener, if enabled
    pub fn https_addr(&self) -> Option<SocketAddr> {
        self.https.as_ref().map(|(_, addr)| *addr)
    }

    /// Serve both listeners until `shutdown` is cancelled
    ///
    /// Once cancelled, in-flight requests get one shared grace period across
    /// both listeners; servers still busy at the deadline are aborted.
    pub async fn serve(self, shutdown: CancellationToken) {
        let mut servers = Vec::with_capacity(2);

        tracing::info!(addr = %self.http_addr, "Starting webhook HTTP server");
        servers.push((
            "http",
            tokio::spawn(
                axum::serve(self.http, self.router.clone())
                    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                    .into_future(),
            ),
        ));

        if let Some((listener, addr)) = self.https {
            tracing::info!(addr = %addr, "Starting webhook HTTPS server");
            servers.push((
                "https",
                tokio::spawn(
                    axum::serve(listener, self.router)
                        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                        .into_future(),
                ),
            ));
        }

        shutdown.cancelled().await;
        tracing::info!(grace_secs = self.grace.as_secs_f64(), "Draining webhook servers");

        let deadline = tokio::time::Instant::now() + self.grace;
        for (listener, mut handle) in servers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => tracing::info!(listener, "Webhook server stopped"),
                Ok(Ok(Err(e))) => {
                    tracing::error!(listener, error = %e, "Webhook server failed")
                }
                Ok(Err(e)) => {
                    tracing::error!(listener, error = %e, "Webhook server task failed")
                }
                Err(_) => {
                    tracing::warn!(listener, "Grace period elapsed, aborting in-flight requests");
                    handle.abort();
                }
            }
        }

        tracing::info!("HTTP(S) servers stopped");
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditDecoder, EventList};
    use crate::certificate::{generate_rsa_certificate, ORGANIZATION};
    use crate::config::TlsConfig;
    use crate::error::{ErrorResponse, ProviderError};
    use crate::provider::{Provider, ProviderSetup, Registry};
    use async_trait::async_trait;
    use axum::body::Body;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Notify;
    use tower::ServiceExt;
    use tracing_test::traced_test;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn log(&self, _events: EventList) -> std::result::Result<(), ProviderError> {
            Err(ProviderError::Status {
                url: "http://internal-es:9200/_bulk".to_string(),
                status: 503,
            })
        }
    }

    struct SlowProvider {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn log(&self, _events: EventList) -> std::result::Result<(), ProviderError> {
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn one_event() -> String {
        json!({
            "apiVersion": "audit.k8s.io/v1",
            "kind": "EventList",
            "metadata": {},
            "items": [{
                "level": "RequestResponse",
                "auditID": "6b6a2a4c-1c1f-4a5e-9b2e-1f0e3c7d9a10",
                "stage": "ResponseComplete",
                "requestURI": "/apis/apps/v1/namespaces/kube-system/deployments/coredns",
                "verb": "patch",
                "user": {"username": "alice", "groups": ["system:masters"]},
                "objectRef": {
                    "resource": "deployments",
                    "namespace": "kube-system",
                    "name": "coredns",
                    "apiGroup": "apps",
                    "apiVersion": "v1"
                },
                "responseStatus": {"code": 200},
                "requestObject": {"spec": {"replicas": 3}},
                "requestReceivedTimestamp": "2024-05-01T10:00:00.000000Z",
                "stageTimestamp": "2024-05-01T10:00:00.120000Z"
            }]
        })
        .to_string()
    }

    fn sink_for(provider: &str, provider_config: &[u8]) -> Sink {
        let registry = Registry::with_builtin_providers().expect("registry");
        let provider = registry
            .build(provider, ProviderSetup::new(provider_config))
            .expect("provider");
        Sink::with_provider(provider, AuditDecoder::audit(), 1024 * 1024)
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request {
        http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.into())
            .expect("request")
    }

    fn get_request(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn body_bytes(response: Response) -> axum::body::Bytes {
        axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body")
    }

    #[tokio::test]
    async fn test_routing() {
        let app = router(sink_for("standard", b""));

        let response = app.clone().oneshot(get_request("/healthz")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(body_bytes(response).await.is_empty());

        let response = app.clone().oneshot(post("/healthz", one_event())).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.clone().oneshot(get_request("/audit")).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let head = http::Request::builder()
            .method(Method::HEAD)
            .uri("/healthz")
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(head).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        for uri in ["/", "/audit", "/some/nested/path"] {
            let response = app.clone().oneshot(post(uri, one_event())).await.expect("response");
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
            assert!(body_bytes(response).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = router(sink_for("standard", b""));

        let response = app.clone().oneshot(post("/", "{not json")).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse =
            serde_json::from_slice(&body_bytes(response).await).expect("error body");
        assert_eq!(error.code.as_deref(), Some("DECODE_ERROR"));

        let wrong_kind = json!({"apiVersion": "audit.k8s.io/v1", "kind": "Policy"}).to_string();
        let response = app.oneshot(post("/", wrong_kind)).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_body_is_bad_request() {
        let sink = Sink::with_provider(
            Arc::new(crate::provider::StandardProvider::new()),
            AuditDecoder::audit(),
            64,
        );
        let response = router(sink)
            .oneshot(post("/", one_event()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse =
            serde_json::from_slice(&body_bytes(response).await).expect("error body");
        assert_eq!(error.code.as_deref(), Some("READ_ERROR"));
    }

    #[tokio::test]
    async fn test_provider_failure_is_internal_error_without_detail() {
        let sink = Sink::with_provider(Arc::new(FailingProvider), AuditDecoder::audit(), 1024 * 1024);
        let response = router(sink)
            .oneshot(post("/", one_event()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_bytes(response).await;
        let error: ErrorResponse = serde_json::from_slice(&body).expect("error body");
        assert_eq!(error.code.as_deref(), Some("FORWARD_ERROR"));
        assert!(!String::from_utf8_lossy(&body).contains("internal-es"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_standard_provider_end_to_end() {
        let response = router(sink_for("standard", b""))
            .oneshot(post("/", one_event()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        logs_assert(|lines: &[&str]| {
            let records: Vec<_> = lines
                .iter()
                .filter(|line| line.contains("apps/v1 - coredns/kube-system"))
                .collect();
            match records.as_slice() {
                [record] if record.contains("user=alice") && record.contains("RequestResponse") => {
                    Ok(())
                }
                other => Err(format!("expected exactly one event record, got {:?}", other)),
            }
        });
    }

    #[traced_test]
    #[tokio::test]
    async fn test_elasticsearch_partial_failure_end_to_end() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [{"index": {"status": 409, "error": "conflict"}}]
            })))
            .expect(1)
            .mount(&backend)
            .await;

        let config = format!("endpoint: {}\nusername: u\npassword: p\n", backend.uri());
        let response = router(sink_for("elasticsearch", config.as_bytes()))
            .oneshot(post("/", one_event()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(logs_contain("Unable to log event list"));
        assert!(logs_contain("failed with status 409: conflict"));
    }

    #[tokio::test]
    async fn test_missing_tls_material_fails_bind() {
        let mut config = WebhookConfig::default();
        config.tls = TlsConfig {
            cert_file: "/nonexistent/tls.crt".into(),
            key_file: "/nonexistent/tls.key".into(),
        };
        let server = Server::new(config, sink_for("standard", b""));
        let localhost = SocketAddr::from(([127, 0, 0, 1], 0));

        let result = server.bind_to(localhost, Some(localhost)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serves_both_listeners_and_shuts_down() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cert_file = dir.path().join("tls.crt");
        let key_file = dir.path().join("tls.key");
        let certificate = generate_rsa_certificate(
            2048,
            ORGANIZATION,
            &["localhost".to_string(), "127.0.0.1".to_string()],
            chrono::Utc::now() + chrono::Duration::days(1),
        )
        .expect("certificate");
        certificate.write(&cert_file, &key_file).expect("write");

        let mut config = WebhookConfig::default();
        config.tls = TlsConfig { cert_file, key_file };
        config.shutdown_grace_secs = 1;

        let localhost = SocketAddr::from(([127, 0, 0, 1], 0));
        let bound = Server::new(config, sink_for("standard", b""))
            .bind_to(localhost, Some(localhost))
            .await
            .expect("bind");
        let http_port = bound.http_addr().port();
        let https_port = bound.https_addr().expect("https").port();

        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(bound.serve(shutdown.clone()));

        let client = reqwest::Client::builder()
            .add_root_certificate(
                reqwest::Certificate::from_pem(certificate.cert_pem.as_bytes()).expect("root"),
            )
            .resolve("localhost", SocketAddr::from(([127, 0, 0, 1], https_port)))
            .build()
            .expect("client");

        let response = client
            .get(format!("http://127.0.0.1:{}/healthz", http_port))
            .send()
            .await
            .expect("http request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let response = client
            .post(format!("https://localhost:{}/", https_port))
            .body(one_event())
            .send()
            .await
            .expect("https request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        drop(client);
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("shutdown within grace")
            .expect("serve task");
    }

    #[tokio::test]
    async fn test_in_flight_request_aborted_at_grace_deadline() {
        let entered = Arc::new(Notify::new());
        let sink = Sink::with_provider(
            Arc::new(SlowProvider {
                entered: entered.clone(),
            }),
            AuditDecoder::audit(),
            1024 * 1024,
        );

        let mut config = WebhookConfig::default();
        config.shutdown_grace_secs = 1;

        let localhost = SocketAddr::from(([127, 0, 0, 1], 0));
        let bound = Server::new(config, sink)
            .bind_to(localhost, None)
            .await
            .expect("bind");
        let http_port = bound.http_addr().port();

        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(bound.serve(shutdown.clone()));

        let request = tokio::spawn(async move {
            reqwest::Client::new()
                .post(format!("http://127.0.0.1:{}/", http_port))
                .body(one_event())
                .send()
                .await
        });

        tokio::time::timeout(Duration::from_secs(5), entered.notified())
            .await
            .expect("request reached provider");

        let started = tokio::time::Instant::now();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(4), serving)
            .await
            .expect("serve returns shortly after the grace deadline")
            .expect("serve task");

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "{:?}", elapsed);
        assert!(!request.is_finished());

        request.abort();
    }
}
