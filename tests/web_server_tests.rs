mod test_helpers;

use std::net::SocketAddr;
use std::sync::Arc;

use sketchgan::image_io;
use sketchgan::web_server::{HealthResponse, ModelsResponse, ServerConfig, WebServer};
use sketchgan::{ModelRegistry, SketchPipeline};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use test_helpers::{fixture_config, gray_png, sketch_png};

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<sketchgan::Result<()>>,
    _dir: TempDir,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let file = fixture_config(dir.path());
        let registry = ModelRegistry::load(&file.models, &file.base_dir()).unwrap();
        let pipeline = SketchPipeline::with_defaults(Arc::new(registry));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let server = WebServer::new(config, pipeline, None);
        let handle = tokio::spawn(server.serve_on(listener, async {
            let _ = rx.await;
        }));

        TestServer {
            addr,
            shutdown: Some(tx),
            handle,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

#[test]
fn test_server_config_default() {
    let config = ServerConfig::default();

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 5000);
    assert_eq!(config.max_body_size, 50 * 1024 * 1024);
    assert_eq!(config.max_concurrent_requests, 4);
    assert!(config.cors_enabled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_models_lists_keys_in_order() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = reqwest::get(server.url("/models")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: ModelsResponse = response.json().await.unwrap();
    assert_eq!(body.available_models, vec!["unit01", "sym_11"]);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_process_returns_png_of_original_size() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    for path in &["/process", "/compare"] {
        let response = client
            .post(server.url(path))
            .query(&[("model_id", "sym_11"), ("postprocess_value", "2")])
            .body(sketch_png(30, 18))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "image/png");
        assert!(response.headers().contains_key("x-request-id"));

        let bytes = response.bytes().await.unwrap();
        let image = image_io::decode_grayscale(&bytes).unwrap();
        assert_eq!(image.dimensions(), (30, 18));
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_postprocess_value_defaults_to_zero() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = reqwest::Client::new()
        .post(server.url("/process?model_id=unit01"))
        .body(gray_png(16, 16, 255))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_model_is_500_with_message() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = reqwest::Client::new()
        .post(server.url("/process?model_id=wgan02"))
        .body(gray_png(16, 16, 255))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Error: Model key 'wgan02' not found.");

    let response = reqwest::Client::new()
        .post(server.url("/process"))
        .body(gray_png(16, 16, 255))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Error: Model key 'None' not found.");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_requests_are_500() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/process?model_id=unit01&postprocess_value=lots"))
        .body(gray_png(16, 16, 255))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert!(response.text().await.unwrap().starts_with("Error: "));

    let response = client
        .post(server.url("/process?model_id=unit01"))
        .body("plain text")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let response = client
        .post(server.url("/process?model_id=unit01"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeated_query_keys_use_first_value() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/process?model_id=unit01&model_id=sym_11&postprocess_value=1"))
        .body(sketch_png(20, 12))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let bytes = response.bytes().await.unwrap();
    assert_eq!(image_io::decode_grayscale(&bytes).unwrap().dimensions(), (20, 12));

    let response = client
        .post(server.url("/process?model_id=wgan02&model_id=unit01"))
        .body(sketch_png(20, 12))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Error: Model key 'wgan02' not found.");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_body_limit_is_enforced() {
    let config = ServerConfig {
        max_body_size: 64,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;

    let response = reqwest::Client::new()
        .post(server.url("/process?model_id=unit01"))
        .body(vec![0u8; 4096])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_and_cors() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = reqwest::get(server.url("/api/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let health: HealthResponse = response.json().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.models, 2);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cors_can_be_disabled_and_metrics_need_telemetry() {
    let config = ServerConfig {
        cors_enabled: false,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;

    let response = reqwest::get(server.url("/models")).await.unwrap();
    assert!(!response.headers().contains_key("access-control-allow-origin"));

    let response = reqwest::get(server.url("/metrics")).await.unwrap();
    assert_eq!(response.status(), 404);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_all_succeed() {
    let config = ServerConfig {
        max_concurrent_requests: 1,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;
    let client = reqwest::Client::new();

    let requests = (0..4).map(|i| {
        let client = client.clone();
        let url = server.url("/process");
        async move {
            client
                .post(url)
                .query(&[("model_id", if i % 2 == 0 { "unit01" } else { "sym_11" })])
                .body(sketch_png(16, 16))
                .send()
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = futures_join_all(requests).await;
    assert!(statuses.iter().all(|s| *s == 200));

    server.stop().await;
}

async fn futures_join_all<F, T>(futures: impl Iterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = futures.map(tokio::spawn).collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}
