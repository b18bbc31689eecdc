//! Shared fixtures for tests that drive the blocking client against wiremock.
#![allow(dead_code)]

use serde_json::{Value, json};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use visual_layer::{Client, ClientConfig, Dataset, Environment};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DATASET: &str = "d1";

pub fn api(path_suffix: &str) -> String {
    format!("/api/v1{path_suffix}")
}

/// Must be called from a blocking context (inside `spawn_blocking`).
pub fn client(server_uri: &str) -> Client {
    Client::with_config(ClientConfig {
        key: "test_key".into(),
        secret: "test_secret".into(),
        environment: Environment::Production,
    })
    .expect("client")
    .with_base_url(format!("{server_uri}/api/v1"))
    .with_retry_max(1)
    .with_retry_sleep(Duration::ZERO)
    .with_timeout(Duration::from_secs(5))
    .with_progress(false)
}

/// Opens `DATASET` with a fast poll interval. Blocking.
pub fn dataset(server_uri: &str) -> Dataset {
    client(server_uri)
        .dataset(DATASET)
        .expect("dataset")
        .with_poll_interval(Duration::from_millis(20))
        .with_timeout(Duration::from_secs(5))
}

pub async fn mount_dataset(server: &MockServer, status: &str) {
    Mock::given(method("GET"))
        .and(path(api(&format!("/dataset/{DATASET}"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": DATASET,
            "display_name": "pets",
            "status": status,
            "n_images": 3,
            "internal_field": "ignored"
        })))
        .mount(server)
        .await;
}

pub async fn mount_features(server: &MockServer, enabled: bool) {
    Mock::given(method("GET"))
        .and(path(api("/user_config")))
        .and(query_param("dataset_id", DATASET))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "features": [{
                "feature_key": "TEXTUAL_SEARCH_IMAGE",
                "feature_options": {
                    "labels_search": enabled,
                    "captions_search": enabled,
                    "semantic_search": enabled
                }
            }]
        })))
        .mount(server)
        .await;
}

/// An exported media item with one image label per entry of `labels`.
pub fn item(media_id: &str, labels: &[&str]) -> Value {
    let metadata: Vec<Value> = labels
        .iter()
        .map(|l| {
            json!({"type": "image_label", "properties": {"category_name": l, "source": "user"}})
        })
        .collect();
    json!({
        "media_id": media_id,
        "media_uri": format!("s3://bucket/{media_id}.jpg"),
        "file_name": format!("{media_id}.jpg"),
        "metadata_items": metadata
    })
}

pub fn export_body(items: Vec<Value>) -> Value {
    json!({ "media_items": items })
}

/// Serves `body` at `/downloads/{name}` and returns its absolute URI.
pub async fn mount_download(server: &MockServer, name: &str, body: Value) -> String {
    Mock::given(method("GET"))
        .and(path(format!("/downloads/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
    format!("{}/downloads/{name}", server.uri())
}

pub async fn requests_to(server: &MockServer, request_path: &str) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == request_path)
        .collect()
}

/// In-memory log sink for an injected dispatcher.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn dispatch(&self) -> tracing::Dispatch {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
