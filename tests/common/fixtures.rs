//! Mock skin server and harvester builders

use skin_dl::{Config, Harvester, RetryConfig};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A texture served by the mock server
#[derive(Debug, Clone)]
pub struct Texture {
    pub id: u64,
    pub name: String,
    pub kind: String,
    pub hash: String,
    pub body: Vec<u8>,
}

impl Texture {
    /// Texture with a unique hash and body derived from its ID
    pub fn new(id: u64, name: &str, kind: &str) -> Self {
        let mut body = b"\x89PNG\r\n\x1a\n".to_vec();
        body.extend_from_slice(format!("texture #{id} ({kind})").as_bytes());
        Self {
            id,
            name: name.to_string(),
            kind: kind.to_string(),
            hash: format!("{:064x}", id * 0x9e37_79b9),
            body,
        }
    }

    /// File name the harvester derives for this texture
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.png", self.name, self.kind, self.id)
    }
}

/// Serve metadata and body for `texture`
pub async fn mount_texture(server: &MockServer, texture: &Texture) {
    Mock::given(method("GET"))
        .and(path(format!("/texture/{}", texture.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tid": texture.id,
            "name": texture.name,
            "type": texture.kind,
            "hash": texture.hash,
            "size": 1,
            "uploader": 1,
            "public": true,
            "likes": 0
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/textures/{}", texture.hash)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(texture.body.clone()),
        )
        .mount(server)
        .await;
}

/// Answer metadata requests for `id` with `status`
pub async fn mount_status(server: &MockServer, id: u64, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/texture/{}", id)))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Fast test configuration pointed at `server`, writing into `dir`
pub fn test_config(server: &MockServer, dir: &TempDir, workers: usize) -> Config {
    let mut config = Config {
        output_dir: dir.path().join("imgs"),
        workers,
        request_delay: Duration::ZERO,
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 1.0,
            jitter: false,
        },
        progress_interval: Duration::from_millis(50),
        ..Config::default()
    };
    config.api.base_url = server.uri();
    config.api.request_timeout = Duration::from_secs(5);
    config.api.asset_timeout = Duration::from_secs(5);
    config
}

/// Harvester against `server` with a fresh temporary output directory
pub fn create_test_harvester(server: &MockServer, workers: usize) -> (Harvester, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(server, &dir, workers);
    let harvester = Harvester::new(config).expect("Failed to create harvester");
    (harvester, dir)
}
