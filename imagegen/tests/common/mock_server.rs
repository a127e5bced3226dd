use imagegen::types::{Credential, Session, UserProfile};
use imagegen::{ApiClient, MemorySessionStore, SessionStore};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const TEST_TOKEN: &str = "tok123";

#[derive(Deserialize)]
pub struct Fixture {
    pub request: FixtureRequest,
    pub response: FixtureResponse,
}

#[derive(Deserialize)]
pub struct FixtureRequest {
    pub method: String,
    pub path_pattern: String,
}

#[derive(Deserialize)]
pub struct FixtureResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

pub struct ImageGenMock {
    pub server: MockServer,
}

impl ImageGenMock {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    pub fn load_fixture(fixture_path: &str) -> Fixture {
        let full_path = Self::fixtures_dir().join(fixture_path);

        let content = fs::read_to_string(&full_path)
            .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", full_path.display(), e));

        serde_json::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse fixture {}: {}", full_path.display(), e))
    }

    pub async fn mount_fixture(&self, fixture_path: &str) {
        let fixture = Self::load_fixture(fixture_path);

        let mut template = ResponseTemplate::new(fixture.response.status_code)
            .set_body_json(&fixture.response.body);
        if let Some(delay) = fixture.response.delay_ms {
            template = template.set_delay(Duration::from_millis(delay));
        }

        Mock::given(method(fixture.request.method.as_str()))
            .and(path_regex(&fixture.request.path_pattern))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Client with no stored session.
    pub fn client(&self) -> ApiClient {
        self.client_with_store(Arc::new(MemorySessionStore::new()))
    }

    pub fn client_with_store(&self, store: Arc<dyn SessionStore>) -> ApiClient {
        ApiClient::new(store).with_base_url(format!("{}/api/", self.server.uri()))
    }

    /// Client whose store already holds alice's session; the store is
    /// returned too so tests can inspect it.
    pub fn signed_in_client(&self) -> (Arc<ApiClient>, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::with_session(alice_session()));
        let client = self.client_with_store(store.clone());
        (Arc::new(client), store)
    }

    pub async fn received(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}

pub fn alice() -> UserProfile {
    UserProfile {
        id: 1,
        username: "alice".to_string(),
        email: "a@b.com".to_string(),
        created_at: None,
        last_login: None,
    }
}

pub fn alice_session() -> Session {
    Session::new(Credential::new(TEST_TOKEN), alice())
}

pub fn authorization(request: &Request) -> Option<String> {
    request
        .headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
