pub mod favorites;
pub mod generation;
pub mod profile;
pub mod session;
pub mod types;

pub use crate::favorites::FavoritesController;
pub use crate::generation::{GenerationController, GenerationError, GenerationState};
pub use crate::profile::{ProfileController, ProfileData};
pub use crate::session::{FileSessionStore, MemorySessionStore, SessionError, SessionStore};

use crate::types::{
    Acknowledgement, AuthResponse, Credential, ErrorBody, FavoriteAdded, FavoritePage,
    FavoriteRequest, GenerateRequest, GeneratedImage, ImageId, ImagePage, LoginRequest,
    ProfileResponse, RegisterRequest, Session, Stats, StatsResponse, UserProfile,
};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Default location of the backend's REST surface.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5002/api/";

const AUTHENTICATION_FAILED: &str = "Authentication failed";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A local precondition failed; nothing was sent.
    #[error("{0}")]
    Validation(String),
    /// Login or registration was rejected; carries the server's message.
    #[error("{0}")]
    Authentication(String),
    /// An authenticated call was refused; the session has been cleared.
    #[error("Your session has expired, please sign in again")]
    SessionExpired,
    #[error("server error ({status}): {}", .message.as_deref().unwrap_or("request failed"))]
    Server { status: u16, message: Option<String> },
    /// The request never got a response.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("invalid response body ({status}): {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist session: {0}")]
    Session(#[from] SessionError),
}

impl ApiError {
    /// HTTP status of the failed response, if there was one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::SessionExpired => Some(401),
            Self::Server { status, .. } | Self::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether repeating the same call is safe. Only transport failures are.
    #[must_use]
    pub const fn is_retry_safe(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Text suitable for showing to the user: the server's own message when
    /// it sent one, `fallback` otherwise.
    #[must_use]
    pub fn display_message(&self, fallback: &str) -> String {
        match self {
            Self::Validation(message) | Self::Authentication(message) => message.clone(),
            Self::Server {
                message: Some(message),
                ..
            } => message.clone(),
            Self::SessionExpired => self.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Broadcast to subscribers whenever the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server rejected the credential.
    Expired,
    /// The user signed out explicitly.
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    /// Normal API call: a 401 means the session is gone.
    Authenticated,
    /// Login/register: any rejection is an authentication failure.
    Credentials,
}

impl RequestKind {
    fn for_path(path: &str) -> Self {
        match path.trim_matches('/') {
            "login" | "register" => Self::Credentials,
            _ => Self::Authenticated,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
    /// Identifies the current session instance; bumped on every transition.
    epoch: Mutex<u64>,
    events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    async fn send<T, B, Q>(
        &self,
        kind: RequestKind,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
        query: Option<&Q>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
        Q: Serialize + ?Sized,
    {
        let (credential, epoch) = self.snapshot();
        tracing::debug!(
            %method,
            endpoint,
            authenticated = credential.is_some(),
            "Dispatching request"
        );

        let url = format!("{}{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut request = self.client.request(method, url);
        if let Some(credential) = &credential {
            request = request.bearer_auth(credential.expose());
        }
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ApiError::Network)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(ApiError::Network)?;

        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode {
                status: status.as_u16(),
                source,
            });
        }

        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(|body| body.error)
            .filter(|message| !message.trim().is_empty());
        tracing::debug!(status = status.as_u16(), endpoint, "Request failed");

        if kind == RequestKind::Authenticated
            && status == StatusCode::UNAUTHORIZED
            && credential.is_some()
        {
            self.invalidate(epoch);
        }

        Err(match kind {
            RequestKind::Credentials => {
                ApiError::Authentication(message.unwrap_or_else(|| AUTHENTICATION_FAILED.into()))
            }
            RequestKind::Authenticated if status == StatusCode::UNAUTHORIZED => {
                ApiError::SessionExpired
            }
            RequestKind::Authenticated => ApiError::Server {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn get<T, Q>(&self, endpoint: &str, query: &Q) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.send(
            RequestKind::Authenticated,
            Method::GET,
            endpoint,
            None::<&()>,
            Some(query),
        )
        .await
    }

    async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(
            RequestKind::Authenticated,
            Method::POST,
            endpoint,
            Some(body),
            None::<&()>,
        )
        .await
    }

    async fn delete<T>(&self, endpoint: &str) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        self.send(
            RequestKind::Authenticated,
            Method::DELETE,
            endpoint,
            None::<&()>,
            None::<&()>,
        )
        .await
    }

    /// Reads the credential and the epoch it belongs to as one consistent pair.
    fn snapshot(&self) -> (Option<Credential>, u64) {
        let epoch = lock(&self.epoch);
        let credential = self.store.load().map(|session| session.credential);
        (credential, *epoch)
    }

    /// Ends the session a rejected request was sent under. Only the first
    /// rejection for a given epoch clears the store and notifies subscribers;
    /// later ones, or ones from before a newer login, are ignored.
    fn invalidate(&self, epoch: u64) {
        {
            let mut current = lock(&self.epoch);
            if *current != epoch {
                return;
            }
            *current += 1;
            self.store.clear();
        }
        tracing::warn!("Session rejected by server; credential cleared");
        let _ = self.events.send(SessionEvent::Expired);
    }

    fn begin_session(&self, response: AuthResponse) -> Result<Session, ApiError> {
        let session = Session::new(Credential::new(response.access_token), response.user);
        if !session.credential.is_well_formed() {
            return Err(ApiError::Authentication(AUTHENTICATION_FAILED.into()));
        }
        let mut epoch = lock(&self.epoch);
        self.store.save(&session)?;
        *epoch += 1;
        drop(epoch);
        tracing::info!(user = %session.user.username, "Signed in");
        Ok(session)
    }

    /// Creates a new `ApiClient` reading credentials from `store`.
    /// The base URL defaults to [`DEFAULT_BASE_URL`].
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            store,
            epoch: Mutex::new(0),
            events,
        }
    }

    /// Points the client at another backend, e.g. `http://host:5002/api`.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    /// Replaces the underlying HTTP client (timeouts, proxies, ...).
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Receives a [`SessionEvent`] each time the session ends.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Identifier of the current session instance. Changes on login,
    /// registration, sign-out and expiry, so work started under one session
    /// can tell that it no longer applies.
    #[must_use]
    pub fn session_epoch(&self) -> u64 {
        *lock(&self.epoch)
    }

    /// The stored session, if a user is signed in.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.store.load()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    /// Sends an arbitrary request and returns the decoded JSON body.
    /// Credential handling and error classification are the same as for the
    /// typed endpoint methods: a rejected `login` or `register` call is an
    /// authentication failure and leaves the stored session alone. Unlike
    /// [`ApiClient::login`] it does not store the returned session.
    ///
    /// # Errors
    /// Returns an error if the request fails or the response is not 2xx.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        query: Option<&[(&str, String)]>,
    ) -> Result<serde_json::Value, ApiError> {
        self.send(RequestKind::for_path(path), method, path, body, query)
            .await
    }

    /// Creates an account and signs in as it.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] for blank fields,
    /// [`ApiError::Authentication`] if the server rejects the registration.
    pub async fn register(&self, request: &RegisterRequest) -> Result<Session, ApiError> {
        if request.username.trim().is_empty()
            || request.email.trim().is_empty()
            || request.password.trim().is_empty()
        {
            return Err(ApiError::Validation("All fields are required".into()));
        }
        let response: AuthResponse = self
            .send(
                RequestKind::Credentials,
                Method::POST,
                "register",
                Some(request),
                None::<&()>,
            )
            .await?;
        self.begin_session(response)
    }

    /// Signs in and stores the resulting session.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] for blank fields,
    /// [`ApiError::Authentication`] on bad credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        if email.trim().is_empty() || password.trim().is_empty() {
            return Err(ApiError::Validation(
                "Email and password are required".into(),
            ));
        }
        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .send(
                RequestKind::Credentials,
                Method::POST,
                "login",
                Some(&request),
                None::<&()>,
            )
            .await?;
        self.begin_session(response)
    }

    /// Forgets the stored session. Safe to call when already signed out.
    pub fn sign_out(&self) {
        {
            let mut epoch = lock(&self.epoch);
            self.store.clear();
            *epoch += 1;
        }
        tracing::info!("Signed out");
        let _ = self.events.send(SessionEvent::SignedOut);
    }

    /// Retrieves the signed-in user's profile.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or response cannot be parsed.
    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        let response: ProfileResponse = self.get("profile", &()).await?;
        Ok(response.user)
    }

    /// Submits a prompt and returns the generated image record.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or response cannot be parsed.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage, ApiError> {
        self.post("generate", request).await
    }

    /// Retrieves a page of the user's images, newest first.
    ///
    /// # Arguments
    /// * `page` - Page number (1-indexed)
    /// * `per_page` - Results per page
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or response cannot be parsed.
    pub async fn images(&self, page: u64, per_page: u64) -> Result<ImagePage, ApiError> {
        let query = [("page", page), ("per_page", per_page)];
        self.get("images", &query).await
    }

    /// Marks an image as favorite.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or response cannot be parsed.
    pub async fn add_favorite(&self, image_id: ImageId) -> Result<FavoriteAdded, ApiError> {
        self.post("favorites", &FavoriteRequest { image_id }).await
    }

    /// Removes an image from the favorites. The image itself is kept.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or response cannot be parsed.
    pub async fn remove_favorite(&self, image_id: ImageId) -> Result<Acknowledgement, ApiError> {
        self.delete(&format!("favorites/{image_id}")).await
    }

    /// Retrieves a page of the user's favorites, most recent first.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or response cannot be parsed.
    pub async fn favorites(&self, page: u64, per_page: u64) -> Result<FavoritePage, ApiError> {
        let query = [("page", page), ("per_page", per_page)];
        self.get("favorites", &query).await
    }

    /// Retrieves the account-wide counters.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or response cannot be parsed.
    pub async fn stats(&self) -> Result<Stats, ApiError> {
        let response: StatsResponse = self.get("stats", &()).await?;
        Ok(response.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_message_prefers_server_text() {
        let err = ApiError::Server {
            status: 500,
            message: Some("Upstream provider unavailable".into()),
        };
        assert_eq!(err.display_message("fallback"), "Upstream provider unavailable");

        let err = ApiError::Server {
            status: 502,
            message: None,
        };
        assert_eq!(err.display_message("Failed to generate image"), "Failed to generate image");
        assert_eq!(err.status(), Some(502));
        assert!(!err.is_retry_safe());
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = ApiClient::new(Arc::new(MemorySessionStore::new()))
            .with_base_url("http://localhost:5002/api");
        assert_eq!(client.base_url(), "http://localhost:5002/api/");
    }

    #[test]
    fn sign_out_broadcasts_and_advances_epoch() {
        let client = ApiClient::new(Arc::new(MemorySessionStore::new()));
        let mut events = client.subscribe();
        let before = client.session_epoch();
        client.sign_out();
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
        assert!(client.session_epoch() > before);
    }
}
