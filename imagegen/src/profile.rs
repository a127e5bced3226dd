//! Read-only aggregation of the user's history, favorites and counters.

use crate::types::{Favorite, GeneratedImage, Stats, UserProfile};
use crate::{ApiClient, ApiError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const DEFAULT_PAGE_SIZE: u64 = 10;
const PROFILE_FAILED_MESSAGE: &str = "Failed to load your images";

/// Everything the profile view shows, fetched together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileData {
    pub images: Vec<GeneratedImage>,
    pub favorites: Vec<Favorite>,
    pub stats: Stats,
}

#[derive(Debug, Default)]
struct Inner {
    seq: u64,
    snapshot: Option<ProfileData>,
    last_error: Option<String>,
}

pub struct ProfileController {
    api: Arc<ApiClient>,
    page: u64,
    per_page: u64,
    inner: Mutex<Inner>,
}

impl ProfileController {
    /// Creates a controller reading the first page of 10 entries.
    #[must_use]
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Sets the page size for images and favorites. Zero is treated as one.
    #[must_use]
    pub fn with_page_size(mut self, per_page: u64) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Sets the 1-indexed page to read.
    #[must_use]
    pub fn with_page(mut self, page: u64) -> Self {
        self.page = page.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The signed-in user as stored with the session.
    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.api.session().map(|session| session.user)
    }

    /// Fetches the full profile (with creation and last-login times).
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or response cannot be parsed.
    pub async fn fetch_user(&self) -> Result<UserProfile, ApiError> {
        self.api.profile().await
    }

    /// Last data set a refresh produced.
    #[must_use]
    pub fn snapshot(&self) -> Option<ProfileData> {
        self.lock().snapshot.clone()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Fetches images, favorites and stats concurrently and waits for all
    /// three. Any failure fails the whole refresh; an expired session is
    /// reported in preference to other errors.
    ///
    /// # Errors
    /// Returns the error of one of the failed fetches.
    pub async fn refresh(&self) -> Result<ProfileData, ApiError> {
        let seq = {
            let mut inner = self.lock();
            inner.seq += 1;
            inner.seq
        };

        let (images, favorites, stats) = tokio::join!(
            self.api.images(self.page, self.per_page),
            self.api.favorites(self.page, self.per_page),
            self.api.stats()
        );

        let expired = matches!(images, Err(ApiError::SessionExpired))
            || matches!(favorites, Err(ApiError::SessionExpired))
            || matches!(stats, Err(ApiError::SessionExpired));
        let outcome = if expired {
            Err(ApiError::SessionExpired)
        } else {
            images.and_then(|images| {
                favorites.and_then(|favorites| {
                    stats.map(|stats| ProfileData {
                        images: images.images,
                        favorites: favorites.favorites,
                        stats,
                    })
                })
            })
        };

        let mut inner = self.lock();
        if inner.seq == seq {
            match &outcome {
                Ok(data) => {
                    inner.snapshot = Some(data.clone());
                    inner.last_error = None;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "Profile refresh failed");
                    inner.last_error = Some(err.display_message(PROFILE_FAILED_MESSAGE));
                }
            }
        }
        outcome
    }
}
