//! Optimistic favorite toggling.
//!
//! A toggle flips the displayed flag immediately, then reconciles with the
//! server once the request resolves. Per image the controller remembers the
//! value the server last confirmed and how many toggles are still in flight:
//!
//! - a failed toggle that is still the newest one restores the confirmed value;
//! - when the last in-flight toggle resolves, the displayed value becomes the
//!   confirmed value.
//!
//! Overlapping toggles on one image may be handled by the server in a
//! different order than they were sent. When their responses cannot be
//! ordered (an "already applied" reply, or a response overtaking a newer
//! one), the image is re-read from the favorites list once it is quiet and
//! that membership becomes the confirmed value.

use crate::types::{Favorite, GeneratedImage, ImageId};
use crate::{ApiClient, ApiError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;

pub const ADD_FAILED_MESSAGE: &str = "Failed to add to favorites";
pub const REMOVE_FAILED_MESSAGE: &str = "Failed to remove from favorites";

const SETTLE_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone)]
struct Entry {
    image: Option<GeneratedImage>,
    /// Registered through [`FavoritesController::track`].
    tracked: bool,
    shown: bool,
    confirmed: bool,
    confirmed_seq: u64,
    latest_seq: u64,
    in_flight: u32,
    /// A toggle started while another one on the same image was in flight.
    contended: bool,
    /// Responses could not be ordered; re-read membership when quiet.
    unsettled: bool,
    /// List row taken out by an optimistic removal, with its old position.
    stashed: Option<(usize, Favorite)>,
}

impl Entry {
    const fn new(image: Option<GeneratedImage>, is_favorite: bool) -> Self {
        Self {
            image,
            tracked: false,
            shown: is_favorite,
            confirmed: is_favorite,
            confirmed_seq: 0,
            latest_seq: 0,
            in_flight: 0,
            contended: false,
            unsettled: false,
            stashed: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ImageId, Entry>,
    /// Favorites list view, when one is open.
    list: Option<Vec<Favorite>>,
    next_seq: u64,
    last_error: Option<String>,
}

impl Inner {
    /// Brings the open list in line with the displayed flag of `id`.
    fn sync_list(&mut self, id: ImageId) {
        let Some(list) = self.list.as_mut() else {
            return;
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let position = list.iter().position(|favorite| favorite.image.id == id);
        match (entry.shown, position) {
            (true, None) => {
                if let Some((index, favorite)) = entry.stashed.take() {
                    list.insert(index.min(list.len()), favorite);
                } else if let Some(image) = &entry.image {
                    let mut image = image.clone();
                    image.is_favorite = true;
                    list.insert(
                        0,
                        Favorite {
                            id: None,
                            image,
                            added_at: OffsetDateTime::now_utc(),
                        },
                    );
                }
            }
            (false, Some(position)) => {
                entry.stashed = Some((position, list.remove(position)));
            }
            _ => {}
        }
    }

    fn untrack(&mut self, id: ImageId) -> bool {
        match self.entries.get(&id) {
            Some(entry) if entry.in_flight == 0 => {
                self.entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    fn fill_favorite_id(&mut self, id: ImageId, favorite_id: i64) {
        let Some(list) = self.list.as_mut() else {
            return;
        };
        if let Some(pending) = list
            .iter_mut()
            .find(|favorite| favorite.image.id == id && favorite.id.is_none())
        {
            pending.id = Some(favorite_id);
        }
    }

    fn drop_stashes(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stashed = None;
        }
    }
}

/// Whether a rejection only says the image is already in the requested state.
fn already_applied(err: &ApiError, favorite: bool) -> bool {
    let ApiError::Server { status, message } = err else {
        return false;
    };
    let message = message.as_deref().unwrap_or_default().to_ascii_lowercase();
    match (favorite, *status) {
        (_, 409) => true,
        (true, 400) => message.contains("already in favorites"),
        (false, 404) => message.contains("favorite not found"),
        _ => false,
    }
}

pub struct FavoritesController {
    api: Arc<ApiClient>,
    inner: Mutex<Inner>,
}

impl FavoritesController {
    #[must_use]
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an image shown in some view, taking its flag as the server's.
    /// While a toggle is in flight only the image record is refreshed.
    pub fn track(&self, image: &GeneratedImage) {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .entry(image.id)
            .or_insert_with(|| Entry::new(None, image.is_favorite));
        entry.image = Some(image.clone());
        entry.tracked = true;
        if entry.in_flight == 0 {
            entry.shown = image.is_favorite;
            entry.confirmed = image.is_favorite;
        }
        inner.sync_list(image.id);
    }

    /// Opens the favorites list view with a freshly fetched page.
    pub fn open_favorites(&self, favorites: Vec<Favorite>) {
        let mut inner = self.lock();
        for favorite in &favorites {
            let entry = inner
                .entries
                .entry(favorite.image.id)
                .or_insert_with(|| Entry::new(None, true));
            entry.image = Some(favorite.image.clone());
            if entry.in_flight == 0 {
                entry.shown = true;
                entry.confirmed = true;
            }
        }
        let ids: Vec<ImageId> = favorites.iter().map(|favorite| favorite.image.id).collect();
        inner.drop_stashes();
        inner.list = Some(favorites);
        for id in ids {
            inner.sync_list(id);
        }
    }

    /// Closes the favorites view. Images only the view knew about are
    /// forgotten unless a toggle on them is still in flight.
    pub fn close_favorites(&self) {
        let mut inner = self.lock();
        let listed: Vec<ImageId> = inner
            .list
            .take()
            .unwrap_or_default()
            .iter()
            .map(|favorite| favorite.image.id)
            .collect();
        inner.drop_stashes();
        for id in listed {
            if inner.entries.get(&id).is_some_and(|entry| !entry.tracked) {
                inner.untrack(id);
            }
        }
    }

    /// Forgets an image once no view shows it. An image with a toggle in
    /// flight is kept; returns whether the image was forgotten.
    pub fn untrack(&self, id: ImageId) -> bool {
        self.lock().untrack(id)
    }

    /// Contents of the open favorites view, including pending inserts.
    #[must_use]
    pub fn favorites(&self) -> Option<Vec<Favorite>> {
        self.lock().list.clone()
    }

    #[must_use]
    pub fn is_favorite(&self, id: ImageId) -> Option<bool> {
        self.lock().entries.get(&id).map(|entry| entry.shown)
    }

    /// The tracked image with its flag as currently displayed.
    #[must_use]
    pub fn image(&self, id: ImageId) -> Option<GeneratedImage> {
        let inner = self.lock();
        let entry = inner.entries.get(&id)?;
        let mut image = entry.image.clone()?;
        image.is_favorite = entry.shown;
        Some(image)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Marks an image as favorite, optimistically.
    ///
    /// # Errors
    /// Returns the request's error after the local flag has been reconciled.
    pub async fn add_favorite(&self, id: ImageId) -> Result<(), ApiError> {
        self.toggle(id, true).await
    }

    /// Removes an image from the favorites, optimistically.
    ///
    /// # Errors
    /// Returns the request's error after the local flag has been reconciled.
    pub async fn remove_favorite(&self, id: ImageId) -> Result<(), ApiError> {
        self.toggle(id, false).await
    }

    async fn toggle(&self, id: ImageId, favorite: bool) -> Result<(), ApiError> {
        let seq = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.next_seq += 1;
            let seq = inner.next_seq;
            // an untracked image is assumed to be in the opposite state
            let entry = inner
                .entries
                .entry(id)
                .or_insert_with(|| Entry::new(None, !favorite));
            entry.latest_seq = seq;
            if entry.in_flight > 0 {
                entry.contended = true;
            }
            entry.in_flight += 1;
            entry.shown = favorite;
            inner.last_error = None;
            inner.sync_list(id);
            seq
        };
        tracing::debug!(image_id = id, favorite, seq, "Toggling favorite");

        let outcome = if favorite {
            self.api
                .add_favorite(id)
                .await
                .map(|added| added.favorite_id)
        } else {
            self.api.remove_favorite(id).await.map(|_| None)
        };
        let mut conflict = false;
        let outcome = match outcome {
            Err(err) if already_applied(&err, favorite) => {
                tracing::debug!(image_id = id, favorite, "Favorite already in requested state");
                conflict = true;
                Ok(None)
            }
            other => other,
        };

        let settle = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let mut superseded = false;
            let mut settle = None;
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.in_flight = entry.in_flight.saturating_sub(1);
                if outcome.is_ok() {
                    if entry.contended && (conflict || seq < entry.confirmed_seq) {
                        entry.unsettled = true;
                    }
                    if seq > entry.confirmed_seq {
                        entry.confirmed = favorite;
                        entry.confirmed_seq = seq;
                    }
                }
                superseded = entry.latest_seq != seq;
                if entry.in_flight == 0 && entry.unsettled {
                    settle = Some(entry.latest_seq);
                } else if entry.in_flight == 0 || (!superseded && outcome.is_err()) {
                    entry.shown = entry.confirmed;
                }
                if entry.in_flight == 0 {
                    entry.contended = false;
                    entry.unsettled = false;
                }
            }
            inner.sync_list(id);
            if let Ok(Some(favorite_id)) = &outcome {
                inner.fill_favorite_id(id, *favorite_id);
            }
            if let Err(err) = &outcome {
                tracing::debug!(image_id = id, favorite, superseded, error = %err, "Favorite toggle failed");
                if !superseded {
                    inner.last_error = Some(match err {
                        ApiError::SessionExpired => err.to_string(),
                        _ if favorite => ADD_FAILED_MESSAGE.to_string(),
                        _ => REMOVE_FAILED_MESSAGE.to_string(),
                    });
                }
            }
            settle
        };

        if let Some(settle_seq) = settle {
            self.settle(id, settle_seq).await;
        }
        outcome.map(|_| ())
    }

    /// Replaces the confirmed flag of `id` with its membership in the
    /// server's favorites list. `settle_seq` is the newest toggle the
    /// membership accounts for.
    async fn settle(&self, id: ImageId, settle_seq: u64) {
        tracing::debug!(image_id = id, settle_seq, "Re-reading favorite membership");
        let fetched = self.server_favorite(id).await;

        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(entry) = inner.entries.get_mut(&id) else {
            return;
        };
        let favorite_id = match fetched {
            Ok(found) => {
                if entry.confirmed_seq <= settle_seq {
                    entry.confirmed = found.is_some();
                    entry.confirmed_seq = settle_seq;
                }
                found.and_then(|favorite| favorite.id)
            }
            Err(err) => {
                tracing::warn!(image_id = id, error = %err, "Failed to re-read favorite membership");
                None
            }
        };
        if entry.in_flight == 0 {
            entry.shown = entry.confirmed;
        }
        inner.sync_list(id);
        if let Some(favorite_id) = favorite_id {
            inner.fill_favorite_id(id, favorite_id);
        }
    }

    /// The server's favorite record for `id`, if it has one.
    async fn server_favorite(&self, id: ImageId) -> Result<Option<Favorite>, ApiError> {
        let mut page = 1;
        loop {
            let result = self.api.favorites(page, SETTLE_PAGE_SIZE).await?;
            let count = result.favorites.len();
            if let Some(found) = result
                .favorites
                .into_iter()
                .find(|favorite| favorite.image.id == id)
            {
                return Ok(Some(found));
            }
            let more = match result.pages {
                Some(pages) => page < pages,
                None => count as u64 == SETTLE_PAGE_SIZE,
            };
            if count == 0 || !more {
                return Ok(None);
            }
            page += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_matching_the_request_count_as_applied() {
        let already = ApiError::Server {
            status: 400,
            message: Some("Image already in favorites".into()),
        };
        assert!(already_applied(&already, true));
        assert!(!already_applied(&already, false));

        let missing = ApiError::Server {
            status: 404,
            message: Some("Favorite not found".into()),
        };
        assert!(already_applied(&missing, false));
        assert!(!already_applied(&missing, true));

        let not_found = ApiError::Server {
            status: 400,
            message: Some("Image not found".into()),
        };
        assert!(!already_applied(&not_found, true));
        assert!(!already_applied(&ApiError::SessionExpired, true));
    }
}
