//! Prompt submission and the generation state machine.
//!
//! `Idle -> Submitting -> {Success, Failed} -> Idle`. Every submission gets a
//! sequence number; a response is applied only while its number is still the
//! newest, so a slow earlier request can never overwrite a later one.
//! Dropping a pending `generate` future returns a still-current submission to
//! `Idle`.

use crate::types::{GenerateRequest, GeneratedImage, Style};
use crate::{ApiClient, ApiError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shown when the prompt is empty after trimming.
pub const EMPTY_PROMPT_MESSAGE: &str = "Please enter a prompt";
const GENERATION_FAILED_MESSAGE: &str = "Failed to generate image";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GenerationState {
    #[default]
    Idle,
    Submitting {
        prompt: String,
        style: Style,
    },
    Success(GeneratedImage),
    /// Holds the message to display.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    /// A newer submission (or a reset) replaced this one; its result was dropped.
    #[error("superseded by a newer generation request")]
    Superseded,
}

#[derive(Debug, Default)]
struct Inner {
    state: GenerationState,
    seq: u64,
}

/// Resets a submission abandoned mid-flight, unless a newer one replaced it.
struct PendingSubmission<'a> {
    controller: &'a GenerationController,
    seq: u64,
    finished: bool,
}

impl Drop for PendingSubmission<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut inner = self.controller.lock();
        if inner.seq == self.seq && matches!(inner.state, GenerationState::Submitting { .. }) {
            tracing::debug!(seq = self.seq, "Generation request abandoned");
            inner.state = GenerationState::Idle;
        }
    }
}

pub struct GenerationController {
    api: Arc<ApiClient>,
    inner: Mutex<Inner>,
}

impl GenerationController {
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

    #[must_use]
    pub fn state(&self) -> GenerationState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn is_submitting(&self) -> bool {
        matches!(self.lock().state, GenerationState::Submitting { .. })
    }

    /// The image of the last successful generation, if it is still current.
    #[must_use]
    pub fn current_result(&self) -> Option<GeneratedImage> {
        match &self.lock().state {
            GenerationState::Success(image) => Some(image.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        match &self.lock().state {
            GenerationState::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Submits `prompt` in `style`, superseding any submission still pending.
    ///
    /// # Errors
    /// Returns [`GenerationError::Validation`] without touching the network
    /// when the prompt is blank, [`GenerationError::Superseded`] when a newer
    /// submission or [`reset`](Self::reset) overtook this one, and
    /// [`GenerationError::Api`] when the request failed.
    pub async fn generate(
        &self,
        prompt: &str,
        style: Style,
    ) -> Result<GeneratedImage, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            let mut inner = self.lock();
            // a pending submission keeps running
            if !matches!(inner.state, GenerationState::Submitting { .. }) {
                inner.state = GenerationState::Failed(EMPTY_PROMPT_MESSAGE.to_string());
            }
            return Err(GenerationError::Validation(EMPTY_PROMPT_MESSAGE.to_string()));
        }

        let request = GenerateRequest {
            prompt: prompt.to_string(),
            style,
        };
        let (seq, epoch) = {
            let mut inner = self.lock();
            inner.seq += 1;
            inner.state = GenerationState::Submitting {
                prompt: request.prompt.clone(),
                style,
            };
            (inner.seq, self.api.session_epoch())
        };
        tracing::debug!(seq, %style, "Submitting generation request");

        let mut pending = PendingSubmission {
            controller: self,
            seq,
            finished: false,
        };
        let outcome = self.api.generate(&request).await;
        pending.finished = true;

        let mut inner = self.lock();
        if inner.seq != seq {
            tracing::debug!(seq, current = inner.seq, "Dropping superseded generation response");
            return Err(GenerationError::Superseded);
        }
        if self.api.session_epoch() != epoch {
            inner.state = GenerationState::Failed(ApiError::SessionExpired.to_string());
            return Err(ApiError::SessionExpired.into());
        }
        match outcome {
            Ok(image) => {
                tracing::debug!(seq, image_id = image.id, ai_enhanced = image.ai_enhanced, "Generation succeeded");
                inner.state = GenerationState::Success(image.clone());
                Ok(image)
            }
            Err(err) => {
                tracing::debug!(seq, error = %err, "Generation failed");
                inner.state = GenerationState::Failed(err.display_message(GENERATION_FAILED_MESSAGE));
                Err(err.into())
            }
        }
    }

    /// Returns to `Idle`, dropping the current result or error and any
    /// response still on its way.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.seq += 1;
        inner.state = GenerationState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySessionStore;

    fn controller() -> GenerationController {
        // nothing listens here; validation must not reach it
        let api = ApiClient::new(Arc::new(MemorySessionStore::new()))
            .with_base_url("http://127.0.0.1:9/api");
        GenerationController::new(Arc::new(api))
    }

    #[tokio::test]
    async fn blank_prompt_fails_locally() {
        let generation = controller();
        for prompt in ["", "   ", "\n\t"] {
            let err = generation.generate(prompt, Style::Anime).await.unwrap_err();
            assert!(matches!(err, GenerationError::Validation(ref m) if m == EMPTY_PROMPT_MESSAGE));
        }
        assert_eq!(generation.error().as_deref(), Some(EMPTY_PROMPT_MESSAGE));
    }

    #[test]
    fn reset_returns_to_idle() {
        let generation = controller();
        generation.lock().state = GenerationState::Failed("boom".into());
        generation.reset();
        assert_eq!(generation.state(), GenerationState::Idle);
        assert!(generation.current_result().is_none());
    }
}
