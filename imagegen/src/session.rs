//! Durable storage of the signed-in [`Session`].
//!
//! A session is persisted as two slots, the credential and the serialized
//! user, which are always written and removed together. A store that holds
//! only one of them (or an unparseable one) is treated as signed out and
//! cleaned up on the next [`SessionStore::load`].

use crate::types::{Credential, Session, UserProfile};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Slot holding the bearer credential.
pub const TOKEN_SLOT: &str = "token";
/// Slot holding the serialized [`UserProfile`].
pub const USER_SLOT: &str = "user.json";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session storage error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize session user: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Storage for the current session, shared by the client and all controllers.
pub trait SessionStore: Send + Sync {
    /// Returns the stored session, or `None` after clearing any partial state.
    fn load(&self) -> Option<Session>;

    /// Persists both halves of `session`; readers never observe only one.
    ///
    /// # Errors
    /// Returns an error if the session cannot be serialized or written.
    fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Removes all session data. Idempotent and safe to call concurrently.
    fn clear(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Session store living for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `session`.
    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<Session> {
        let mut slot = lock(&self.session);
        if slot
            .as_ref()
            .is_some_and(|session| !session.credential.is_well_formed())
        {
            *slot = None;
        }
        slot.clone()
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        *lock(&self.session) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) {
        lock(&self.session).take();
    }
}

/// Session store persisted as two files in a directory.
///
/// Writes go to temporary files that are renamed into place, and every
/// operation holds the same mutex, so within a process the slots change as
/// a unit. Other processes sharing the directory get no such guarantee: a
/// load racing a save there may pair the new credential with the previous
/// user. The credential is renamed into place first so that a save failing
/// halfway never leaves a new user next to an old credential.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    guard: Mutex<()>,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            guard: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read_slots(&self) -> io::Result<Option<(String, String)>> {
        let token = read_optional(&self.slot(TOKEN_SLOT))?;
        let user = read_optional(&self.slot(USER_SLOT))?;
        match (token, user) {
            (Some(token), Some(user)) => Ok(Some((token, user))),
            (None, None) => Ok(None),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "only one session slot present",
            )),
        }
    }

    fn remove_slots(&self) {
        for name in [TOKEN_SLOT, USER_SLOT] {
            let path = self.slot(name);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Failed to remove session slot");
                }
            }
        }
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_replacing(path: &Path, content: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<Session> {
        let _guard = lock(&self.guard);
        let slots = match self.read_slots() {
            Ok(slots) => slots,
            Err(err) => {
                tracing::warn!(error = %err, "Discarding unreadable session");
                self.remove_slots();
                return None;
            }
        };
        let (token, user) = slots?;

        let credential = Credential::new(token.trim());
        let user = serde_json::from_str::<UserProfile>(&user);
        match user {
            Ok(user) if credential.is_well_formed() => Some(Session::new(credential, user)),
            Ok(_) => {
                tracing::warn!("Discarding session with empty credential");
                self.remove_slots();
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "Discarding session with malformed user");
                self.remove_slots();
                None
            }
        }
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        let user = serde_json::to_string(&session.user)?;
        let _guard = lock(&self.guard);
        fs::create_dir_all(&self.dir)?;
        let written = write_replacing(&self.slot(TOKEN_SLOT), session.credential.expose())
            .and_then(|()| write_replacing(&self.slot(USER_SLOT), &user));
        if let Err(err) = written {
            self.remove_slots();
            return Err(err.into());
        }
        Ok(())
    }

    fn clear(&self) {
        let _guard = lock(&self.guard);
        self.remove_slots();
    }
}
