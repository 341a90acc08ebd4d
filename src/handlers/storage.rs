use actix_session::Session;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";
/// Token the client signed out with; its auth cookies are ignored afterwards.
pub const REVOKED_KEY: &str = "revokedToken";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write `{key}`: {reason}")]
    Write { key: String, reason: String },
}

/// A keyed slot that survives between requests or restarts.
pub trait Storage {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str);
}

/// In-memory storage. Clones share the same slot, which is how tests
/// simulate a restart over persisted data.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }
}

/// Storage backed by the client's session cookie.
#[derive(Clone)]
pub struct SessionStorage {
    session: Session,
}

impl SessionStorage {
    pub fn new(session: Session) -> Self {
        SessionStorage { session }
    }
}

impl Storage for SessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        match self.session.get::<String>(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[SESSION] unreadable `{}` entry: {}", key, e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.session
            .insert(key, value)
            .map_err(|e| StorageError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn remove(&self, key: &str) {
        self.session.remove(key);
    }
}
