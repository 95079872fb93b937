//! Session registry: the code → live-session map shared across the gateway.

use super::{EventSender, GameCode, GameRules, GameSession, JoinError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One session shared between its two connections and its timer tasks.
/// The mutex serializes every mutation of the session.
pub type SharedSession = Arc<Mutex<GameSession>>;

// No 0/O/1/I, so codes survive being read aloud or typed.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

fn generate_code() -> GameCode {
    let mut buf = [0u8; CODE_LEN];
    if getrandom::getrandom(&mut buf).is_err() {
        // OS entropy failure; derive the code from the clock instead.
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (now >> (8 * i)) as u8;
        }
    }
    buf.iter()
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect()
}

/// Uppercase and trim a client-typed code.
pub fn normalize_code(code: &str) -> GameCode {
    code.trim().to_uppercase()
}

/// Registry of game codes to live sessions. Shared across the gateway.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<GameCode, SharedSession>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Allocate a session with one slot and a fresh code; returns the code.
    /// Regenerates on the unlikely collision, under the map's write lock.
    pub async fn create(
        &self,
        owner: impl Into<String>,
        tx: EventSender,
        rules: GameRules,
    ) -> GameCode {
        let mut sessions = self.inner.write().await;
        let mut code = generate_code();
        while sessions.contains_key(&code) {
            code = generate_code();
        }
        let session = GameSession::new(code.clone(), owner, tx, rules);
        sessions.insert(code.clone(), Arc::new(Mutex::new(session)));
        code
    }

    /// Fill the second slot of the session with this code. On success the
    /// session has emitted `start` to both players and the caller opens the
    /// first round.
    pub async fn join(
        &self,
        code: &str,
        username: impl Into<String>,
        tx: EventSender,
    ) -> Result<SharedSession, JoinError> {
        let Some(session) = self.get(code).await else {
            return Err(JoinError::NotFound);
        };
        session.lock().await.add_player(username, tx)?;
        Ok(session)
    }

    pub async fn get(&self, code: &str) -> Option<SharedSession> {
        self.inner.read().await.get(code).cloned()
    }

    /// Idempotent; returns the removed session so the caller can cancel its
    /// pending tasks.
    pub async fn remove(&self, code: &str) -> Option<SharedSession> {
        self.inner.write().await.remove(code)
    }
}
