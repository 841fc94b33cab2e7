//! Storage collaborator contracts.
//!
//! [`SessionStore`] persists finalized sessions and preferences.
//! [`BackgroundQueue`] is the durable hand-off between the background
//! location task (producer) and the foreground engine (consumer).
//!
//! [`MemoryStore`] implements both in-process. The SQLite implementation
//! lives in [`crate::persistence`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::{LocationSample, Result, TrackingError, TrackingSession};

/// Durable storage for finalized sessions and user preferences.
pub trait SessionStore: Send + Sync {
    /// All persisted sessions in insertion order.
    fn load_all(&self) -> Result<Vec<TrackingSession>>;

    /// Persist a finalized session. Saving an id that already exists
    /// replaces the stored copy.
    fn save(&self, session: &TrackingSession) -> Result<()>;

    fn delete(&self, id: &str) -> Result<()>;

    fn clear_all(&self) -> Result<()>;

    fn get_preference(&self, key: &str) -> Result<Option<String>>;

    fn set_preference(&self, key: &str, value: &str) -> Result<()>;
}

/// FIFO queue of samples captured while the app was backgrounded.
pub trait BackgroundQueue: Send + Sync {
    /// Append samples after any already queued.
    fn append(&self, samples: &[LocationSample]) -> Result<()>;

    /// Remove and return the whole queued batch, oldest first.
    ///
    /// Swap-and-clear: the returned batch is exactly what was removed. On
    /// error nothing is removed.
    fn drain(&self) -> Result<Vec<LocationSample>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    sessions: Vec<TrackingSession>,
    preferences: HashMap<String, String>,
    queue: Vec<LocationSample>,
}

/// In-process [`SessionStore`] and [`BackgroundQueue`].
///
/// Reads and writes can be made to fail on demand, which is how the
/// engine's failure paths are exercised.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| TrackingError::persistence("memory store lock poisoned"))
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TrackingError::persistence("read failed"));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackingError::persistence("write failed"));
        }
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<TrackingSession>> {
        self.check_read()?;
        Ok(self.lock()?.sessions.clone())
    }

    fn save(&self, session: &TrackingSession) -> Result<()> {
        self.check_write()?;
        let mut inner = self.lock()?;
        match inner.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => inner.sessions.push(session.clone()),
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.check_write()?;
        self.lock()?.sessions.retain(|s| s.id != id);
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        self.check_write()?;
        self.lock()?.sessions.clear();
        Ok(())
    }

    fn get_preference(&self, key: &str) -> Result<Option<String>> {
        self.check_read()?;
        Ok(self.lock()?.preferences.get(key).cloned())
    }

    fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.check_write()?;
        self.lock()?
            .preferences
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl BackgroundQueue for MemoryStore {
    fn append(&self, samples: &[LocationSample]) -> Result<()> {
        self.check_write()?;
        self.lock()?.queue.extend_from_slice(samples);
        Ok(())
    }

    fn drain(&self) -> Result<Vec<LocationSample>> {
        self.check_read()?;
        Ok(std::mem::take(&mut self.lock()?.queue))
    }

    fn len(&self) -> Result<usize> {
        self.check_read()?;
        Ok(self.lock()?.queue.len())
    }
}
