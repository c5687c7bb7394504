use crate::backend::{platform_backend, FileLock};
use crate::hash::{compute_file_hash, hex_encode_lower, short_hash};
use crate::{LockError, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock flavour: shared for readers, exclusive for writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The open file that carries the OS lock. Dropping it unlocks.
#[derive(Debug)]
struct HeldLock {
    file: Mutex<Option<File>>,
    backend: Arc<dyn FileLock>,
}

impl HeldLock {
    /// Returns `Ok(false)` when the lock was already gone.
    fn release(&self) -> std::io::Result<bool> {
        let Some(file) = lock_unpoisoned(&self.file).take() else {
            return Ok(false);
        };
        // Closing the descriptor drops the lock even if the explicit unlock fails.
        self.backend.unlock(&file)?;
        Ok(true)
    }

    fn is_held(&self) -> bool {
        lock_unpoisoned(&self.file).is_some()
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// An acquired advisory lock.
///
/// Handles are cheap to clone; all clones refer to the same OS lock. The lock is released by
/// [`LockManager::release`], by [`LockManager::release_all`], or when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct LockHandle {
    id: String,
    path: PathBuf,
    mode: LockMode,
    acquired_at: SystemTime,
    acquired_instant: Instant,
    content_hash: Option<String>,
    held: Arc<HeldLock>,
}

impl LockHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical path of the locked file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    pub const fn acquired_at(&self) -> SystemTime {
        self.acquired_at
    }

    /// SHA-256 of the file taken right after the lock was acquired
    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_instant.elapsed()
    }

    pub fn is_active(&self) -> bool {
        self.held.is_held()
    }
}

/// Outcome of the first successful release of a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub lock_id: String,
    pub path: PathBuf,
    pub held_ms: u64,
    pub hash_before: Option<String>,
    pub hash_after: Option<String>,
    pub was_modified: bool,
}

/// Per-file advisory locks with integrity hashing.
pub struct LockManager {
    backend: Arc<dyn FileLock>,
    poll_interval: Duration,
    active: Mutex<HashMap<String, LockHandle>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Manager on the host's lock backend
    pub fn new() -> Self {
        Self::with_backend(platform_backend())
    }

    pub fn with_backend(backend: Arc<dyn FileLock>) -> Self {
        Self {
            backend,
            poll_interval: DEFAULT_POLL_INTERVAL,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep between non-blocking attempts while waiting for a contended lock
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub async fn acquire_read(
        &self,
        path: impl AsRef<Path>,
        compute_hash: bool,
        timeout: Duration,
    ) -> Result<LockHandle> {
        self.acquire(path.as_ref(), LockMode::Read, compute_hash, timeout)
            .await
    }

    pub async fn acquire_write(
        &self,
        path: impl AsRef<Path>,
        compute_hash: bool,
        timeout: Duration,
    ) -> Result<LockHandle> {
        self.acquire(path.as_ref(), LockMode::Write, compute_hash, timeout)
            .await
    }

    /// Like [`Self::acquire_read`], but logs and returns `None` on failure.
    pub async fn try_acquire_read(
        &self,
        path: impl AsRef<Path>,
        compute_hash: bool,
        timeout: Duration,
    ) -> Option<LockHandle> {
        let path = path.as_ref();
        match self.acquire_read(path, compute_hash, timeout).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("Could not acquire read lock on {}: {err}", path.display());
                None
            }
        }
    }

    async fn acquire(
        &self,
        path: &Path,
        mode: LockMode,
        compute_hash: bool,
        timeout: Duration,
    ) -> Result<LockHandle> {
        let full_path = match tokio::fs::canonicalize(path).await {
            Ok(p) => p,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(LockError::NotFound(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        log::debug!("Acquiring {mode} lock on {}", full_path.display());

        let file = open_for(&full_path, mode)?;
        let start = Instant::now();
        loop {
            match self.backend.try_lock(&file, mode) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => return Err(LockError::failed(&full_path, err.to_string())),
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: full_path,
                    mode,
                    waited_ms: millis(waited),
                });
            }
            tokio::time::sleep(self.poll_interval.min(timeout - waited)).await;
        }

        let held = Arc::new(HeldLock {
            file: Mutex::new(Some(file)),
            backend: self.backend.clone(),
        });

        // Hash while the lock is held; on failure `held` drops and unlocks.
        let content_hash = if compute_hash {
            Some(hash_blocking(full_path.clone()).await?)
        } else {
            None
        };

        let handle = LockHandle {
            id: new_lock_id(),
            path: full_path,
            mode,
            acquired_at: SystemTime::now(),
            acquired_instant: Instant::now(),
            content_hash,
            held,
        };

        log::info!(
            "{} lock acquired on {} (lock {}, hash {})",
            mode,
            handle.path.display(),
            handle.id,
            handle.content_hash().map_or("n/a", short_hash)
        );

        lock_unpoisoned(&self.active).insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    /// Release `handle`.
    ///
    /// Returns `Ok(None)` when the handle was already released; a second release never touches
    /// other handles. When the handle carries a content hash, the file is hashed again before
    /// unlocking and the report says whether it changed.
    pub async fn release(&self, handle: &LockHandle) -> Result<Option<ReleaseReport>> {
        lock_unpoisoned(&self.active).remove(&handle.id);
        if !handle.is_active() {
            return Ok(None);
        }

        let hash_after = match handle.content_hash {
            Some(_) => match hash_blocking(handle.path.clone()).await {
                Ok(hash) => Some(hash),
                Err(err) => {
                    log::warn!(
                        "Could not re-hash {} on release: {err}",
                        handle.path.display()
                    );
                    None
                }
            },
            None => None,
        };

        if !handle.held.release()? {
            // Raced with another release of a clone.
            return Ok(None);
        }

        let was_modified = match (&handle.content_hash, &hash_after) {
            (Some(before), Some(after)) => !before.eq_ignore_ascii_case(after),
            (Some(_), None) => true,
            _ => false,
        };
        if was_modified {
            log::warn!(
                "{} changed while locked (lock {})",
                handle.path.display(),
                handle.id
            );
        }
        log::debug!("Lock released on {}", handle.path.display());

        Ok(Some(ReleaseReport {
            lock_id: handle.id.clone(),
            path: handle.path.clone(),
            held_ms: millis(handle.held_for()),
            hash_before: handle.content_hash.clone(),
            hash_after,
            was_modified,
        }))
    }

    /// Release every outstanding handle. Individual failures are logged, not returned.
    pub async fn release_all(&self) -> Vec<ReleaseReport> {
        let handles: Vec<LockHandle> = lock_unpoisoned(&self.active)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        if !handles.is_empty() {
            log::info!("Releasing all {} active locks", handles.len());
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match self.release(&handle).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(err) => log::error!("Error releasing lock {}: {err}", handle.id),
            }
        }
        reports
    }

    pub fn active_count(&self) -> usize {
        lock_unpoisoned(&self.active).len()
    }

    pub fn active_locks(&self) -> Vec<LockHandle> {
        lock_unpoisoned(&self.active).values().cloned().collect()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        let active = match self.active.get_mut() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (id, handle) in active.drain() {
            if let Err(err) = handle.held.release() {
                log::warn!("Error releasing lock {id} on drop: {err}");
            }
        }
    }
}

fn open_for(path: &Path, mode: LockMode) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    if mode == LockMode::Write {
        options.write(true);
    }
    options.open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            LockError::NotFound(path.to_path_buf())
        } else {
            LockError::Io(err)
        }
    })
}

async fn hash_blocking(path: PathBuf) -> Result<String> {
    let display = path.clone();
    tokio::task::spawn_blocking(move || compute_file_hash(&path))
        .await
        .map_err(|err| LockError::failed(display, format!("join hash task: {err}")))?
        .map_err(LockError::from)
}

fn new_lock_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(1);

    let mut bytes = [0u8; 8];
    // Best effort; the sequence keeps ids unique within the process regardless.
    let _ = getrandom::getrandom(&mut bytes);
    format!(
        "{}-{:06x}",
        hex_encode_lower(&bytes),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
