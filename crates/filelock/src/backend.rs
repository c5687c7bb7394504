use crate::LockMode;
use std::fs::File;
use std::io;
use std::sync::{Arc, OnceLock};

/// Platform primitive behind [`crate::LockManager`].
///
/// Every backend offers the same contract: a non-blocking attempt that reports contention as
/// `Ok(false)` instead of an error, shared locks for [`LockMode::Read`] and exclusive locks for
/// [`LockMode::Write`]. Retrying and deadlines live in the manager, not here.
pub trait FileLock: Send + Sync + std::fmt::Debug {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Try to take the lock without blocking.
    fn try_lock(&self, file: &File, mode: LockMode) -> io::Result<bool>;

    /// Drop the lock held through `file`.
    fn unlock(&self, file: &File) -> io::Result<()>;
}

/// `flock(2)` based locks for unix hosts.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FlockBackend;

#[cfg(unix)]
impl FileLock for FlockBackend {
    fn name(&self) -> &'static str {
        "flock"
    }

    fn try_lock(&self, file: &File, mode: LockMode) -> io::Result<bool> {
        use std::os::unix::io::AsRawFd;

        let op = match mode {
            LockMode::Read => libc::LOCK_SH,
            LockMode::Write => libc::LOCK_EX,
        } | libc::LOCK_NB;

        // SAFETY: the descriptor is owned by `file`, which outlives this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        Err(err)
    }

    fn unlock(&self, file: &File) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        // SAFETY: see `try_lock`.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Portable locks through `fs2` (`LockFileEx` on Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct Fs2Backend;

impl FileLock for Fs2Backend {
    fn name(&self) -> &'static str {
        "fs2"
    }

    fn try_lock(&self, file: &File, mode: LockMode) -> io::Result<bool> {
        // Path syntax: std's inherent `File::try_lock_*` would shadow the trait methods.
        let attempt = match mode {
            LockMode::Read => fs2::FileExt::try_lock_shared(file),
            LockMode::Write => fs2::FileExt::try_lock_exclusive(file),
        };
        match attempt {
            Ok(()) => Ok(true),
            Err(err) if is_contended(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn unlock(&self, file: &File) -> io::Result<()> {
        fs2::FileExt::unlock(file)
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Backend for the current host, selected once per process.
pub fn platform_backend() -> Arc<dyn FileLock> {
    static BACKEND: OnceLock<Arc<dyn FileLock>> = OnceLock::new();
    BACKEND
        .get_or_init(|| {
            let backend = select_backend();
            log::debug!("Using {} file lock backend", backend.name());
            backend
        })
        .clone()
}

#[cfg(unix)]
fn select_backend() -> Arc<dyn FileLock> {
    Arc::new(FlockBackend)
}

#[cfg(not(unix))]
fn select_backend() -> Arc<dyn FileLock> {
    Arc::new(Fs2Backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn open(path: &std::path::Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .expect("open")
    }

    fn backends() -> Vec<Arc<dyn FileLock>> {
        let mut all: Vec<Arc<dyn FileLock>> = vec![Arc::new(Fs2Backend)];
        #[cfg(unix)]
        all.push(Arc::new(FlockBackend));
        all
    }

    #[test]
    fn shared_locks_coexist_and_block_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "||a.com^\n").expect("write");

        for backend in backends() {
            let a = open(&path);
            let b = open(&path);
            let c = open(&path);
            assert!(backend.try_lock(&a, LockMode::Read).expect("lock a"));
            assert!(backend.try_lock(&b, LockMode::Read).expect("lock b"));
            assert!(
                !backend.try_lock(&c, LockMode::Write).expect("lock c"),
                "{} allowed exclusive over shared",
                backend.name()
            );
            backend.unlock(&a).expect("unlock a");
            backend.unlock(&b).expect("unlock b");
            assert!(backend.try_lock(&c, LockMode::Write).expect("relock c"));
            backend.unlock(&c).expect("unlock c");
        }
    }

    #[test]
    fn exclusive_lock_blocks_shared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "").expect("write");

        for backend in backends() {
            let writer = open(&path);
            let reader = open(&path);
            assert!(backend.try_lock(&writer, LockMode::Write).expect("lock"));
            assert!(!backend.try_lock(&reader, LockMode::Read).expect("try"));
            backend.unlock(&writer).expect("unlock");
        }
    }

    #[test]
    fn platform_backend_is_stable() {
        assert_eq!(platform_backend().name(), platform_backend().name());
    }
}
