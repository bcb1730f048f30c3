use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;
use tracing::{info, warn};

use crate::app::error::LifecycleError;

const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Lock file keyed by the running executable's name.
pub fn default_lock_path() -> PathBuf {
    let stem = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|stem| stem.to_string_lossy().to_string()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    std::env::temp_dir().join(format!("{stem}-instance.lock"))
}

/// System-wide exclusive ownership of the bridge server.
///
/// The OS drops the lock when the holder dies, so a crashed owner leaves
/// only its stamp in the file; the next process inherits it silently.
/// `release` consumes the guard, which makes a double release unrepresentable.
#[derive(Debug)]
pub struct SingleInstanceGuard {
    file: File,
    path: PathBuf,
    inherited: bool,
}

impl SingleInstanceGuard {
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LifecycleError> {
        let io_err = |source: std::io::Error| LifecycleError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        warn!(lock = %path.display(), "Trying to acquire server lock...");
        // No deadline means the wait is too long to represent; keep trying.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        warn!(lock = %path.display(), "Failed to acquire server lock; another instance may be running");
                        return Err(LifecycleError::AlreadyRunning {
                            lock_path: path.to_path_buf(),
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(io_err(err)),
            }
        }

        let mut stamp_bytes = Vec::new();
        file.read_to_end(&mut stamp_bytes).map_err(io_err)?;
        let previous = String::from_utf8_lossy(&stamp_bytes);
        let inherited = !previous.trim().is_empty();
        if inherited {
            info!(lock = %path.display(), previous_owner = %previous.trim(), "inherited lock from abandoned owner");
        }

        let stamp = format!("pid={} acquired_at={}\n", std::process::id(), Utc::now().to_rfc3339());
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.write_all(stamp.as_bytes()).map_err(io_err)?;
        let _ = file.sync_all();

        info!(lock = %path.display(), "server lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            inherited,
        })
    }

    /// True when the previous holder exited without releasing.
    pub fn inherited(&self) -> bool {
        self.inherited
    }

    pub fn release(self) {
        // An empty file marks a clean release.
        let _ = self.file.set_len(0);
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %err, "failed to unlock server lock");
        }
        info!(lock = %self.path.display(), "server lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_and_release_allows_reacquire() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("console.lock");
        let guard = SingleInstanceGuard::acquire(&path, Duration::from_secs(1)).expect("acquire");
        assert!(!guard.inherited());
        guard.release();

        let again = SingleInstanceGuard::acquire(&path, Duration::from_secs(1)).expect("reacquire");
        assert!(!again.inherited());
        again.release();
    }

    #[test]
    fn held_lock_times_out_as_already_running() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("console.lock");
        let holder = SingleInstanceGuard::acquire(&path, Duration::from_secs(1)).expect("acquire");

        let start = Instant::now();
        let err = SingleInstanceGuard::acquire(&path, Duration::from_millis(300))
            .expect_err("expected contention");
        assert!(matches!(err, LifecycleError::AlreadyRunning { .. }));
        assert!(start.elapsed() >= Duration::from_millis(300));
        holder.release();
    }

    #[test]
    fn stale_stamp_is_inherited() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("console.lock");
        std::fs::write(&path, "pid=4242 acquired_at=2024-01-01T00:00:00Z\n").expect("stamp");

        let guard = SingleInstanceGuard::acquire(&path, Duration::from_secs(1)).expect("acquire");
        assert!(guard.inherited());
        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.contains(&format!("pid={}", std::process::id())));
        guard.release();
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "");
    }

    #[test]
    fn binary_stamp_still_counts_as_inherited() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("console.lock");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x9f]).expect("stamp");

        let guard = SingleInstanceGuard::acquire(&path, Duration::from_secs(1)).expect("acquire");
        assert!(guard.inherited());
        guard.release();
    }

    #[test]
    fn unbounded_wait_on_free_lock_does_not_overflow() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("console.lock");
        let guard = SingleInstanceGuard::acquire(&path, Duration::from_secs(u64::MAX)).expect("acquire");
        assert!(!guard.inherited());
        guard.release();
    }

    #[test]
    fn waits_for_holder_within_timeout() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("console.lock");
        let holder = SingleInstanceGuard::acquire(&path, Duration::from_secs(1)).expect("acquire");
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            holder.release();
        });
        let guard = SingleInstanceGuard::acquire(&path, Duration::from_secs(5)).expect("acquire after release");
        releaser.join().expect("join");
        guard.release();
    }

    #[test]
    fn default_path_lives_in_temp_dir() {
        let path = default_lock_path();
        assert!(path.starts_with(std::env::temp_dir()));
        assert!(path.to_string_lossy().ends_with("-instance.lock"));
    }
}
