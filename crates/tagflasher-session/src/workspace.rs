//! Build workspace shared by concurrent sessions
//!
//! The firmware project tree is shared, so only one build may run at a
//! time. Everything after the build (conversion, patching, flashing) works
//! on copies inside a per-session directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

/// Root of all session directories plus the build lock
#[derive(Debug)]
pub struct BuildWorkspace {
    root: PathBuf,
    build_lock: Mutex<()>,
}

impl BuildWorkspace {
    /// Create a workspace rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            build_lock: Mutex::new(()),
        }
    }

    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hold the build lock until the guard is dropped
    pub fn lock_build(&self) -> MutexGuard<'_, ()> {
        // The lock guards no data, so poisoning is ignored
        self.build_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create the directory for session `id`
    pub fn session_dir(&self, id: Uuid) -> io::Result<SessionDir> {
        let path = self.root.join(format!("session-{}", id.simple()));
        fs::create_dir_all(&path)?;
        Ok(SessionDir { path })
    }
}

/// A session's private directory, removed on drop
#[derive(Debug)]
pub struct SessionDir {
    path: PathBuf,
}

impl SessionDir {
    /// Directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the built HEX image
    pub fn firmware_hex(&self) -> PathBuf {
        self.path.join("firmware.hex")
    }

    /// Flattened firmware image
    pub fn firmware_bin(&self) -> PathBuf {
        self.path.join("firmware.bin")
    }

    /// Patched flat image
    pub fn patched_bin(&self) -> PathBuf {
        self.path.join("patched.bin")
    }

    /// Patched HEX image, ready to flash
    pub fn patched_hex(&self) -> PathBuf {
        self.path.join("patched.hex")
    }
}

impl Drop for SessionDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            log::debug!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_dirs_are_private_and_removed() {
        let root = tempfile::tempdir().unwrap();
        let ws = BuildWorkspace::new(root.path());
        let a = ws.session_dir(Uuid::new_v4()).unwrap();
        let b = ws.session_dir(Uuid::new_v4()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.patched_hex().starts_with(a.path()));

        fs::write(a.firmware_bin(), b"data").unwrap();
        let path = a.path().to_path_buf();
        drop(a);
        assert!(!path.exists());
        assert!(b.path().exists());
    }

    #[test]
    fn test_build_lock_serializes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let ws = Arc::new(BuildWorkspace::new("unused"));
        let active = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ws = ws.clone();
                let active = active.clone();
                std::thread::spawn(move || {
                    let _guard = ws.lock_build();
                    assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
