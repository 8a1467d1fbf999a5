//! Console Session Resolution
//!
//! Determines who owns the interactive console by reading the owner of
//! the console device node. Display managers chown the device to the
//! logged-in user and back to root at the login screen, so a root-owned
//! console reads as "no session".

use std::ffi::CStr;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::Context;

use powergrid_core::session::{Session, SessionSource};

const DEFAULT_CONSOLE_PATH: &str = "/dev/console";

/// Resolves the console owner via device-node ownership.
pub struct ConsoleSessionSource {
    console_path: PathBuf,
}

impl ConsoleSessionSource {
    /// Source watching the default console device.
    #[must_use]
    pub fn new() -> Self {
        Self::at(DEFAULT_CONSOLE_PATH)
    }

    /// Source watching a specific device node (tests, odd setups).
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            console_path: path.into(),
        }
    }
}

impl Default for ConsoleSessionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSource for ConsoleSessionSource {
    fn current(&self) -> anyhow::Result<Option<Session>> {
        let uid = console_owner(&self.console_path)?;
        if uid == 0 {
            return Ok(None);
        }
        Ok(Some(resolve_user(uid)))
    }
}

fn console_owner(path: &Path) -> anyhow::Result<u32> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("reading console device {}", path.display()))?;
    Ok(meta.uid())
}

/// Look up the passwd entry for `uid`. A missing entry still yields a
/// usable session; the uid is what the config store keys on.
fn resolve_user(uid: u32) -> Session {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr().cast(),
            buf.len(),
            &mut result,
        )
    };

    if rc == 0 && !result.is_null() {
        let username = unsafe { CStr::from_ptr(pwd.pw_name) }
            .to_string_lossy()
            .into_owned();
        let home_dir = PathBuf::from(
            unsafe { CStr::from_ptr(pwd.pw_dir) }
                .to_string_lossy()
                .into_owned(),
        );
        Session {
            uid,
            username,
            home_dir,
        }
    } else {
        tracing::warn!(uid, "No passwd entry for console owner");
        Session {
            uid,
            username: format!("uid-{uid}"),
            home_dir: PathBuf::new(),
        }
    }
}
