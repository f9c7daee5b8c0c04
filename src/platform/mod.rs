use std::path::{Path, PathBuf};

/// Platform-specific filesystem operations behind a common interface,
/// so call sites stay free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Root data directory.
    /// Unix: `~/.agent-manager`, Windows: `%APPDATA%\agent-manager`.
    fn data_dir() -> PathBuf;
}

/// `AGENT_MANAGER_DATA_DIR` wins over the platform default.
fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var("AGENT_MANAGER_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
