// Cross-platform shared memory path abstraction
//
// Linux: /dev/shm/shmloan (tmpfs - RAM-backed, fastest)
// macOS: /tmp/shmloan (regular filesystem, but still fast for IPC)
// Windows: %TEMP%\shmloan (uses system temp directory)

use std::path::PathBuf;

/// Get the base directory for shmloan shared memory
///
/// This returns a platform-appropriate path for shared memory:
/// - Linux: `/dev/shm/shmloan` (tmpfs for maximum performance)
/// - macOS: `/tmp/shmloan` (no /dev/shm, but /tmp is still fast)
/// - Windows: `%TEMP%\shmloan` (system temp directory)
pub fn shm_base_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm/shmloan")
    }

    #[cfg(target_os = "macos")]
    {
        // macOS doesn't have /dev/shm, use /tmp instead
        PathBuf::from("/tmp/shmloan")
    }

    #[cfg(target_os = "windows")]
    {
        std::env::temp_dir().join("shmloan")
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        // Fallback for other Unix-like systems (BSD, etc.)
        PathBuf::from("/tmp/shmloan")
    }
}

/// Get the directory holding every buffer's data and flag segments
pub fn shm_buffers_dir() -> PathBuf {
    shm_base_dir().join("buffers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_paths_are_valid() {
        let base = shm_base_dir();
        assert!(!base.as_os_str().is_empty());

        let buffers = shm_buffers_dir();
        assert!(buffers.starts_with(&base));
    }
}
