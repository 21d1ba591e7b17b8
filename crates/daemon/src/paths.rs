//! Well-known per-user locations for sockets and state.
//!
//! Follows the XDG Base Directory Specification:
//! - sockets under `$XDG_RUNTIME_DIR/agentmux/`, falling back to
//!   `/tmp/agentmux-$UID/`
//! - pid file and data under `$XDG_DATA_HOME/agentmux/`, falling back to
//!   `~/.local/share/agentmux/`
//! - config under `~/.config/agentmux/`
//!
//! Everything binds to local sockets only; nothing is ever exposed on a
//! network interface.

use std::path::PathBuf;

/// Directory holding the daemon's sockets.
pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir).join("agentmux");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let uid = std::fs::metadata("/proc/self").map(|m| m.uid()).unwrap_or(0);
        PathBuf::from(format!("/tmp/agentmux-{uid}"))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from("/tmp/agentmux")
    }
}

/// The stream (push) socket.
pub fn stream_socket_path() -> PathBuf {
    runtime_dir().join("stream.sock")
}

/// The control (request/response) socket.
pub fn control_socket_path() -> PathBuf {
    runtime_dir().join("control.sock")
}

/// Directory for persistent daemon state.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        })
        .join("agentmux")
}

/// The daemon pid file.
pub fn pid_file_path() -> PathBuf {
    data_dir().join("daemon.pid")
}

/// Default config file location.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("agentmux")
        .join("config.toml")
}
