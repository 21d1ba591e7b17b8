//! Pid-file handling for daemon running detection.
//!
//! Stale pid files (no such process, unparsable contents) are cleaned up
//! on read so a crashed daemon never blocks the next start.

use std::fs;
use std::io;

use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::paths::pid_file_path;

/// Whether an agentmux daemon appears to be running.
pub fn is_daemon_running() -> bool {
    daemon_pid().is_some()
}

/// The running daemon's pid, if any.
pub fn daemon_pid() -> Option<u32> {
    let path = pid_file_path();
    let contents = fs::read_to_string(&path).ok()?;

    let pid: u32 = match contents.trim().parse() {
        Ok(pid) => pid,
        Err(_) => {
            let _ = fs::remove_file(&path);
            return None;
        }
    };

    if process_exists(pid) {
        Some(pid)
    } else {
        let _ = fs::remove_file(&path);
        None
    }
}

/// Record this process as the running daemon.
pub fn write_pid_file() -> io::Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, format!("{}\n", std::process::id()))
}

/// Remove the pid file on clean shutdown.
pub fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn process_exists(pid: u32) -> bool {
    // Signal 0 probes for existence without touching the process.
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
