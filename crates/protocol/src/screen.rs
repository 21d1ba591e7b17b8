//! Shared screen and window types.
//!
//! These are the wire-level representations of what a window looks like:
//! identities, statuses, and styled screen lines. The daemon's emulation
//! engine produces them; clients hold and render them.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Stable identity of one window: owning session plus instance name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId {
    /// Owning session (project) name.
    pub session: String,
    /// Window instance name within the session.
    pub window: String,
}

impl WindowId {
    /// Build an id from session and window names.
    pub fn new(session: impl Into<String>, window: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            window: window.into(),
        }
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.window)
    }
}

impl FromStr for WindowId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((session, window)) if !session.is_empty() && !window.is_empty() => {
                Ok(Self::new(session, window))
            }
            _ => Err(format!("invalid window id (expected session:window): {s}")),
        }
    }
}

/// Lifecycle status of a window. Transitions are monotonic: a relaunch is a
/// new window, never a resurrected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    /// Spawn requested, process not confirmed yet.
    Starting,
    /// Process is alive.
    Running,
    /// Process terminated.
    Exited,
    /// Spawn failed.
    Error,
}

impl WindowStatus {
    /// Whether this is a terminal state.
    pub fn is_final(self) -> bool {
        matches!(self, WindowStatus::Exited | WindowStatus::Error)
    }
}

bitflags! {
    /// Per-cell attribute bits carried on the wire. Serde impls come from
    /// the bitflags `serde` feature.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Attrs: u8 {
        const BOLD      = 0b0000_0001;
        const UNDERLINE = 0b0000_0010;
        const INVERSE   = 0b0000_0100;
    }
}

/// A foreground or background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Color {
    /// Terminal default for the slot.
    #[default]
    Default,
    /// Indexed palette color (0-255).
    Indexed(u8),
    /// Truecolor.
    Rgb(u8, u8, u8),
}

/// Style of one or more consecutive cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Style {
    pub fg: Color,
    pub bg: Color,
    pub attrs: Attrs,
}

impl Style {
    /// Whether this is the all-default style.
    pub fn is_default(&self) -> bool {
        *self == Style::default()
    }
}

/// A run of `width` display columns sharing one style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRun {
    /// Number of display columns covered.
    pub width: u16,
    /// Style of those columns.
    pub style: Style,
}

/// One screen row on the wire: its text plus run-length encoded styles.
///
/// The total width of `runs` equals the window's column count. An empty
/// `runs` means the whole line is default-styled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// Row text. For plain ASCII content its length equals the column
    /// count; wide characters cover two columns with a single char.
    pub text: String,
    /// Style runs over display columns; empty means all default.
    pub runs: Vec<StyleRun>,
}

impl Line {
    /// A default-styled line with the given text.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            runs: Vec::new(),
        }
    }

    /// A default-styled blank line of `cols` spaces.
    pub fn blank(cols: u16) -> Self {
        Self::plain(" ".repeat(cols as usize))
    }
}

/// Cursor position within the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorPos {
    /// Viewport row, 0-based.
    pub row: u16,
    /// Column, 0-based.
    pub col: u16,
    /// Whether the cursor is visible (DECTCEM).
    pub visible: bool,
}

/// Summary of one window as reported by `list_windows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub id: WindowId,
    pub status: WindowStatus,
    /// Unix epoch milliseconds of the last output or input activity.
    pub last_activity_ms: u64,
    pub cols: u16,
    pub rows: u16,
    /// Exit code, for exited windows.
    pub exit_code: Option<i32>,
    /// Terminating signal, for signal-killed windows.
    pub signal: Option<i32>,
    /// Captured failure message, for windows that never spawned.
    pub message: Option<String>,
}
