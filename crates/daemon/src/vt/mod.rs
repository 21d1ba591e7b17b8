//! VT screen engine.
//!
//! A from-scratch terminal emulation state machine: [`Parser`] interprets
//! the raw output stream, [`Screen`] holds the authoritative grid, and
//! [`Emulator`] ties them together behind the three operations the runtime
//! needs: `feed`, `snapshot`, `resize`. Pure state, no I/O.

mod cell;
mod parser;
mod screen;

pub use cell::{Cell, Row};
pub use parser::Parser;
pub use screen::{Damage, Screen};

use protocol::{CursorPos, Line};

/// The terminal emulation engine for one window.
pub struct Emulator {
    parser: Parser,
    screen: Screen,
}

impl Emulator {
    /// `max_rows` bounds retained rows (viewport + scrollback) per window.
    pub fn new(cols: u16, rows: u16, max_rows: usize) -> Self {
        Self {
            parser: Parser::new(),
            screen: Screen::new(cols, rows, max_rows),
        }
    }

    /// Interpret a chunk of raw process output, mutating the grid in place.
    /// Never fails; malformed input is consumed best-effort.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.parser.feed(byte, &mut self.screen);
        }
    }

    /// Full viewport snapshot: exactly `rows` lines plus the cursor.
    pub fn snapshot(&self) -> (Vec<Line>, CursorPos) {
        self.screen.snapshot()
    }

    /// One viewport row in wire form.
    pub fn line(&self, index: u16) -> Line {
        self.screen.line(index)
    }

    /// Resize the viewport, truncating retention and clamping the cursor.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.screen.resize(cols, rows);
    }

    /// Drain the set of viewport rows changed since the last call.
    pub fn take_damage(&mut self) -> Damage {
        self.screen.take_damage()
    }

    pub fn size(&self) -> (u16, u16) {
        (self.screen.cols(), self.screen.rows())
    }

    /// Total retained rows; bounded by `max_rows`.
    pub fn retained_rows(&self) -> usize {
        self.screen.retained_rows()
    }

    /// Window title from the last OSC title sequence.
    pub fn title(&self) -> &str {
        self.screen.title()
    }
}
