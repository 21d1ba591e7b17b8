//! Escape-sequence parser.
//!
//! A byte-at-a-time state machine that drives [`Screen`] mutations. State
//! persists across `feed` calls, so escape sequences and multi-byte UTF-8
//! characters split across reads are buffered until complete. Unrecognized
//! sequences are consumed silently; parsing never fails.

use protocol::{Attrs, Color};
use unicode_width::UnicodeWidthChar;

use super::screen::Screen;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum State {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    /// ESC seen inside an OSC string; only `\` (ST) terminates it.
    OscEscape,
}

/// Maximum buffered OSC payload. Longer strings are truncated, not grown.
const MAX_OSC_LEN: usize = 1024;

#[derive(Debug, Default)]
pub struct Parser {
    state: State,
    params: Vec<u16>,
    current_param: Option<u16>,
    intermediates: Vec<u8>,
    osc: String,
    /// Partial UTF-8 sequence awaiting continuation bytes.
    utf8: Vec<u8>,
    utf8_len: usize,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte, mutating the screen.
    pub fn feed(&mut self, byte: u8, screen: &mut Screen) {
        // C0 controls act from any state except inside OSC strings, and
        // abort any partial UTF-8 sequence.
        if byte < 0x20 && self.state != State::OscString && self.state != State::OscEscape {
            self.utf8.clear();
            match byte {
                0x1b => self.enter_escape(),
                0x08 => screen.backspace(),
                0x09 => screen.horizontal_tab(),
                0x0a | 0x0b | 0x0c => screen.linefeed(),
                0x0d => screen.carriage_return(),
                // BEL and the rest are ignored.
                _ => {}
            }
            return;
        }

        match self.state {
            State::Ground => self.ground(byte, screen),
            State::Escape => self.escape(byte, screen),
            State::EscapeIntermediate => self.escape_intermediate(byte),
            State::CsiEntry => self.csi_entry(byte, screen),
            State::CsiParam => self.csi_param(byte, screen),
            State::CsiIntermediate => self.csi_intermediate(byte, screen),
            State::OscString => self.osc_string(byte, screen),
            State::OscEscape => self.osc_escape(byte, screen),
        }
    }

    fn enter_escape(&mut self) {
        self.state = State::Escape;
        self.params.clear();
        self.current_param = None;
        self.intermediates.clear();
    }

    fn ground(&mut self, byte: u8, screen: &mut Screen) {
        if byte < 0x80 {
            self.utf8.clear();
            if byte >= 0x20 && byte != 0x7f {
                self.print(byte as char, screen);
            }
            return;
        }

        // UTF-8 accumulation.
        if self.utf8.is_empty() {
            self.utf8_len = match byte {
                0xc2..=0xdf => 2,
                0xe0..=0xef => 3,
                0xf0..=0xf4 => 4,
                // Stray continuation or invalid leading byte.
                _ => {
                    self.print(char::REPLACEMENT_CHARACTER, screen);
                    return;
                }
            };
            self.utf8.push(byte);
        } else {
            self.utf8.push(byte);
            if self.utf8.len() == self.utf8_len {
                match std::str::from_utf8(&self.utf8) {
                    Ok(s) => {
                        if let Some(ch) = s.chars().next() {
                            self.print(ch, screen);
                        }
                    }
                    Err(_) => self.print(char::REPLACEMENT_CHARACTER, screen),
                }
                self.utf8.clear();
            }
        }
    }

    fn print(&mut self, ch: char, screen: &mut Screen) {
        let width = ch.width().unwrap_or(0) as u16;
        screen.put_char(ch, width);
    }

    fn escape(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            b'[' => {
                self.state = State::CsiEntry;
            }
            b']' => {
                self.osc.clear();
                self.state = State::OscString;
            }
            b'7' => {
                screen.save_cursor();
                self.state = State::Ground;
            }
            b'8' => {
                screen.restore_cursor();
                self.state = State::Ground;
            }
            b'D' => {
                screen.index();
                self.state = State::Ground;
            }
            b'E' => {
                screen.carriage_return();
                screen.linefeed();
                self.state = State::Ground;
            }
            b'M' => {
                screen.reverse_index();
                self.state = State::Ground;
            }
            b'c' => {
                screen.full_reset();
                self.state = State::Ground;
            }
            // Charset designation and similar two-byte escapes.
            0x20..=0x2f => {
                self.intermediates.push(byte);
                self.state = State::EscapeIntermediate;
            }
            _ => {
                self.state = State::Ground;
            }
        }
    }

    fn escape_intermediate(&mut self, byte: u8) {
        match byte {
            0x20..=0x2f => self.intermediates.push(byte),
            // Final byte: charset selections etc., consumed.
            _ => self.state = State::Ground,
        }
    }

    fn csi_entry(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some((byte - b'0') as u16);
                self.state = State::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = State::CsiParam;
            }
            b'?' | b'>' | b'<' | b'=' | b'!' => {
                self.intermediates.push(byte);
            }
            0x20..=0x2f => {
                self.intermediates.push(byte);
                self.state = State::CsiIntermediate;
            }
            0x40..=0x7e => self.dispatch_csi(byte, screen),
            _ => self.state = State::Ground,
        }
    }

    fn csi_param(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            b';' | b':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            0x20..=0x2f => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(byte);
                self.state = State::CsiIntermediate;
            }
            0x40..=0x7e => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.dispatch_csi(byte, screen);
            }
            _ => self.state = State::Ground,
        }
    }

    fn csi_intermediate(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            0x20..=0x2f => self.intermediates.push(byte),
            0x40..=0x7e => self.dispatch_csi(byte, screen),
            _ => self.state = State::Ground,
        }
    }

    fn osc_string(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            // BEL or ST terminates.
            0x07 => {
                self.dispatch_osc(screen);
                self.state = State::Ground;
            }
            0x1b => self.state = State::OscEscape,
            0x9c => {
                self.dispatch_osc(screen);
                self.state = State::Ground;
            }
            _ => {
                if self.osc.len() < MAX_OSC_LEN {
                    self.osc.push(byte as char);
                }
            }
        }
    }

    fn osc_escape(&mut self, byte: u8, screen: &mut Screen) {
        if byte == b'\\' {
            self.dispatch_osc(screen);
            self.state = State::Ground;
        } else {
            // Not ST; finish the OSC and reprocess as a fresh escape.
            self.dispatch_osc(screen);
            self.enter_escape();
            self.escape(byte, screen);
        }
    }

    fn param(&self, index: usize, default: u16) -> u16 {
        self.params.get(index).copied().unwrap_or(default)
    }

    fn param_min1(&self, index: usize) -> u16 {
        self.param(index, 1).max(1)
    }

    fn dispatch_csi(&mut self, final_byte: u8, screen: &mut Screen) {
        let private = self.intermediates.contains(&b'?');

        match (private, final_byte) {
            (false, b'A') => screen.cursor_up(self.param_min1(0)),
            (false, b'B') => screen.cursor_down(self.param_min1(0)),
            (false, b'C') => screen.cursor_forward(self.param_min1(0)),
            (false, b'D') => screen.cursor_backward(self.param_min1(0)),
            (false, b'E') => {
                screen.cursor_down(self.param_min1(0));
                screen.carriage_return();
            }
            (false, b'F') => {
                screen.cursor_up(self.param_min1(0));
                screen.carriage_return();
            }
            (false, b'G') => screen.cursor_column(self.param_min1(0)),
            (false, b'H') | (false, b'f') => {
                screen.cursor_position(self.param_min1(0), self.param_min1(1));
            }
            (false, b'd') => screen.cursor_row(self.param_min1(0)),

            (false, b'J') => screen.erase_in_display(self.param(0, 0)),
            (false, b'K') => screen.erase_in_line(self.param(0, 0)),

            (false, b'L') => screen.insert_lines(self.param_min1(0)),
            (false, b'M') => screen.delete_lines(self.param_min1(0)),
            (false, b'@') => screen.insert_chars(self.param_min1(0)),
            (false, b'P') => screen.delete_chars(self.param_min1(0)),
            (false, b'X') => screen.erase_chars(self.param_min1(0)),

            (false, b'S') => screen.scroll_region_up(self.param_min1(0)),
            (false, b'T') => screen.scroll_region_down(self.param_min1(0)),
            (false, b'r') => {
                let top = self.param(0, 1);
                let bottom = self.param(1, screen.rows());
                screen.set_scroll_region(top, bottom);
                screen.cursor_position(1, 1);
            }

            (false, b'm') => self.dispatch_sgr(screen),

            (false, b's') => screen.save_cursor(),
            (false, b'u') => screen.restore_cursor(),

            (true, b'h') => {
                for i in 0..self.params.len().max(1) {
                    screen.set_private_mode(self.param(i, 0), true);
                }
            }
            (true, b'l') => {
                for i in 0..self.params.len().max(1) {
                    screen.set_private_mode(self.param(i, 0), false);
                }
            }

            // DSR, DA, DECSCUSR, standard modes, and anything else:
            // consumed without effect.
            _ => {}
        }

        self.state = State::Ground;
    }

    fn dispatch_sgr(&mut self, screen: &mut Screen) {
        if self.params.is_empty() {
            *screen.style_mut() = Default::default();
            return;
        }

        let params = std::mem::take(&mut self.params);
        let mut iter = params.iter().copied();
        let style = screen.style_mut();

        while let Some(param) = iter.next() {
            match param {
                0 => *style = Default::default(),
                1 => style.attrs |= Attrs::BOLD,
                4 => style.attrs |= Attrs::UNDERLINE,
                7 => style.attrs |= Attrs::INVERSE,
                22 => style.attrs &= !Attrs::BOLD,
                24 => style.attrs &= !Attrs::UNDERLINE,
                27 => style.attrs &= !Attrs::INVERSE,

                30..=37 => style.fg = Color::Indexed((param - 30) as u8),
                38 => match Self::extended_color(&mut iter) {
                    Some(color) => style.fg = color,
                    None => break,
                },
                39 => style.fg = Color::Default,

                40..=47 => style.bg = Color::Indexed((param - 40) as u8),
                48 => match Self::extended_color(&mut iter) {
                    Some(color) => style.bg = color,
                    None => break,
                },
                49 => style.bg = Color::Default,

                90..=97 => style.fg = Color::Indexed((param - 90 + 8) as u8),
                100..=107 => style.bg = Color::Indexed((param - 100 + 8) as u8),

                // Dim, italic, blink, strikethrough and friends are not
                // part of the cell model; consumed.
                _ => {}
            }
        }
    }

    /// `38;5;n` and `38;2;r;g;b` forms (same for 48).
    fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
        match iter.next()? {
            5 => Some(Color::Indexed(iter.next()? as u8)),
            2 => {
                let r = iter.next()? as u8;
                let g = iter.next()? as u8;
                let b = iter.next()? as u8;
                Some(Color::Rgb(r, g, b))
            }
            _ => None,
        }
    }

    fn dispatch_osc(&mut self, screen: &mut Screen) {
        // "code;text" - only window-title codes carry observable state.
        if let Some((code, text)) = self.osc.split_once(';') {
            if matches!(code, "0" | "1" | "2") {
                screen.set_title(text.to_string());
            }
        }
        self.osc.clear();
    }
}
