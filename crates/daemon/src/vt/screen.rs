//! Screen grid state.
//!
//! The grid retains rows beyond the visible viewport as bounded in-memory
//! scrollback: when output scrolls, new rows are appended and the oldest
//! rows are evicted once the configured cap is reached. Snapshots, patches,
//! and cursor positions are always viewport-relative.

use std::collections::{HashSet, VecDeque};

use protocol::{CursorPos, Line, Style};

use super::cell::{Cell, Row};

/// Absolute cursor position within the retained grid.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// Index into the retained grid (not the viewport).
    row: usize,
    col: u16,
    visible: bool,
}

#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    row: usize,
    col: u16,
    style: Style,
}

/// One grid plus its cursor state; the primary grid is stashed while the
/// alternate screen is active.
#[derive(Debug)]
struct GridState {
    grid: VecDeque<Row>,
    cursor: Cursor,
    saved: Option<SavedCursor>,
}

impl GridState {
    fn new(cols: u16, rows: u16) -> Self {
        Self {
            grid: (0..rows).map(|_| Row::new(cols)).collect(),
            cursor: Cursor {
                row: 0,
                col: 0,
                visible: true,
            },
            saved: None,
        }
    }
}

/// Viewport rows changed since the last drain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Damage {
    /// The whole viewport must be re-sent (scroll, resize, screen swap).
    pub full: bool,
    /// Individual dirty viewport rows, ascending. Empty when `full`.
    pub rows: Vec<u16>,
}

impl Damage {
    pub fn is_empty(&self) -> bool {
        !self.full && self.rows.is_empty()
    }
}

/// The terminal screen: viewport + bounded retained scrollback, cursor,
/// style state, alternate screen, and damage tracking.
pub struct Screen {
    cols: u16,
    view_rows: u16,
    max_rows: usize,
    active: GridState,
    stashed_primary: Option<Box<GridState>>,
    alt_active: bool,
    style: Style,
    autowrap: bool,
    /// Scroll region, viewport-relative, inclusive.
    scroll_top: u16,
    scroll_bottom: u16,
    title: String,
    dirty: HashSet<u16>,
    all_dirty: bool,
}

impl Screen {
    pub fn new(cols: u16, rows: u16, max_rows: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            view_rows: rows,
            max_rows: max_rows.max(rows as usize),
            active: GridState::new(cols, rows),
            stashed_primary: None,
            alt_active: false,
            style: Style::default(),
            autowrap: true,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            title: String::new(),
            dirty: HashSet::new(),
            all_dirty: true,
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.view_rows
    }

    /// Total retained rows including scrollback behind the viewport.
    pub fn retained_rows(&self) -> usize {
        self.active.grid.len()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = title;
    }

    pub(crate) fn style_mut(&mut self) -> &mut Style {
        &mut self.style
    }

    /// First grid index of the viewport.
    fn base(&self) -> usize {
        self.active.grid.len() - self.view_rows as usize
    }

    fn region_is_full(&self) -> bool {
        self.scroll_top == 0 && self.scroll_bottom == self.view_rows - 1
    }

    fn mark_dirty_abs(&mut self, row: usize) {
        if self.all_dirty {
            return;
        }
        let base = self.base();
        if row >= base {
            self.dirty.insert((row - base) as u16);
        }
    }

    fn mark_all_dirty(&mut self) {
        self.all_dirty = true;
        self.dirty.clear();
    }

    /// Drain accumulated damage.
    pub fn take_damage(&mut self) -> Damage {
        let damage = if self.all_dirty {
            Damage {
                full: true,
                rows: Vec::new(),
            }
        } else {
            let mut rows: Vec<u16> = self.dirty.iter().copied().collect();
            rows.sort_unstable();
            Damage { full: false, rows }
        };
        self.all_dirty = false;
        self.dirty.clear();
        damage
    }

    /// Full viewport snapshot: exactly `rows` lines of `cols` columns, plus
    /// the viewport-relative cursor.
    pub fn snapshot(&self) -> (Vec<Line>, CursorPos) {
        let base = self.base();
        let lines = self
            .active
            .grid
            .iter()
            .skip(base)
            .map(Row::to_line)
            .collect();
        (lines, self.cursor_pos())
    }

    pub fn cursor_pos(&self) -> CursorPos {
        let base = self.base();
        CursorPos {
            row: self.active.cursor.row.saturating_sub(base) as u16,
            col: self.active.cursor.col.min(self.cols - 1),
            visible: self.active.cursor.visible,
        }
    }

    /// One viewport row in wire form.
    pub fn line(&self, index: u16) -> Line {
        let base = self.base();
        self.active.grid[base + index as usize].to_line()
    }

    fn cap(&self) -> usize {
        if self.alt_active {
            // The alternate screen has no scrollback.
            self.view_rows as usize
        } else {
            self.max_rows
        }
    }

    fn enforce_cap(&mut self) {
        let cap = self.cap();
        while self.active.grid.len() > cap {
            self.active.grid.pop_front();
            self.active.cursor.row = self.active.cursor.row.saturating_sub(1);
            if let Some(saved) = self.active.saved.as_mut() {
                saved.row = saved.row.saturating_sub(1);
            }
        }
    }

    /// Write one printable character of the given width at the cursor.
    pub fn put_char(&mut self, ch: char, width: u16) {
        if width == 0 {
            // Combining characters are consumed; single-char cells only.
            return;
        }
        let width = width.min(2).min(self.cols);

        if self.active.cursor.col + width > self.cols {
            if self.autowrap {
                self.active.cursor.col = 0;
                self.linefeed();
            } else {
                self.active.cursor.col = self.cols - width;
            }
        }

        let row = self.active.cursor.row;
        let col = self.active.cursor.col as usize;
        let style = self.style;
        self.clear_wide_overlap(row, col);

        let cells = &mut self.active.grid[row].cells;
        cells[col] = Cell {
            ch,
            width: width as u8,
            style,
        };
        if width == 2 && col + 1 < cells.len() {
            cells[col + 1] = Cell::continuation(style);
        }

        self.mark_dirty_abs(row);
        self.active.cursor.col += width;
    }

    /// Writing over either half of a wide character blanks the other half.
    fn clear_wide_overlap(&mut self, row: usize, col: usize) {
        let cells = &mut self.active.grid[row].cells;
        if cells[col].is_continuation() && col > 0 {
            let style = cells[col - 1].style;
            cells[col - 1] = Cell::blank(style);
        }
        if cells[col].width == 2 && col + 1 < cells.len() {
            let style = cells[col + 1].style;
            cells[col + 1] = Cell::blank(style);
        }
    }

    pub fn carriage_return(&mut self) {
        self.active.cursor.col = 0;
    }

    pub fn backspace(&mut self) {
        let col = self.active.cursor.col.min(self.cols - 1);
        self.active.cursor.col = col.saturating_sub(1);
    }

    /// Move to the next multiple-of-8 tab stop.
    pub fn horizontal_tab(&mut self) {
        let next = (self.active.cursor.col / 8 + 1) * 8;
        self.active.cursor.col = next.min(self.cols - 1);
    }

    /// Line feed: scroll within the region at its bottom, otherwise append
    /// a new row when at the end of the grid.
    pub fn linefeed(&mut self) {
        let base = self.base();
        let cursor_row = self.active.cursor.row;

        if !self.region_is_full() && cursor_row == base + self.scroll_bottom as usize {
            self.scroll_region_up(1);
        } else if cursor_row + 1 >= self.active.grid.len() {
            if self.region_is_full() {
                self.active.grid.push_back(Row::new(self.cols));
                self.active.cursor.row += 1;
                self.enforce_cap();
                self.mark_all_dirty();
            }
            // Below a partial region: pinned at the bottom row.
        } else {
            self.active.cursor.row += 1;
        }
    }

    /// Index: same motion as line feed.
    pub fn index(&mut self) {
        self.linefeed();
    }

    /// Reverse index: scroll down when at the top of the region.
    pub fn reverse_index(&mut self) {
        let base = self.base();
        if self.active.cursor.row == base + self.scroll_top as usize {
            self.scroll_region_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    pub fn cursor_up(&mut self, n: u16) {
        let base = self.base();
        self.active.cursor.row = self
            .active
            .cursor
            .row
            .saturating_sub(n as usize)
            .max(base);
    }

    pub fn cursor_down(&mut self, n: u16) {
        let last = self.active.grid.len() - 1;
        self.active.cursor.row = (self.active.cursor.row + n as usize).min(last);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        self.active.cursor.col = (self.active.cursor.col + n).min(self.cols - 1);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        let col = self.active.cursor.col.min(self.cols - 1);
        self.active.cursor.col = col.saturating_sub(n);
    }

    /// Absolute positioning; parameters are 1-based per the wire format.
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        let base = self.base();
        self.active.cursor.row =
            base + row.saturating_sub(1).min(self.view_rows - 1) as usize;
        self.active.cursor.col = col.saturating_sub(1).min(self.cols - 1);
    }

    /// CHA: column only, 1-based.
    pub fn cursor_column(&mut self, col: u16) {
        self.active.cursor.col = col.saturating_sub(1).min(self.cols - 1);
    }

    /// VPA: row only, 1-based.
    pub fn cursor_row(&mut self, row: u16) {
        let base = self.base();
        self.active.cursor.row =
            base + row.saturating_sub(1).min(self.view_rows - 1) as usize;
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        self.active.cursor.visible = visible;
    }

    pub fn set_autowrap(&mut self, enabled: bool) {
        self.autowrap = enabled;
    }

    /// ED: erase within the viewport. Mode 3 is treated as mode 2.
    pub fn erase_in_display(&mut self, mode: u16) {
        let base = self.base();
        let cursor_row = self.active.cursor.row;
        let style = self.style;
        match mode {
            0 => {
                self.erase_in_line(0);
                for r in (cursor_row + 1)..self.active.grid.len() {
                    self.active.grid[r].clear(style);
                    self.mark_dirty_abs(r);
                }
            }
            1 => {
                for r in base..cursor_row {
                    self.active.grid[r].clear(style);
                    self.mark_dirty_abs(r);
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                for r in base..self.active.grid.len() {
                    self.active.grid[r].clear(style);
                }
                self.mark_all_dirty();
            }
            _ => {}
        }
    }

    /// EL: erase within the cursor row.
    pub fn erase_in_line(&mut self, mode: u16) {
        let row = self.active.cursor.row;
        let col = self.active.cursor.col.min(self.cols - 1) as usize;
        let style = self.style;
        match mode {
            0 => {
                for cell in &mut self.active.grid[row].cells[col..] {
                    *cell = Cell::blank(style);
                }
            }
            1 => {
                for cell in &mut self.active.grid[row].cells[..=col] {
                    *cell = Cell::blank(style);
                }
            }
            2 => self.active.grid[row].clear(style),
            _ => return,
        }
        self.mark_dirty_abs(row);
    }

    /// IL: insert blank rows at the cursor, pushing lower rows off the
    /// bottom of the viewport.
    pub fn insert_lines(&mut self, n: u16) {
        let row = self.active.cursor.row;
        for _ in 0..n {
            self.active.grid.insert(row, Row::new(self.cols));
            let _ = self.active.grid.pop_back();
        }
        self.mark_all_dirty();
    }

    /// DL: delete rows at the cursor, pulling blank rows in at the bottom.
    pub fn delete_lines(&mut self, n: u16) {
        let row = self.active.cursor.row;
        for _ in 0..n {
            let _ = self.active.grid.remove(row);
            self.active.grid.push_back(Row::new(self.cols));
        }
        self.mark_all_dirty();
    }

    /// ICH: shift cells right from the cursor, dropping off the row end.
    pub fn insert_chars(&mut self, n: u16) {
        let row = self.active.cursor.row;
        let col = self.active.cursor.col.min(self.cols - 1) as usize;
        let style = self.style;
        let cells = &mut self.active.grid[row].cells;
        for _ in 0..n.min(self.cols) {
            let _ = cells.pop();
            cells.insert(col, Cell::blank(style));
        }
        self.mark_dirty_abs(row);
    }

    /// DCH: shift cells left from the cursor, filling blanks at the end.
    pub fn delete_chars(&mut self, n: u16) {
        let row = self.active.cursor.row;
        let col = self.active.cursor.col.min(self.cols - 1) as usize;
        let style = self.style;
        let cells = &mut self.active.grid[row].cells;
        for _ in 0..n.min(self.cols) {
            cells.remove(col);
            cells.push(Cell::blank(style));
        }
        self.mark_dirty_abs(row);
    }

    /// ECH: blank cells at the cursor without shifting.
    pub fn erase_chars(&mut self, n: u16) {
        let row = self.active.cursor.row;
        let col = self.active.cursor.col.min(self.cols - 1) as usize;
        let style = self.style;
        let cells = &mut self.active.grid[row].cells;
        let end = (col + n as usize).min(cells.len());
        for cell in &mut cells[col..end] {
            *cell = Cell::blank(style);
        }
        self.mark_dirty_abs(row);
    }

    /// Scroll the region contents up, discarding the top row of the region.
    pub fn scroll_region_up(&mut self, n: u16) {
        let base = self.base();
        let top = base + self.scroll_top as usize;
        let bottom = base + self.scroll_bottom as usize;
        for _ in 0..n {
            let _ = self.active.grid.remove(top);
            self.active.grid.insert(bottom, Row::new(self.cols));
        }
        self.mark_all_dirty();
    }

    /// Scroll the region contents down, discarding the bottom row.
    pub fn scroll_region_down(&mut self, n: u16) {
        let base = self.base();
        let top = base + self.scroll_top as usize;
        let bottom = base + self.scroll_bottom as usize;
        for _ in 0..n {
            let _ = self.active.grid.remove(bottom);
            self.active.grid.insert(top, Row::new(self.cols));
        }
        self.mark_all_dirty();
    }

    /// DECSTBM, 1-based inclusive parameters.
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let top = top.saturating_sub(1).min(self.view_rows - 1);
        let bottom = bottom.saturating_sub(1).min(self.view_rows - 1);
        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        }
    }

    pub fn save_cursor(&mut self) {
        self.active.saved = Some(SavedCursor {
            row: self.active.cursor.row,
            col: self.active.cursor.col,
            style: self.style,
        });
    }

    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.active.saved {
            let base = self.base();
            let last = self.active.grid.len() - 1;
            self.active.cursor.row = saved.row.clamp(base, last);
            self.active.cursor.col = saved.col.min(self.cols - 1);
            self.style = saved.style;
        }
    }

    /// Enter the alternate screen: stash the primary grid and start from a
    /// fresh, blank, scrollback-free grid.
    pub fn enter_alternate(&mut self) {
        if self.alt_active {
            return;
        }
        let fresh = GridState::new(self.cols, self.view_rows);
        let primary = std::mem::replace(&mut self.active, fresh);
        self.stashed_primary = Some(Box::new(primary));
        self.alt_active = true;
        self.mark_all_dirty();
    }

    /// Leave the alternate screen, restoring the stashed primary grid.
    pub fn leave_alternate(&mut self) {
        if !self.alt_active {
            return;
        }
        if let Some(primary) = self.stashed_primary.take() {
            self.active = *primary;
        }
        self.alt_active = false;
        self.mark_all_dirty();
    }

    pub fn alternate_active(&self) -> bool {
        self.alt_active
    }

    /// RIS: back to a pristine screen.
    pub fn full_reset(&mut self) {
        self.active = GridState::new(self.cols, self.view_rows);
        self.stashed_primary = None;
        self.alt_active = false;
        self.style = Style::default();
        self.autowrap = true;
        self.scroll_top = 0;
        self.scroll_bottom = self.view_rows - 1;
        self.title.clear();
        self.mark_all_dirty();
    }

    /// Resize the viewport. Retained scrollback is truncated to the new
    /// viewport so the next snapshot is exactly `rows x cols`.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);

        Self::resize_state(&mut self.active, cols, rows);
        if let Some(primary) = self.stashed_primary.as_mut() {
            Self::resize_state(primary, cols, rows);
        }

        self.cols = cols;
        self.view_rows = rows;
        self.max_rows = self.max_rows.max(rows as usize);
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.mark_all_dirty();
    }

    fn resize_state(state: &mut GridState, cols: u16, rows: u16) {
        for row in state.grid.iter_mut() {
            row.resize(cols);
        }
        while state.grid.len() > rows as usize {
            state.grid.pop_front();
            state.cursor.row = state.cursor.row.saturating_sub(1);
            if let Some(saved) = state.saved.as_mut() {
                saved.row = saved.row.saturating_sub(1);
            }
        }
        while state.grid.len() < rows as usize {
            state.grid.push_back(Row::new(cols));
        }
        let last = state.grid.len() - 1;
        state.cursor.row = state.cursor.row.min(last);
        state.cursor.col = state.cursor.col.min(cols - 1);
        if let Some(saved) = state.saved.as_mut() {
            saved.row = saved.row.min(last);
            saved.col = saved.col.min(cols - 1);
        }
    }

    /// DEC private mode set/reset dispatch.
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            7 => self.set_autowrap(enable),
            25 => self.set_cursor_visible(enable),
            47 | 1047 => {
                if enable {
                    self.enter_alternate();
                } else {
                    self.leave_alternate();
                }
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.save_cursor();
                    self.enter_alternate();
                } else {
                    self.leave_alternate();
                    self.restore_cursor();
                }
            }
            // Application cursor keys, bracketed paste, mouse reporting and
            // friends change input encoding, not screen contents.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(screen: &Screen) -> Vec<String> {
        screen.snapshot().0.into_iter().map(|l| l.text).collect()
    }

    fn put_str(screen: &mut Screen, s: &str) {
        for ch in s.chars() {
            screen.put_char(ch, 1);
        }
    }

    #[test]
    fn snapshot_geometry() {
        let screen = Screen::new(10, 4, 100);
        let (lines, cursor) = screen.snapshot();
        assert_eq!(lines.len(), 4);
        for line in &lines {
            assert_eq!(line.text.len(), 10);
        }
        assert_eq!(cursor.row, 0);
        assert_eq!(cursor.col, 0);
        assert!(cursor.visible);
    }

    #[test]
    fn put_and_wrap() {
        let mut screen = Screen::new(5, 3, 100);
        put_str(&mut screen, "abcdefg");
        let lines = text(&screen);
        assert_eq!(lines[0], "abcde");
        assert_eq!(lines[1], "fg   ");
        assert_eq!(screen.cursor_pos().row, 1);
        assert_eq!(screen.cursor_pos().col, 2);
    }

    #[test]
    fn linefeed_at_bottom_appends_and_scrolls_viewport() {
        let mut screen = Screen::new(5, 2, 100);
        put_str(&mut screen, "aa");
        screen.carriage_return();
        screen.linefeed();
        put_str(&mut screen, "bb");
        screen.carriage_return();
        screen.linefeed();
        put_str(&mut screen, "cc");

        let lines = text(&screen);
        assert_eq!(lines, vec!["bb   ", "cc   "]);
        assert_eq!(screen.retained_rows(), 3);
    }

    #[test]
    fn row_cap_evicts_oldest_and_keeps_cursor_valid() {
        let mut screen = Screen::new(4, 2, 5);
        for i in 0..20 {
            put_str(&mut screen, &format!("{i:02}"));
            screen.carriage_return();
            screen.linefeed();
        }
        assert!(screen.retained_rows() <= 5);
        let cursor = screen.cursor_pos();
        assert!((cursor.row as usize) < 2);
        // Cursor must index a real retained row.
        let _ = screen.line(cursor.row);
    }

    #[test]
    fn cursor_position_is_viewport_relative() {
        let mut screen = Screen::new(10, 3, 100);
        // Scroll a few rows of history behind the viewport.
        for _ in 0..5 {
            screen.linefeed();
        }
        screen.cursor_position(2, 4);
        let cursor = screen.cursor_pos();
        assert_eq!(cursor.row, 1);
        assert_eq!(cursor.col, 3);

        put_str(&mut screen, "X");
        assert_eq!(text(&screen)[1].as_bytes()[3], b'X');
    }

    #[test]
    fn erase_display_to_end() {
        let mut screen = Screen::new(4, 3, 100);
        put_str(&mut screen, "aaaa");
        screen.cursor_position(2, 1);
        put_str(&mut screen, "bbbb");
        screen.cursor_position(3, 1);
        put_str(&mut screen, "cccc");

        screen.cursor_position(2, 3);
        screen.erase_in_display(0);
        assert_eq!(text(&screen), vec!["aaaa", "bb  ", "    "]);
    }

    #[test]
    fn erase_display_to_start() {
        let mut screen = Screen::new(4, 3, 100);
        put_str(&mut screen, "aaaa");
        screen.cursor_position(2, 1);
        put_str(&mut screen, "bbbb");
        screen.cursor_position(3, 1);
        put_str(&mut screen, "cccc");

        screen.cursor_position(2, 2);
        screen.erase_in_display(1);
        assert_eq!(text(&screen), vec!["    ", "  bb", "cccc"]);
    }

    #[test]
    fn erase_display_all() {
        let mut screen = Screen::new(4, 2, 100);
        put_str(&mut screen, "aaaa");
        screen.erase_in_display(2);
        assert_eq!(text(&screen), vec!["    ", "    "]);
    }

    #[test]
    fn erase_line_modes() {
        let mut screen = Screen::new(6, 1, 100);
        put_str(&mut screen, "abcdef");

        screen.cursor_column(3);
        screen.erase_in_line(0);
        assert_eq!(text(&screen)[0], "ab    ");

        put_str(&mut screen, "cdef");
        screen.cursor_column(3);
        screen.erase_in_line(1);
        assert_eq!(text(&screen)[0], "   def");

        screen.erase_in_line(2);
        assert_eq!(text(&screen)[0], "      ");
    }

    #[test]
    fn save_restore_cursor() {
        let mut screen = Screen::new(10, 4, 100);
        screen.cursor_position(3, 5);
        screen.save_cursor();
        screen.cursor_position(1, 1);
        screen.restore_cursor();
        let cursor = screen.cursor_pos();
        assert_eq!((cursor.row, cursor.col), (2, 4));
    }

    #[test]
    fn saved_cursor_shifts_on_eviction() {
        let mut screen = Screen::new(4, 2, 3);
        screen.save_cursor();
        for _ in 0..10 {
            screen.linefeed();
        }
        // Restore still lands inside the viewport.
        screen.restore_cursor();
        let cursor = screen.cursor_pos();
        assert!((cursor.row as usize) < 2);
    }

    #[test]
    fn alternate_screen_swap_and_restore() {
        let mut screen = Screen::new(8, 2, 100);
        put_str(&mut screen, "primary");

        screen.set_private_mode(1049, true);
        assert!(screen.alternate_active());
        assert_eq!(text(&screen), vec!["        ", "        "]);

        put_str(&mut screen, "alt");
        assert_eq!(text(&screen)[0], "alt     ");

        screen.set_private_mode(1049, false);
        assert!(!screen.alternate_active());
        assert_eq!(text(&screen)[0], "primary ");
    }

    #[test]
    fn alternate_screen_does_not_grow_scrollback() {
        let mut screen = Screen::new(4, 2, 100);
        screen.enter_alternate();
        for _ in 0..50 {
            screen.linefeed();
        }
        assert_eq!(screen.retained_rows(), 2);
        screen.leave_alternate();
        assert_eq!(screen.retained_rows(), 2);
    }

    #[test]
    fn scroll_region_rotation() {
        let mut screen = Screen::new(3, 4, 100);
        for (i, s) in ["aaa", "bbb", "ccc", "ddd"].iter().enumerate() {
            screen.cursor_position(i as u16 + 1, 1);
            put_str(&mut screen, s);
        }
        screen.set_scroll_region(2, 3);
        screen.cursor_position(3, 1);
        screen.linefeed();
        assert_eq!(text(&screen), vec!["aaa", "ccc", "   ", "ddd"]);
    }

    #[test]
    fn reverse_index_at_top_scrolls_down() {
        let mut screen = Screen::new(3, 3, 100);
        for (i, s) in ["aaa", "bbb", "ccc"].iter().enumerate() {
            screen.cursor_position(i as u16 + 1, 1);
            put_str(&mut screen, s);
        }
        screen.cursor_position(1, 1);
        screen.reverse_index();
        assert_eq!(text(&screen), vec!["   ", "aaa", "bbb"]);
    }

    #[test]
    fn insert_and_delete_lines() {
        let mut screen = Screen::new(3, 3, 100);
        for (i, s) in ["aaa", "bbb", "ccc"].iter().enumerate() {
            screen.cursor_position(i as u16 + 1, 1);
            put_str(&mut screen, s);
        }
        screen.cursor_position(2, 1);
        screen.insert_lines(1);
        assert_eq!(text(&screen), vec!["aaa", "   ", "bbb"]);

        screen.delete_lines(1);
        assert_eq!(text(&screen), vec!["aaa", "bbb", "   "]);
    }

    #[test]
    fn insert_delete_erase_chars() {
        let mut screen = Screen::new(6, 1, 100);
        put_str(&mut screen, "abcdef");

        screen.cursor_column(2);
        screen.insert_chars(2);
        assert_eq!(text(&screen)[0], "a  bcd");

        screen.delete_chars(2);
        assert_eq!(text(&screen)[0], "abcd  ");

        screen.cursor_column(1);
        screen.erase_chars(2);
        assert_eq!(text(&screen)[0], "  cd  ");
    }

    #[test]
    fn resize_truncates_to_exact_viewport() {
        let mut screen = Screen::new(10, 4, 100);
        for _ in 0..30 {
            screen.linefeed();
        }
        assert!(screen.retained_rows() > 4);

        screen.resize(6, 3);
        let (lines, cursor) = screen.snapshot();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert_eq!(line.text.len(), 6);
        }
        assert!(cursor.row < 3);
        assert!(cursor.col < 6);
        assert_eq!(screen.retained_rows(), 3);
    }

    #[test]
    fn resize_larger_pads_blank_rows() {
        let mut screen = Screen::new(4, 2, 100);
        put_str(&mut screen, "hi");
        screen.resize(8, 5);
        let (lines, _) = screen.snapshot();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].text, "hi      ");
    }

    #[test]
    fn wide_char_occupies_two_cells() {
        let mut screen = Screen::new(6, 1, 100);
        screen.put_char('日', 2);
        screen.put_char('x', 1);
        let cursor = screen.cursor_pos();
        assert_eq!(cursor.col, 3);
        assert_eq!(text(&screen)[0], "日x   ");
    }

    #[test]
    fn overwriting_wide_char_half_blanks_partner() {
        let mut screen = Screen::new(6, 1, 100);
        screen.put_char('日', 2);
        screen.cursor_column(2);
        screen.put_char('x', 1);
        assert_eq!(text(&screen)[0], " x    ");
    }

    #[test]
    fn damage_tracks_dirty_rows() {
        let mut screen = Screen::new(4, 3, 100);
        screen.take_damage();

        screen.cursor_position(2, 1);
        screen.put_char('a', 1);
        let damage = screen.take_damage();
        assert!(!damage.full);
        assert_eq!(damage.rows, vec![1]);

        // Drained; nothing new.
        assert!(screen.take_damage().is_empty());
    }

    #[test]
    fn scroll_marks_full_damage() {
        let mut screen = Screen::new(4, 2, 100);
        screen.take_damage();
        screen.linefeed();
        screen.linefeed();
        assert!(screen.take_damage().full);
    }

    #[test]
    fn full_reset_clears_everything() {
        let mut screen = Screen::new(4, 2, 100);
        put_str(&mut screen, "abcd");
        screen.set_title("work".to_string());
        screen.enter_alternate();
        screen.full_reset();
        assert!(!screen.alternate_active());
        assert_eq!(text(&screen), vec!["    ", "    "]);
        assert!(screen.title().is_empty());
    }
}
