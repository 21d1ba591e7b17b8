//! Screen cells and rows.

use protocol::{Line, Style, StyleRun};

/// One grid cell: a character plus its style.
///
/// Wide characters occupy two cells: the character itself with `width == 2`
/// followed by a zero-width continuation cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub ch: char,
    pub width: u8,
    pub style: Style,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            width: 1,
            style: Style::default(),
        }
    }
}

impl Cell {
    /// A blank cell carrying the given style. Used by erase operations.
    pub fn blank(style: Style) -> Self {
        Self {
            ch: ' ',
            width: 1,
            style,
        }
    }

    /// The trailing half of a wide character.
    pub fn continuation(style: Style) -> Self {
        Self {
            ch: ' ',
            width: 0,
            style,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }
}

/// A fixed-width row of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
        }
    }

    pub fn resize(&mut self, cols: u16) {
        self.cells.resize(cols as usize, Cell::default());
        // A wide character cut in half at the new edge becomes a blank.
        if let Some(last) = self.cells.last_mut() {
            if last.width == 2 {
                *last = Cell::blank(last.style);
            }
        }
    }

    pub fn clear(&mut self, style: Style) {
        for cell in &mut self.cells {
            *cell = Cell::blank(style);
        }
    }

    /// Convert to the wire representation: text plus run-length encoded
    /// styles over display columns. All-default rows get an empty run list.
    pub fn to_line(&self) -> Line {
        let mut text = String::with_capacity(self.cells.len());
        let mut runs: Vec<StyleRun> = Vec::new();
        let mut any_styled = false;

        for cell in &self.cells {
            if cell.is_continuation() {
                // Covered by the preceding wide character's run width.
                continue;
            }
            text.push(cell.ch);
            if !cell.style.is_default() {
                any_styled = true;
            }
            match runs.last_mut() {
                Some(run) if run.style == cell.style => run.width += cell.width as u16,
                _ => runs.push(StyleRun {
                    width: cell.width as u16,
                    style: cell.style,
                }),
            }
        }

        Line {
            text,
            runs: if any_styled { runs } else { Vec::new() },
        }
    }
}
