//! Client-held screen state.
//!
//! A [`ScreenModel`] mirrors one window's viewport from frames and patches.
//! Patches apply only when their sequence number is exactly one past the
//! last applied update and the geometry matches; anything else desyncs the
//! model, which then ignores patches until the next full frame.

use protocol::{CursorPos, FrameUpdate, Line, PatchUpdate};

/// Result of offering an update to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The update was applied.
    Ok,
    /// The update was older than current state and ignored.
    Stale,
    /// The update could not be applied; a fresh frame is needed.
    Desynced,
}

/// One window's screen as the client knows it.
#[derive(Debug, Clone, Default)]
pub struct ScreenModel {
    seq: u64,
    lines: Vec<Line>,
    cursor: CursorPos,
    synced: bool,
}

impl ScreenModel {
    /// An empty, desynced model awaiting its first frame.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether patches are currently being accepted.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn cursor(&self) -> CursorPos {
        self.cursor
    }

    /// Viewport text, one string per row.
    pub fn text(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.text.clone()).collect()
    }

    /// Drop state; patches are ignored until the next frame. Called on
    /// disconnect so nothing is ever applied against a stale baseline.
    pub fn invalidate(&mut self) {
        self.synced = false;
    }

    /// A frame replaces the model wholesale.
    pub fn apply_frame(&mut self, frame: &FrameUpdate) -> Applied {
        if self.synced && frame.seq < self.seq {
            return Applied::Stale;
        }
        self.seq = frame.seq;
        self.lines = frame.lines.clone();
        self.cursor = frame.cursor;
        self.synced = true;
        Applied::Ok
    }

    /// A patch applies only on top of its exact predecessor.
    pub fn apply_patch(&mut self, patch: &PatchUpdate) -> Applied {
        if !self.synced {
            return Applied::Desynced;
        }
        if patch.seq <= self.seq {
            return Applied::Stale;
        }
        if patch.seq != self.seq + 1 || patch.line_count as usize != self.lines.len() {
            self.synced = false;
            return Applied::Desynced;
        }

        for op in &patch.ops {
            match self.lines.get_mut(op.index as usize) {
                Some(line) => *line = op.line.clone(),
                None => {
                    self.synced = false;
                    return Applied::Desynced;
                }
            }
        }
        self.seq = patch.seq;
        Applied::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{PatchOp, WindowId};

    fn wid() -> WindowId {
        WindowId::new("proj", "main")
    }

    fn frame(seq: u64, texts: &[&str]) -> FrameUpdate {
        FrameUpdate {
            window: wid(),
            seq,
            lines: texts.iter().map(|t| Line::plain(*t)).collect(),
            cursor: CursorPos::default(),
        }
    }

    fn patch(seq: u64, line_count: u16, ops: &[(u16, &str)]) -> PatchUpdate {
        PatchUpdate {
            window: wid(),
            seq,
            line_count,
            ops: ops
                .iter()
                .map(|(index, text)| PatchOp {
                    index: *index,
                    line: Line::plain(*text),
                })
                .collect(),
        }
    }

    #[test]
    fn starts_desynced() {
        let mut model = ScreenModel::new();
        assert!(!model.is_synced());
        assert_eq!(model.apply_patch(&patch(1, 2, &[(0, "x")])), Applied::Desynced);
    }

    #[test]
    fn frame_then_patches() {
        let mut model = ScreenModel::new();
        model.apply_frame(&frame(5, &["aa", "bb"]));
        assert!(model.is_synced());

        assert_eq!(model.apply_patch(&patch(6, 2, &[(1, "cc")])), Applied::Ok);
        assert_eq!(model.text(), vec!["aa", "cc"]);
        assert_eq!(model.seq(), 6);
    }

    #[test]
    fn gap_desyncs_until_next_frame() {
        let mut model = ScreenModel::new();
        model.apply_frame(&frame(5, &["aa", "bb"]));

        assert_eq!(model.apply_patch(&patch(8, 2, &[(0, "xx")])), Applied::Desynced);
        assert!(!model.is_synced());
        // Content untouched by the rejected patch.
        assert_eq!(model.text(), vec!["aa", "bb"]);

        model.apply_frame(&frame(9, &["xx", "yy"]));
        assert!(model.is_synced());
        assert_eq!(model.apply_patch(&patch(10, 2, &[(0, "zz")])), Applied::Ok);
    }

    #[test]
    fn stale_patch_is_ignored_without_desync() {
        let mut model = ScreenModel::new();
        model.apply_frame(&frame(5, &["aa"]));
        assert_eq!(model.apply_patch(&patch(4, 1, &[(0, "old")])), Applied::Stale);
        assert!(model.is_synced());
        assert_eq!(model.text(), vec!["aa"]);
    }

    #[test]
    fn geometry_mismatch_desyncs() {
        let mut model = ScreenModel::new();
        model.apply_frame(&frame(5, &["aa", "bb"]));
        assert_eq!(model.apply_patch(&patch(6, 3, &[(0, "xx")])), Applied::Desynced);
    }

    #[test]
    fn stale_frame_is_ignored() {
        let mut model = ScreenModel::new();
        model.apply_frame(&frame(10, &["new"]));
        assert_eq!(model.apply_frame(&frame(3, &["old"])), Applied::Stale);
        assert_eq!(model.text(), vec!["new"]);
    }

    #[test]
    fn invalidate_blocks_patches() {
        let mut model = ScreenModel::new();
        model.apply_frame(&frame(5, &["aa"]));
        model.invalidate();
        assert_eq!(model.apply_patch(&patch(6, 1, &[(0, "xx")])), Applied::Desynced);

        // A reconnect frame restores sync.
        model.apply_frame(&frame(7, &["bb"]));
        assert!(model.is_synced());
    }

    #[test]
    fn out_of_range_op_desyncs() {
        let mut model = ScreenModel::new();
        model.apply_frame(&frame(1, &["aa"]));
        assert_eq!(model.apply_patch(&patch(2, 1, &[(5, "xx")])), Applied::Desynced);
    }
}
