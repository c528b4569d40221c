//! Cursor and viewport reconciliation over a line buffer.
//!
//! Invariant after every call: `cursor < len` (or 0 for an empty buffer) and
//! `offset <= cursor < offset + height`. Each call re-centers at most once.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    cursor: usize,
    offset: usize,
    height: usize,
    len: usize,
}

impl Viewport {
    pub fn new(len: usize, height: usize) -> Self {
        Self {
            cursor: 0,
            offset: 0,
            height: height.max(1),
            len,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Range of visible line indices.
    pub fn window(&self) -> std::ops::Range<usize> {
        self.offset..(self.offset + self.height).min(self.len)
    }

    fn half(&self) -> usize {
        self.height / 2
    }

    fn last_line(&self) -> usize {
        self.len.saturating_sub(1)
    }

    /// Keep half a window of headroom below the last line.
    fn max_offset(&self) -> usize {
        self.len.saturating_sub(self.half().max(1))
    }

    fn cursor_visible(&self) -> bool {
        self.cursor >= self.offset && self.cursor < self.offset + self.height
    }

    /// Place the cursor, re-centering the viewport if it left the window.
    pub fn move_to(&mut self, line: usize) {
        self.cursor = line.min(self.last_line());
        if !self.cursor_visible() {
            self.offset = self.cursor.saturating_sub(self.half()).min(self.max_offset());
        }
    }

    pub fn move_by(&mut self, delta: isize) {
        self.move_to(self.cursor.saturating_add_signed(delta));
    }

    /// Place the viewport, pulling the cursor back inside if needed.
    pub fn scroll_to(&mut self, offset: usize) {
        self.offset = offset.min(self.max_offset());
        if !self.cursor_visible() {
            self.cursor = (self.offset + self.half()).min(self.last_line());
        }
    }

    /// Scroll by whole windows.
    pub fn page(&mut self, delta: isize) {
        let step = delta.saturating_mul(self.height as isize);
        self.scroll_to(self.offset.saturating_add_signed(step));
    }

    pub fn resize(&mut self, height: usize) {
        self.height = height.max(1);
        self.reclamp();
    }

    /// Adopt a new buffer length, e.g. after lines were inserted or the
    /// document was reloaded.
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        self.reclamp();
    }

    fn reclamp(&mut self) {
        self.offset = self.offset.min(self.max_offset());
        self.move_to(self.cursor);
    }
}
