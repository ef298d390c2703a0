use super::queries::Row;

/// Scroll window over the row list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub offset: usize,
    pub height: usize,
}

/// Visible slice plus the scroll indicators to draw around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub more_above: bool,
    pub more_below: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { offset: 0, height: 20 }
    }
}

impl Viewport {
    pub fn new(height: usize) -> Self {
        Self {
            offset: 0,
            height: height.max(1),
        }
    }

    pub fn set_height(&mut self, height: usize) {
        self.height = height.max(1);
    }

    /// Rows moved by PageUp/PageDown
    pub fn page_size(&self) -> usize {
        self.height.saturating_sub(2).max(1)
    }

    /// Shift the offset so `selected` is inside the window once the scroll
    /// indicators have taken their lines
    pub fn ensure_visible(&mut self, selected: usize, total: usize) {
        if total == 0 {
            self.offset = 0;
            return;
        }
        let selected = selected.min(total - 1);
        if selected < self.offset {
            self.offset = selected;
        }
        // Scrolling can reveal an indicator that costs another line
        for _ in 0..4 {
            let window = self.window(total);
            if selected < window.end {
                break;
            }
            self.offset += selected + 1 - window.end;
        }
    }

    /// The rows to draw for the current offset
    pub fn window(&self, total: usize) -> Window {
        let start = self.offset.min(total);
        let more_above = start > 0;
        let mut room = self.height.saturating_sub(usize::from(more_above)).max(1);
        let more_below = start + room < total;
        if more_below {
            room = room.saturating_sub(1).max(1);
        }
        Window {
            start,
            end: (start + room).min(total),
            more_above,
            more_below,
        }
    }
}

/// Next non-gap row after `from`, or `from` when there is none
pub fn next_row(rows: &[Row], from: usize) -> usize {
    rows.iter()
        .enumerate()
        .skip(from + 1)
        .find(|(_, row)| !row.is_gap())
        .map_or(from, |(i, _)| i)
}

/// Previous non-gap row before `from`, or `from` when there is none
pub fn prev_row(rows: &[Row], from: usize) -> usize {
    rows.iter()
        .enumerate()
        .take(from)
        .rev()
        .find(|(_, row)| !row.is_gap())
        .map_or(from, |(i, _)| i)
}

pub fn first_row(rows: &[Row]) -> usize {
    rows.iter().position(|row| !row.is_gap()).unwrap_or(0)
}

pub fn last_row(rows: &[Row]) -> usize {
    rows.iter().rposition(|row| !row.is_gap()).unwrap_or(0)
}

/// Clamp `index` into the list and step off a gap, preferring downwards
pub fn settle(rows: &[Row], index: usize) -> usize {
    if rows.is_empty() {
        return 0;
    }
    let index = index.min(rows.len() - 1);
    if !rows[index].is_gap() {
        return index;
    }
    let down = next_row(rows, index);
    if down != index {
        down
    } else {
        prev_row(rows, index)
    }
}
