use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque pass-through properties handed to the rendered widget.
pub type WidgetProps = serde_json::Map<String, serde_json::Value>;

/// Row ceiling for clamped rects. Displacement may push widgets past it,
/// but edges stay far below `u32::MAX` where `right`/`bottom` saturate.
pub const MAX_ROWS: u32 = 1 << 16;

/// Axis-aligned rectangle in grid-cell units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl CellRect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    /// Two rects overlap when they share at least one cell. Touching edges do not count.
    pub fn overlaps(&self, other: &CellRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Same rect moved to a new origin.
    pub fn at(&self, x: u32, y: u32) -> CellRect {
        CellRect { x, y, ..*self }
    }
}

/// Width and height in grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSize {
    pub w: u32,
    pub h: u32,
}

impl CellSize {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }
}

/// Where a newly added widget goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// First free slot scanning row-major from the top-left cell.
    #[default]
    Auto,
    /// Given origin with the kind's default size.
    At { x: u32, y: u32 },
    /// Given origin and size.
    Exact(CellRect),
}

/// One placed widget on a tab's grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetInstance {
    pub instance_id: String,
    pub widget_kind: String,
    pub rect: CellRect,
    #[serde(default)]
    pub props: WidgetProps,
}

impl WidgetInstance {
    pub fn new(instance_id: impl Into<String>, widget_kind: impl Into<String>, rect: CellRect) -> Self {
        Self {
            instance_id: instance_id.into(),
            widget_kind: widget_kind.into(),
            rect,
            props: WidgetProps::new(),
        }
    }
}

/// The authoritative layout for one tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub tab_id: String,
    pub widgets: BTreeMap<String, WidgetInstance>,
    pub version: u64,
    pub dirty: bool,
}

impl GridSnapshot {
    /// An empty, clean snapshot at version 0.
    pub fn empty(tab_id: impl Into<String>) -> Self {
        Self {
            tab_id: tab_id.into(),
            widgets: BTreeMap::new(),
            version: 0,
            dirty: false,
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<&WidgetInstance> {
        self.widgets.get(instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.widgets.contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    /// Returns the first pair of instance ids whose rects overlap, if any.
    pub fn find_overlap(&self) -> Option<(&str, &str)> {
        let all: Vec<&WidgetInstance> = self.widgets.values().collect();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                if a.rect.overlaps(&b.rect) {
                    return Some((a.instance_id.as_str(), b.instance_id.as_str()));
                }
            }
        }
        None
    }
}
