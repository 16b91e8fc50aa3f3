//! Layout reconciler.
//!
//! Merges a committed gesture (or an addition/removal) into a tab's
//! [`GridSnapshot`], producing a new snapshot. The input snapshot is never
//! modified. Overlaps are resolved by pushing the other widgets downward in
//! `(y, x, instance_id)` order, so the same input always yields the same layout.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::services::widget_registry::WidgetRegistry;
use crate::types::grid::{CellRect, CellSize, GridSnapshot, WidgetInstance, MAX_ROWS};

/// A rect that violated its kind's size bounds and was clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampReport {
    pub requested: CellRect,
    pub applied: CellRect,
}

/// Outcome of a reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileResult {
    Committed {
        /// Other widgets pushed down to clear an overlap, in resolution order.
        displaced: Vec<String>,
        clamp: Option<ClampReport>,
    },
    /// The instance no longer exists; the update was dropped.
    StaleInstance,
}

impl ReconcileResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, ReconcileResult::Committed { .. })
    }
}

/// Pure layout merge over a fixed column count.
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<dyn WidgetRegistry>,
    columns: u32,
}

impl Reconciler {
    pub fn new(registry: Arc<dyn WidgetRegistry>, columns: u32) -> Self {
        Self {
            registry,
            columns: columns.max(1),
        }
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn registry(&self) -> &dyn WidgetRegistry {
        self.registry.as_ref()
    }

    /// Applies `final_rect` to an existing widget.
    pub fn reconcile(
        &self,
        snapshot: &GridSnapshot,
        instance_id: &str,
        final_rect: CellRect,
    ) -> (GridSnapshot, ReconcileResult) {
        let kind = match snapshot.get(instance_id) {
            Some(widget) => widget.widget_kind.clone(),
            None => {
                debug!(
                    "reconcile: {} no longer on tab {}, dropping update",
                    instance_id, snapshot.tab_id
                );
                return (snapshot.clone(), ReconcileResult::StaleInstance);
            }
        };

        let (rect, clamp) = self.clamp_rect(&kind, final_rect);
        let mut next = snapshot.clone();
        if let Some(widget) = next.widgets.get_mut(instance_id) {
            widget.rect = rect;
        }
        let displaced = resolve_overlaps(&mut next.widgets, Some(instance_id));
        bump(&mut next);

        debug!(
            "reconcile: {} -> {:?} on tab {} (v{}, displaced {})",
            instance_id,
            rect,
            next.tab_id,
            next.version,
            displaced.len()
        );
        (next, ReconcileResult::Committed { displaced, clamp })
    }

    /// Inserts a new widget. The stale-instance check does not apply.
    pub fn reconcile_insert(
        &self,
        snapshot: &GridSnapshot,
        mut widget: WidgetInstance,
    ) -> (GridSnapshot, ReconcileResult) {
        let (rect, clamp) = self.clamp_rect(&widget.widget_kind, widget.rect);
        widget.rect = rect;
        let instance_id = widget.instance_id.clone();

        let mut next = snapshot.clone();
        next.widgets.insert(instance_id.clone(), widget);
        let displaced = resolve_overlaps(&mut next.widgets, Some(&instance_id));
        bump(&mut next);

        debug!(
            "reconcile: inserted {} at {:?} on tab {} (v{})",
            instance_id, rect, next.tab_id, next.version
        );
        (next, ReconcileResult::Committed { displaced, clamp })
    }

    /// Removes a widget. Returns `None` when it is not present.
    pub fn reconcile_removal(&self, snapshot: &GridSnapshot, instance_id: &str) -> Option<GridSnapshot> {
        if !snapshot.contains(instance_id) {
            return None;
        }
        let mut next = snapshot.clone();
        next.widgets.remove(instance_id);
        bump(&mut next);
        Some(next)
    }

    /// Clamps every widget and clears any overlaps without touching `version`
    /// or `dirty`. Used for layouts that did not come from a gesture.
    pub fn normalize(&self, snapshot: &GridSnapshot) -> GridSnapshot {
        let mut next = snapshot.clone();
        for widget in next.widgets.values_mut() {
            widget.rect = self.clamp_rect(&widget.widget_kind, widget.rect).0;
        }
        resolve_overlaps(&mut next.widgets, None);
        next
    }

    /// Clamps `rect` into the kind's size bounds, the grid's columns, and
    /// [`MAX_ROWS`].
    pub fn clamp_rect(&self, widget_kind: &str, rect: CellRect) -> (CellRect, Option<ClampReport>) {
        let constraints = self.registry.get_constraints(widget_kind);

        let max_w = constraints.max_size.w.min(self.columns).max(1);
        let min_w = constraints.min_size.w.max(1).min(max_w);
        let max_h = constraints.max_size.h.clamp(1, MAX_ROWS);
        let min_h = constraints.min_size.h.max(1).min(max_h);

        let w = rect.w.clamp(min_w, max_w);
        let h = rect.h.clamp(min_h, max_h);
        let x = rect.x.min(self.columns - w);
        let y = rect.y.min(MAX_ROWS - h);
        let applied = CellRect::new(x, y, w, h);

        if applied == rect {
            (applied, None)
        } else {
            (
                applied,
                Some(ClampReport {
                    requested: rect,
                    applied,
                }),
            )
        }
    }

    /// Default size for a kind, already clamped to the grid.
    pub fn default_size(&self, widget_kind: &str) -> CellSize {
        let size = self.registry.get_constraints(widget_kind).default_size;
        let (rect, _) = self.clamp_rect(widget_kind, CellRect::new(0, 0, size.w, size.h));
        CellSize::new(rect.w, rect.h)
    }

    /// First free slot for `size`, scanning rows top to bottom and columns left to right.
    pub fn first_free_position(&self, snapshot: &GridSnapshot, size: CellSize) -> CellRect {
        let w = size.w.clamp(1, self.columns);
        let h = size.h.max(1);
        let floor = snapshot
            .widgets
            .values()
            .map(|widget| widget.rect.bottom())
            .max()
            .unwrap_or(0);

        for y in 0..=floor {
            for x in 0..=(self.columns - w) {
                let candidate = CellRect::new(x, y, w, h);
                if !snapshot.widgets.values().any(|widget| widget.rect.overlaps(&candidate)) {
                    return candidate;
                }
            }
        }
        CellRect::new(0, floor, w, h)
    }
}

fn bump(snapshot: &mut GridSnapshot) {
    snapshot.version += 1;
    snapshot.dirty = true;
}

/// Pushes widgets down until nothing overlaps. The anchor, when given, keeps
/// its rect; everything else is visited in `(y, x, instance_id)` order and
/// moved to the lowest bottom edge among the rects it collides with.
fn resolve_overlaps(widgets: &mut BTreeMap<String, WidgetInstance>, anchor: Option<&str>) -> Vec<String> {
    let mut placed: Vec<CellRect> = Vec::with_capacity(widgets.len());
    if let Some(rect) = anchor.and_then(|id| widgets.get(id)).map(|w| w.rect) {
        placed.push(rect);
    }

    let mut order: Vec<(u32, u32, String)> = widgets
        .values()
        .filter(|w| Some(w.instance_id.as_str()) != anchor)
        .map(|w| (w.rect.y, w.rect.x, w.instance_id.clone()))
        .collect();
    order.sort();

    let mut displaced = Vec::new();
    for (_, _, id) in order {
        let Some(widget) = widgets.get_mut(&id) else {
            continue;
        };
        let original = widget.rect;
        let mut rect = original;
        while let Some(bottom) = placed
            .iter()
            .filter(|p| p.overlaps(&rect))
            .map(|p| p.bottom())
            .max()
        {
            rect.y = bottom;
        }
        if rect != original {
            widget.rect = rect;
            displaced.push(id);
        }
        placed.push(rect);
    }
    displaced
}
