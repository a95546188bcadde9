use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::EditorConfig;
use crate::core::{Document, DropPosition, Editor, NodeId, Point, Selection};
use crate::ops::{MediaPatch, Op, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeHandle {
    NorthWest,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
}

impl ResizeHandle {
    pub const ALL: [ResizeHandle; 8] = [
        ResizeHandle::NorthWest,
        ResizeHandle::North,
        ResizeHandle::NorthEast,
        ResizeHandle::East,
        ResizeHandle::SouthEast,
        ResizeHandle::South,
        ResizeHandle::SouthWest,
        ResizeHandle::West,
    ];

    /// Direction name used in the `resize-{dir}` class and `data-direction` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            ResizeHandle::NorthWest => "nw",
            ResizeHandle::North => "n",
            ResizeHandle::NorthEast => "ne",
            ResizeHandle::East => "e",
            ResizeHandle::SouthEast => "se",
            ResizeHandle::South => "s",
            ResizeHandle::SouthWest => "sw",
            ResizeHandle::West => "w",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.as_str() == name)
    }

    /// Requested width for a pointer delta. Corner handles follow their horizontal side;
    /// north and south go through the aspect ratio.
    fn requested_width(self, session: &ResizeSession, dx: f32, dy: f32) -> f32 {
        match self {
            ResizeHandle::West | ResizeHandle::NorthWest | ResizeHandle::SouthWest => {
                session.start_width - dx
            }
            ResizeHandle::East | ResizeHandle::NorthEast | ResizeHandle::SouthEast => {
                session.start_width + dx
            }
            ResizeHandle::North => (session.start_height - dy) * session.aspect_ratio,
            ResizeHandle::South => (session.start_height + dy) * session.aspect_ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub alt: bool,
}

impl Modifiers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn shift() -> Self {
        Self {
            shift: true,
            ..Self::default()
        }
    }

    pub fn command() -> Self {
        Self {
            ctrl: true,
            ..Self::default()
        }
    }

    /// Ctrl on most platforms, Cmd on macOS.
    pub fn is_command(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// Geometry of one rendered block, in the editor surface's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockRect {
    pub id: NodeId,
    pub top: f32,
    pub height: f32,
    pub width: f32,
}

impl BlockRect {
    pub fn mid_y(&self) -> f32 {
        self.top + self.height / 2.0
    }
}

/// Layout reported by the host after each render, in document order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Layout {
    pub container_width: f32,
    #[serde(default)]
    pub blocks: Vec<BlockRect>,
}

impl Layout {
    pub fn rect(&self, id: NodeId) -> Option<&BlockRect> {
        self.blocks.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitTarget {
    Surface,
    Text(Point),
    MediaBody(NodeId),
    Caption(NodeId),
    ResizeHandle(NodeId, ResizeHandle),
    RemoveButton(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResizeSession {
    pub block: NodeId,
    pub handle: ResizeHandle,
    pub start: Position,
    pub start_width: f32,
    pub start_height: f32,
    pub aspect_ratio: f32,
    /// Tracked while Shift is held. Does not change the clamp bounds.
    pub aspect_locked: bool,
    pub container_width: f32,
    pub stored_width_before: Option<u32>,
    pub last_width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub block: NodeId,
    pub start: Position,
    pub indicator: Option<DropPosition>,
}

/// The single active pointer gesture.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Gesture {
    #[default]
    Idle,
    Resizing(ResizeSession),
    Dragging(DragSession),
}

impl Gesture {
    pub fn block(&self) -> Option<NodeId> {
        match self {
            Gesture::Idle => None,
            Gesture::Resizing(session) => Some(session.block),
            Gesture::Dragging(session) => Some(session.block),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Gesture::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragReorder {
    pub block: NodeId,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureOutcome {
    None,
    Resized { block: NodeId, width: u32 },
    Moved(DragReorder),
    Cancelled,
}

#[derive(Debug, Default)]
pub struct Interaction {
    pub gesture: Gesture,
    pub selected_media: Option<NodeId>,
    pub focused_caption: Option<NodeId>,
    pub layout: Layout,
}

impl Interaction {
    pub(crate) fn reset(&mut self) {
        self.gesture = Gesture::Idle;
        self.selected_media = None;
        self.focused_caption = None;
    }

    /// Drops every reference to blocks that are no longer in `doc`.
    pub(crate) fn forget_missing(&mut self, doc: &Document) {
        if let Some(block) = self.gesture.block() {
            if !doc.contains(block) {
                debug!(%block, "cancelling gesture on removed block");
                self.gesture = Gesture::Idle;
            }
        }
        if self.selected_media.is_some_and(|id| !doc.contains(id)) {
            self.selected_media = None;
        }
        if self.focused_caption.is_some_and(|id| !doc.contains(id)) {
            self.focused_caption = None;
        }
    }
}

/// Rounds and clamps a requested width to `[min_width, container_width - margin]`.
/// The lower bound wins when the container is too narrow for both.
pub fn clamp_width(requested: f32, container_width: f32, min_width: u32, margin: u32) -> u32 {
    let min = min_width as f32;
    let max = (container_width - margin as f32).floor();
    let mut width = if requested.is_finite() {
        requested.round()
    } else {
        min
    };
    if width > max {
        trace!(requested, max, "clamping width to container");
        width = max;
    }
    if width < min {
        trace!(requested, min, "clamping width to minimum");
        width = min;
    }
    width as u32
}

/// Drop position for a pointer at `y`: before the first block whose vertical midpoint
/// lies below the pointer, otherwise after the last block. `skip` is left out of the
/// comparison.
pub fn nearest_drop_position(layout: &Layout, skip: Option<NodeId>, y: f32) -> Option<DropPosition> {
    let mut last = None;
    for rect in layout.blocks.iter().filter(|r| Some(r.id) != skip) {
        if y < rect.mid_y() {
            return Some(DropPosition::Before(rect.id));
        }
        last = Some(rect.id);
    }
    last.map(DropPosition::After)
}

/// Final index of an item taken from `from` and dropped into gap `gap` of a list of
/// `count` items.
pub fn reorder_index(from: usize, gap: usize, count: usize) -> usize {
    let mut to = gap;
    if to > from {
        to = to.saturating_sub(1);
    }
    to.min(count.saturating_sub(1))
}

impl Editor {
    pub fn gesture(&self) -> &Gesture {
        &self.interaction.gesture
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn layout(&self) -> &Layout {
        &self.interaction.layout
    }

    pub fn set_layout(&mut self, layout: Layout) {
        self.interaction.layout = layout;
    }

    pub fn selected_media(&self) -> Option<NodeId> {
        self.interaction.selected_media
    }

    pub fn focused_caption(&self) -> Option<NodeId> {
        self.interaction.focused_caption
    }

    /// Selects one media block, replacing any previous media selection.
    pub fn select_media(&mut self, id: NodeId) -> bool {
        if self.doc.media(id).is_none() {
            return false;
        }
        self.interaction.selected_media = Some(id);
        true
    }

    pub fn clear_media_selection(&mut self) {
        self.interaction.selected_media = None;
    }

    pub fn remove_selected_media(&mut self) -> bool {
        let Some(id) = self.interaction.selected_media.take() else {
            return false;
        };
        self.remove_node(id)
    }

    pub fn focus_caption(&mut self, id: NodeId) -> bool {
        if self.doc.media(id).is_none() {
            return false;
        }
        self.interaction.focused_caption = Some(id);
        true
    }

    pub fn blur_caption(&mut self) {
        self.interaction.focused_caption = None;
    }

    /// Writes caption text straight into the block so serialization always sees it.
    pub fn set_caption(&mut self, id: NodeId, caption: impl Into<String>) -> bool {
        let tx = Transaction::new(vec![Op::SetMedia {
            id,
            patch: MediaPatch::caption(caption),
        }])
        .source("media:caption");
        self.apply(tx)
    }

    /// Programmatic resize, clamped to the media bounds for `container_width`.
    pub fn resize_media(&mut self, id: NodeId, requested_width: f32, container_width: f32) -> bool {
        let width = clamp_width(
            requested_width,
            container_width,
            self.config.min_media_width,
            self.config.resize_margin,
        );
        let tx = Transaction::new(vec![Op::SetMedia {
            id,
            patch: MediaPatch::width(Some(width)),
        }])
        .source("media:resize");
        self.apply(tx)
    }

    pub fn pointer_down(&mut self, target: HitTarget, position: Position, modifiers: Modifiers) -> bool {
        match target {
            HitTarget::Caption(id) => self.focus_caption(id),
            HitTarget::ResizeHandle(id, handle) => self.start_resize(id, handle, position, modifiers),
            HitTarget::MediaBody(id) => {
                if !self.select_media(id) {
                    return false;
                }
                self.interaction.focused_caption = None;
                self.interaction.gesture = Gesture::Dragging(DragSession {
                    block: id,
                    start: position,
                    indicator: None,
                });
                true
            }
            HitTarget::RemoveButton(id) => self.remove_node(id),
            HitTarget::Text(point) => {
                self.set_selection(Selection::collapsed(point));
                true
            }
            HitTarget::Surface => {
                self.interaction.selected_media = None;
                self.interaction.focused_caption = None;
                false
            }
        }
    }

    fn start_resize(
        &mut self,
        id: NodeId,
        handle: ResizeHandle,
        position: Position,
        modifiers: Modifiers,
    ) -> bool {
        let Some(media) = self.doc.media(id) else {
            return false;
        };
        let layout = &self.interaction.layout;
        let container_width = if layout.container_width > 0.0 {
            layout.container_width
        } else {
            warn!(
                block = %id,
                fallback = self.config.default_container_width,
                "resize started without a reported layout"
            );
            self.config.default_container_width
        };
        let (start_width, start_height) = match layout.rect(id) {
            Some(rect) => (rect.width, rect.height),
            None => {
                let width = media.width.map_or(container_width, |w| w as f32);
                (width, width)
            }
        };
        let aspect_ratio = if start_height > 0.0 {
            start_width / start_height
        } else {
            1.0
        };

        self.interaction.selected_media = Some(id);
        self.interaction.focused_caption = None;
        self.interaction.gesture = Gesture::Resizing(ResizeSession {
            block: id,
            handle,
            start: position,
            start_width,
            start_height,
            aspect_ratio,
            aspect_locked: modifiers.shift,
            container_width,
            stored_width_before: media.width,
            last_width: None,
        });
        true
    }

    pub fn pointer_move(&mut self, position: Position, modifiers: Modifiers) {
        match &mut self.interaction.gesture {
            Gesture::Idle => {}
            Gesture::Resizing(session) => {
                session.aspect_locked = modifiers.shift;
                let width = session_width(session, position, &self.config);
                if session.last_width == Some(width) {
                    return;
                }
                session.last_width = Some(width);
                let block = session.block;
                let tx = Transaction::new(vec![Op::SetMedia {
                    id: block,
                    patch: MediaPatch::width(Some(width)),
                }])
                .source("media:resize_live")
                .skip_history();
                self.apply(tx);
            }
            Gesture::Dragging(session) => {
                session.indicator =
                    nearest_drop_position(&self.interaction.layout, Some(session.block), position.y);
            }
        }
    }

    pub fn pointer_up(&mut self, position: Position) -> GestureOutcome {
        match std::mem::take(&mut self.interaction.gesture) {
            Gesture::Idle => GestureOutcome::None,
            Gesture::Resizing(session) => {
                let width = session_width(&session, position, &self.config);
                let tx = Transaction::new(vec![Op::SetMedia {
                    id: session.block,
                    patch: MediaPatch::width(Some(width)),
                }])
                .source("media:resize");
                let applied = self.apply(tx);
                if !applied && session.stored_width_before != Some(width) {
                    // Live updates already wrote this width without recording it.
                    self.history.request_checkpoint(self.clock.now());
                }
                GestureOutcome::Resized {
                    block: session.block,
                    width,
                }
            }
            Gesture::Dragging(session) => {
                let Some(indicator) = session.indicator else {
                    return GestureOutcome::Cancelled;
                };
                let (Some(from), Some(target_ix)) = (
                    self.doc.index_of(session.block),
                    self.doc.index_of(indicator.target()),
                ) else {
                    return GestureOutcome::Cancelled;
                };
                let gap = match indicator {
                    DropPosition::Before(_) => target_ix,
                    DropPosition::After(_) => target_ix + 1,
                };
                let to = reorder_index(from, gap, self.doc.len());
                if from == to {
                    return GestureOutcome::None;
                }
                if !self.move_node(session.block, indicator) {
                    return GestureOutcome::Cancelled;
                }
                GestureOutcome::Moved(DragReorder {
                    block: session.block,
                    from,
                    to,
                })
            }
        }
    }

    /// Ends the active gesture without committing it. A cancelled resize restores the
    /// width the block had before the gesture.
    pub fn cancel_gesture(&mut self) -> GestureOutcome {
        match std::mem::take(&mut self.interaction.gesture) {
            Gesture::Idle => GestureOutcome::None,
            Gesture::Resizing(session) => {
                let tx = Transaction::new(vec![Op::SetMedia {
                    id: session.block,
                    patch: MediaPatch::width(session.stored_width_before),
                }])
                .source("media:resize_cancel")
                .skip_history();
                self.apply(tx);
                GestureOutcome::Cancelled
            }
            Gesture::Dragging(_) => GestureOutcome::Cancelled,
        }
    }

    pub(crate) fn set_aspect_lock(&mut self, locked: bool) {
        if let Gesture::Resizing(session) = &mut self.interaction.gesture {
            session.aspect_locked = locked;
        }
    }
}

fn session_width(session: &ResizeSession, position: Position, config: &EditorConfig) -> u32 {
    let dx = position.x - session.start.x;
    let dy = position.y - session.start.y;
    let requested = session.handle.requested_width(session, dx, dy);
    clamp_width(
        requested,
        session.container_width,
        config.min_media_width,
        config.resize_margin,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn session(handle: ResizeHandle) -> ResizeSession {
        ResizeSession {
            block: NodeId(1),
            handle,
            start: Position::new(100.0, 100.0),
            start_width: 200.0,
            start_height: 100.0,
            aspect_ratio: 2.0,
            aspect_locked: false,
            container_width: 632.0,
            stored_width_before: None,
            last_width: None,
        }
    }

    #[rstest]
    #[case(ResizeHandle::East, 30.0, 0.0, 230.0)]
    #[case(ResizeHandle::SouthEast, 30.0, 50.0, 230.0)]
    #[case(ResizeHandle::West, 30.0, 0.0, 170.0)]
    #[case(ResizeHandle::NorthWest, -40.0, 0.0, 240.0)]
    #[case(ResizeHandle::South, 0.0, 20.0, 240.0)]
    #[case(ResizeHandle::North, 0.0, 20.0, 160.0)]
    fn handle_width_rules(
        #[case] handle: ResizeHandle,
        #[case] dx: f32,
        #[case] dy: f32,
        #[case] expected: f32,
    ) {
        let session = session(handle);
        assert_eq!(handle.requested_width(&session, dx, dy), expected);
    }

    #[rstest]
    #[case(10.0, 50)]
    #[case(320.4, 320)]
    #[case(5000.0, 600)]
    #[case(f32::NAN, 50)]
    fn clamp_bounds(#[case] requested: f32, #[case] expected: u32) {
        assert_eq!(clamp_width(requested, 632.0, 50, 32), expected);
    }

    #[test]
    fn lower_bound_wins_in_narrow_containers() {
        assert_eq!(clamp_width(300.0, 60.0, 50, 32), 50);
    }

    #[test]
    fn handle_names_round_trip() {
        for handle in ResizeHandle::ALL {
            assert_eq!(ResizeHandle::from_name(handle.as_str()), Some(handle));
        }
        assert_eq!(ResizeHandle::from_name("x"), None);
    }

    fn layout() -> Layout {
        Layout {
            container_width: 632.0,
            blocks: vec![
                BlockRect {
                    id: NodeId(1),
                    top: 0.0,
                    height: 100.0,
                    width: 600.0,
                },
                BlockRect {
                    id: NodeId(2),
                    top: 100.0,
                    height: 100.0,
                    width: 600.0,
                },
                BlockRect {
                    id: NodeId(3),
                    top: 200.0,
                    height: 100.0,
                    width: 600.0,
                },
            ],
        }
    }

    #[test]
    fn drop_position_uses_midpoints() {
        let layout = layout();
        assert_eq!(
            nearest_drop_position(&layout, None, 40.0),
            Some(DropPosition::Before(NodeId(1)))
        );
        assert_eq!(
            nearest_drop_position(&layout, None, 160.0),
            Some(DropPosition::Before(NodeId(3)))
        );
        assert_eq!(
            nearest_drop_position(&layout, None, 900.0),
            Some(DropPosition::After(NodeId(3)))
        );
    }

    #[test]
    fn drop_position_skips_the_dragged_block() {
        let layout = layout();
        assert_eq!(
            nearest_drop_position(&layout, Some(NodeId(3)), 900.0),
            Some(DropPosition::After(NodeId(2)))
        );
        assert_eq!(
            nearest_drop_position(&layout, Some(NodeId(1)), 10.0),
            Some(DropPosition::Before(NodeId(2)))
        );
        let single = Layout {
            container_width: 632.0,
            blocks: vec![layout.blocks[0]],
        };
        assert_eq!(nearest_drop_position(&single, Some(NodeId(1)), 10.0), None);
    }

    #[test]
    fn reorder_index_moves_down_and_up() {
        assert_eq!(reorder_index(0, 4, 4), 3);
        assert_eq!(reorder_index(2, 1, 4), 1);
        for gap in [2, 3] {
            assert_eq!(reorder_index(2, gap, 4), 2);
        }
    }
}
