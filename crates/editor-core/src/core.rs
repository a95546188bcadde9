use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EditorConfig;
use crate::gesture::{Interaction, nearest_drop_position};
use crate::history::{Clock, History, HistoryEntry, SystemClock};
use crate::html;
use crate::ops::{HistoryPolicy, MediaPatch, Op, Transaction};
use crate::plugin::{CommandError, PluginRegistry};
use crate::upload::PendingUploads;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// An embedded image or video. `width == None` renders at the natural width (100%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaBlock {
    pub kind: MediaKind,
    pub source_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

impl MediaBlock {
    pub fn new(kind: MediaKind, source_url: impl Into<String>) -> Self {
        Self {
            kind,
            source_url: source_url.into(),
            caption: String::new(),
            width: None,
        }
    }

    pub fn image(source_url: impl Into<String>) -> Self {
        Self::new(MediaKind::Image, source_url)
    }

    pub fn video(source_url: impl Into<String>) -> Self {
        Self::new(MediaKind::Video, source_url)
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Marks {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Marks {
    pub fn is_plain(&self) -> bool {
        *self == Marks::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    #[serde(default)]
    pub marks: Marks,
}

impl TextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: Marks::default(),
        }
    }

    pub fn with_marks(text: impl Into<String>, marks: Marks) -> Self {
        Self {
            text: text.into(),
            marks,
        }
    }
}

/// Inline markup the editor does not understand, kept verbatim inside any
/// recognized mark wrappers it appeared in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueInline {
    pub html: String,
    #[serde(default)]
    pub marks: Marks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "inline", rename_all = "snake_case")]
pub enum Inline {
    Text(TextRun),
    Opaque(OpaqueInline),
}

impl Inline {
    /// Offset units covered by this inline. Opaque inlines are atomic and count as one.
    pub fn len(&self) -> usize {
        match self {
            Inline::Text(run) => run.text.len(),
            Inline::Opaque(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    #[default]
    Paragraph,
    Heading1,
    Heading2,
    BulletItem,
    NumberedItem,
}

impl TextStyle {
    pub fn is_list_item(self) -> bool {
        matches!(self, TextStyle::BulletItem | TextStyle::NumberedItem)
    }

    pub fn tag(self) -> &'static str {
        match self {
            TextStyle::Paragraph => "p",
            TextStyle::Heading1 => "h1",
            TextStyle::Heading2 => "h2",
            TextStyle::BulletItem | TextStyle::NumberedItem => "li",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TextBlock {
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default)]
    pub inlines: Vec<Inline>,
}

impl TextBlock {
    pub fn new(style: TextStyle) -> Self {
        Self {
            style,
            inlines: Vec::new(),
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::styled(TextStyle::Paragraph, text)
    }

    pub fn styled(style: TextStyle, text: impl Into<String>) -> Self {
        let text = text.into();
        let inlines = if text.is_empty() {
            Vec::new()
        } else {
            vec![Inline::Text(TextRun::plain(text))]
        };
        Self { style, inlines }
    }

    pub fn len(&self) -> usize {
        self.inlines.iter().map(Inline::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenated text of all runs; opaque inlines contribute nothing.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for inline in &self.inlines {
            if let Inline::Text(run) = inline {
                out.push_str(&run.text);
            }
        }
        out
    }

    /// Clamps `offset` to the block length and to a char boundary of the run it falls in.
    pub fn clamp_offset(&self, offset: usize) -> usize {
        let mut cursor = 0usize;
        for inline in &self.inlines {
            let len = inline.len();
            if offset <= cursor + len {
                return match inline {
                    Inline::Text(run) => cursor + clamp_to_char_boundary(&run.text, offset - cursor),
                    Inline::Opaque(_) if offset == cursor + len => offset,
                    Inline::Opaque(_) => cursor,
                };
            }
            cursor += len;
        }
        cursor
    }

    /// Marks that newly typed text at `offset` inherits.
    pub fn marks_at(&self, offset: usize) -> Marks {
        let mut cursor = 0usize;
        let mut last: Option<&Marks> = None;
        for inline in &self.inlines {
            let len = inline.len();
            if let Inline::Text(run) = inline {
                if offset == 0 || (offset > cursor && offset <= cursor + len) {
                    return run.marks.clone();
                }
                last = Some(&run.marks);
            }
            cursor += len;
        }
        last.cloned().unwrap_or_default()
    }

    /// Splits the inlines at `offset`, keeping the head and returning the tail.
    pub fn split_off(&mut self, offset: usize) -> Vec<Inline> {
        let offset = self.clamp_offset(offset);
        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut cursor = 0usize;
        for inline in std::mem::take(&mut self.inlines) {
            let len = inline.len();
            if cursor + len <= offset {
                head.push(inline);
            } else if cursor >= offset {
                tail.push(inline);
            } else if let Inline::Text(run) = inline {
                let (left, right) = run.text.split_at(offset - cursor);
                head.push(Inline::Text(TextRun::with_marks(left, run.marks.clone())));
                tail.push(Inline::Text(TextRun::with_marks(right, run.marks)));
            } else {
                tail.push(inline);
            }
            cursor += len;
        }
        self.inlines = head;
        tail
    }

    pub fn slice(&self, start: usize, end: usize) -> Vec<Inline> {
        let mut copy = self.clone();
        copy.split_off(end);
        copy.split_off(start)
    }

    pub fn insert_inlines(&mut self, offset: usize, inlines: Vec<Inline>) {
        let tail = self.split_off(offset);
        self.inlines.extend(inlines);
        self.inlines.extend(tail);
        self.normalize();
    }

    pub fn remove_range(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let tail = self.split_off(end);
        self.split_off(start);
        self.inlines.extend(tail);
        self.normalize();
    }

    /// Merges adjacent runs carrying equal marks and drops empty runs.
    pub fn normalize(&mut self) {
        let mut out: Vec<Inline> = Vec::with_capacity(self.inlines.len());
        for inline in std::mem::take(&mut self.inlines) {
            match inline {
                Inline::Text(run) if run.text.is_empty() => {}
                Inline::Text(run) => match out.last_mut() {
                    Some(Inline::Text(prev)) if prev.marks == run.marks => {
                        prev.text.push_str(&run.text);
                    }
                    _ => out.push(Inline::Text(run)),
                },
                other => out.push(other),
            }
        }
        self.inlines = out;
    }
}

/// Block-level markup the editor does not understand, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueBlock {
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    Text(TextBlock),
    Media(MediaBlock),
    Opaque(OpaqueBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: BlockKind,
}

impl Block {
    pub fn as_text(&self) -> Option<&TextBlock> {
        match &self.kind {
            BlockKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut TextBlock> {
        match &mut self.kind {
            BlockKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_media(&self) -> Option<&MediaBlock> {
        match &self.kind {
            BlockKind::Media(media) => Some(media),
            _ => None,
        }
    }

    pub fn as_media_mut(&mut self) -> Option<&mut MediaBlock> {
        match &mut self.kind {
            BlockKind::Media(media) => Some(media),
            _ => None,
        }
    }
}

/// Where a block lands relative to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPosition {
    Before(NodeId),
    After(NodeId),
}

impl DropPosition {
    pub fn target(self) -> NodeId {
        match self {
            DropPosition::Before(id) | DropPosition::After(id) => id,
        }
    }
}

/// The block sequence. Block order is the only source of media ordering.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Document {
    blocks: Vec<Block>,
    #[serde(skip)]
    next_id: u64,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = BlockKind>) -> Self {
        let mut doc = Self::new();
        for kind in kinds {
            doc.push(kind);
        }
        doc
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn alloc_id(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    pub fn push(&mut self, kind: BlockKind) -> NodeId {
        let id = self.alloc_id();
        self.blocks.push(Block { id, kind });
        id
    }

    pub fn block_ids(&self) -> Vec<NodeId> {
        self.blocks.iter().map(|b| b.id).collect()
    }

    /// Hands the blocks `ids` when they line up one to one, fresh ids otherwise.
    /// Ids issued later stay above `floor`, so no id ever names two different blocks.
    pub(crate) fn adopt_ids(&mut self, ids: &[NodeId], floor: u64) {
        let highest = ids.iter().map(|id| id.0).max().unwrap_or(0);
        self.next_id = floor.max(highest);
        if ids.len() == self.blocks.len() {
            for (block, id) in self.blocks.iter_mut().zip(ids) {
                block.id = *id;
            }
            return;
        }
        for ix in 0..self.blocks.len() {
            let id = self.alloc_id();
            self.blocks[ix].id = id;
        }
    }

    pub(crate) fn id_floor(&self) -> u64 {
        self.next_id
    }

    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn block(&self, id: NodeId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: NodeId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn text(&self, id: NodeId) -> Option<&TextBlock> {
        self.block(id).and_then(Block::as_text)
    }

    pub fn media(&self, id: NodeId) -> Option<&MediaBlock> {
        self.block(id).and_then(Block::as_media)
    }

    pub fn media_blocks(&self) -> impl Iterator<Item = (NodeId, &MediaBlock)> + '_ {
        self.blocks
            .iter()
            .filter_map(|b| b.as_media().map(|media| (b.id, media)))
    }

    /// Position of a media block among the document's media blocks.
    pub fn order_index(&self, id: NodeId) -> Option<usize> {
        self.media_blocks().position(|(media_id, _)| media_id == id)
    }

    /// Same block sequence and content, ignoring node ids.
    pub fn is_equivalent(&self, other: &Document) -> bool {
        self.blocks.len() == other.blocks.len()
            && self
                .blocks
                .iter()
                .zip(&other.blocks)
                .all(|(a, b)| a.kind == b.kind)
    }

    pub fn plain_text(&self) -> String {
        let mut lines = Vec::new();
        for block in &self.blocks {
            if let Some(text) = block.as_text() {
                lines.push(text.plain_text());
            }
        }
        lines.join("\n")
    }

    pub(crate) fn insert_block(&mut self, index: usize, block: Block) {
        self.next_id = self.next_id.max(block.id.0);
        let index = index.min(self.blocks.len());
        self.blocks.insert(index, block);
    }

    pub(crate) fn remove_block(&mut self, id: NodeId) -> Option<(usize, Block)> {
        let index = self.index_of(id)?;
        Some((index, self.blocks.remove(index)))
    }

    pub(crate) fn move_block(&mut self, id: NodeId, to: DropPosition) -> Result<bool, ApplyError> {
        let target = to.target();
        if target == id {
            return Ok(false);
        }
        let from = self.index_of(id).ok_or(ApplyError::StaleReference(id))?;
        if !self.contains(target) {
            return Err(ApplyError::StaleReference(target));
        }
        let block = self.blocks.remove(from);
        let Some(target_ix) = self.index_of(target) else {
            self.blocks.insert(from, block);
            return Err(ApplyError::StaleReference(target));
        };
        let to_ix = match to {
            DropPosition::Before(_) => target_ix,
            DropPosition::After(_) => target_ix + 1,
        };
        self.blocks.insert(to_ix, block);
        Ok(to_ix != from)
    }

    /// Raises stored widths below `min` to it. The upper bound depends on the container
    /// and is applied by the next resize.
    pub(crate) fn clamp_media_widths(&mut self, min: u32) {
        for block in &mut self.blocks {
            if let BlockKind::Media(media) = &mut block.kind {
                if let Some(width) = media.width.filter(|w| *w < min) {
                    debug!(block = %block.id, width, min, "raising stored media width");
                    media.width = Some(min);
                }
            }
        }
    }

    pub(crate) fn normalize(&mut self) {
        for block in &mut self.blocks {
            if let BlockKind::Text(text) = &mut block.kind {
                text.normalize();
            }
        }
    }

    pub(crate) fn first_text_point(&self) -> Option<Point> {
        self.blocks
            .iter()
            .find(|b| b.as_text().is_some())
            .map(|b| Point::new(b.id, 0))
    }

    /// Nearest text position at or before `index`, falling forward when none precedes it.
    pub(crate) fn nearest_text_point(&self, index: usize) -> Option<Point> {
        if self.blocks.is_empty() {
            return None;
        }
        let index = index.min(self.blocks.len() - 1);
        for block in self.blocks[..=index].iter().rev() {
            if let Some(text) = block.as_text() {
                return Some(Point::new(block.id, text.len()));
            }
        }
        self.blocks[index..]
            .iter()
            .find(|b| b.as_text().is_some())
            .map(|b| Point::new(b.id, 0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub block: NodeId,
    pub offset: usize,
}

impl Point {
    pub fn new(block: NodeId, offset: usize) -> Self {
        Self { block, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
}

impl Selection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    pub fn collapsed(point: Point) -> Self {
        Self {
            anchor: point,
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    /// Start and end in document order, or `None` when either end is not in `doc`.
    pub fn ordered(&self, doc: &Document) -> Option<(Point, Point)> {
        let a = doc.index_of(self.anchor.block)?;
        let f = doc.index_of(self.focus.block)?;
        if (a, self.anchor.offset) <= (f, self.focus.offset) {
            Some((self.anchor, self.focus))
        } else {
            Some((self.focus, self.anchor))
        }
    }
}

/// Where `insert_node` places a new block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertAt {
    Cursor,
    /// The block nearest to this vertical coordinate of the last reported layout.
    Point {
        y: f32,
    },
    End,
}

/// An insertion anchor resolved against the document at the moment of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertTarget {
    Split { block: NodeId, offset: usize },
    Before(NodeId),
    After(NodeId),
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("node {0} is not in the document")]
    StaleReference(NodeId),
    #[error("node {0} is not a {1} block")]
    WrongKind(NodeId, &'static str),
    #[error("media block {0} has no source url")]
    EmptySource(NodeId),
    #[error("node {0} already exists")]
    DuplicateId(NodeId),
}

pub type ChangeListener = Rc<dyn Fn(&str)>;

pub struct Editor {
    pub(crate) doc: Document,
    pub(crate) selection: Option<Selection>,
    pub(crate) pending_marks: Option<Marks>,
    pub(crate) registry: PluginRegistry,
    pub(crate) config: EditorConfig,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) history: History,
    pub(crate) interaction: Interaction,
    pub(crate) uploads: PendingUploads,
    listeners: Vec<ChangeListener>,
    revision: u64,
}

impl Editor {
    pub fn new(doc: Document, registry: PluginRegistry) -> Self {
        Self::with_options(doc, registry, EditorConfig::default(), Rc::new(SystemClock))
    }

    pub fn with_options(
        mut doc: Document,
        registry: PluginRegistry,
        config: EditorConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let config = config.with_defaults();
        doc.normalize();
        doc.clamp_media_widths(config.min_media_width);
        let history = History::new(
            html::serialize_document(&doc),
            doc.block_ids(),
            config.history_capacity,
            config.checkpoint_delay(),
        );
        let selection = doc.first_text_point().map(Selection::collapsed);
        Self {
            doc,
            selection,
            pending_marks: None,
            registry,
            config,
            clock,
            history,
            interaction: Interaction::default(),
            uploads: PendingUploads::default(),
            listeners: Vec::new(),
            revision: 0,
        }
    }

    pub fn from_html(serialized: &str) -> Self {
        Self::new(html::load(serialized), PluginRegistry::richtext())
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn pending_marks(&self) -> Option<&Marks> {
        self.pending_marks.as_ref()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Bumped once per applied mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Registers a listener receiving the serialized document after every mutation.
    pub fn on_change(&mut self, listener: impl Fn(&str) + 'static) {
        self.listeners.push(Rc::new(listener));
    }

    pub fn set_selection(&mut self, selection: Selection) {
        let anchor = self.valid_point(selection.anchor);
        let focus = self.valid_point(selection.focus);
        self.selection = match (anchor, focus) {
            (Some(anchor), Some(focus)) => Some(Selection::new(anchor, focus)),
            _ => None,
        };
        self.pending_marks = None;
        self.interaction.selected_media = None;
        self.interaction.focused_caption = None;
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
        self.pending_marks = None;
    }

    fn valid_point(&self, point: Point) -> Option<Point> {
        let text = self.doc.text(point.block)?;
        Some(Point::new(point.block, text.clamp_offset(point.offset)))
    }

    /// Replaces the document with parsed markup and starts a fresh history.
    /// Ids of the previous document are never reused and pending uploads are dropped.
    pub fn load(&mut self, serialized: &str) {
        let floor = self.doc.id_floor();
        self.doc = html::load(serialized);
        self.doc.adopt_ids(&[], floor);
        self.doc.clamp_media_widths(self.config.min_media_width);
        self.history
            .reset(html::serialize_document(&self.doc), self.doc.block_ids());
        self.selection = self.doc.first_text_point().map(Selection::collapsed);
        self.pending_marks = None;
        self.interaction.reset();
        self.uploads.clear();
    }

    pub fn serialize(&self) -> String {
        html::serialize_document(&self.doc)
    }

    /// Applies every op that still resolves. Returns whether the document changed.
    pub fn apply(&mut self, tx: Transaction) -> bool {
        let before = self.selection_indices();
        let mut changed = false;
        for op in tx.ops {
            let name = op.name();
            let anchors = self.uploads.follow(&self.doc, &op);
            match apply_op_to(&mut self.doc, op) {
                Ok(applied) => {
                    changed |= applied;
                    self.uploads.settle(anchors);
                }
                Err(err) => debug!(op = name, %err, "skipping op"),
            }
        }
        self.uploads.end_transaction();
        if !changed {
            return false;
        }

        self.doc.normalize();
        if let Some(selection) = tx.selection_after {
            self.selection = Some(selection);
        }
        self.repair_selection(before);
        if let Some(source) = tx.meta.source.as_deref() {
            debug!(source, revision = self.revision + 1, "applied transaction");
        }
        self.commit_change(tx.meta.history);
        true
    }

    pub fn run_command(
        &mut self,
        id: &str,
        args: Option<serde_json::Value>,
    ) -> Result<(), CommandError> {
        let Some(command) = self.registry.command(id) else {
            return Err(CommandError::new(format!("Unknown command: {id}")));
        };
        (command.handler)(self, args)
    }

    pub fn insert_node(&mut self, kind: BlockKind, at: InsertAt) -> Option<NodeId> {
        let target = self.resolve_insert_at(at);
        self.insert_at_target(kind, target, "insert_node")
    }

    pub fn remove_node(&mut self, id: NodeId) -> bool {
        self.apply(Transaction::new(vec![Op::RemoveBlock { id }]).source("remove_node"))
    }

    pub fn move_node(&mut self, id: NodeId, to: DropPosition) -> bool {
        self.apply(Transaction::new(vec![Op::MoveBlock { id, to }]).source("move_node"))
    }

    pub fn resolve_insert_at(&self, at: InsertAt) -> InsertTarget {
        match at {
            InsertAt::End => InsertTarget::End,
            InsertAt::Cursor => match &self.selection {
                Some(selection) => InsertTarget::Split {
                    block: selection.focus.block,
                    offset: selection.focus.offset,
                },
                None => InsertTarget::End,
            },
            InsertAt::Point { y } => {
                match nearest_drop_position(&self.interaction.layout, None, y) {
                    Some(DropPosition::Before(id)) => InsertTarget::Before(id),
                    Some(DropPosition::After(id)) => InsertTarget::After(id),
                    None => InsertTarget::End,
                }
            }
        }
    }

    pub(crate) fn insert_at_target(
        &mut self,
        kind: BlockKind,
        target: InsertTarget,
        source: &'static str,
    ) -> Option<NodeId> {
        if let BlockKind::Media(media) = &kind {
            if media.source_url.trim().is_empty() {
                warn!(source, "refusing to insert media without a source url");
                return None;
            }
        }

        let id = self.doc.alloc_id();
        let block = Block { id, kind };
        let end = self.doc.len();

        let mut ops = Vec::new();
        let mut selection_after = None;
        match target {
            InsertTarget::End => ops.push(Op::InsertBlock { index: end, block }),
            InsertTarget::Before(anchor) => {
                let index = self.doc.index_of(anchor).unwrap_or(end);
                ops.push(Op::InsertBlock { index, block });
            }
            InsertTarget::After(anchor) => {
                let index = self.doc.index_of(anchor).map_or(end, |ix| ix + 1);
                ops.push(Op::InsertBlock { index, block });
            }
            InsertTarget::Split { block: anchor, offset } => {
                let Some(index) = self.doc.index_of(anchor) else {
                    return self.insert_at_target(block.kind, InsertTarget::End, source);
                };
                let Some(text) = self.doc.text(anchor).cloned() else {
                    ops.push(Op::InsertBlock {
                        index: index + 1,
                        block,
                    });
                    return self.apply_insert(ops, None, id, source);
                };
                let offset = text.clamp_offset(offset);
                if offset == 0 {
                    ops.push(Op::InsertBlock { index, block });
                } else if offset >= text.len() {
                    ops.push(Op::InsertBlock {
                        index: index + 1,
                        block,
                    });
                } else {
                    let mut head = text;
                    let tail = head.split_off(offset);
                    let tail_id = self.doc.alloc_id();
                    ops.push(Op::SetInlines {
                        id: anchor,
                        inlines: head.inlines,
                    });
                    ops.push(Op::InsertBlock {
                        index: index + 1,
                        block,
                    });
                    ops.push(Op::InsertBlock {
                        index: index + 2,
                        block: Block {
                            id: tail_id,
                            kind: BlockKind::Text(TextBlock {
                                style: head.style,
                                inlines: tail,
                            }),
                        },
                    });
                    selection_after = Some(Selection::collapsed(Point::new(tail_id, 0)));
                }
            }
        }
        self.apply_insert(ops, selection_after, id, source)
    }

    fn apply_insert(
        &mut self,
        ops: Vec<Op>,
        selection_after: Option<Selection>,
        id: NodeId,
        source: &'static str,
    ) -> Option<NodeId> {
        let mut tx = Transaction::new(ops).source(source);
        if let Some(selection) = selection_after {
            tx = tx.selection_after(selection);
        }
        self.apply(tx).then_some(id)
    }

    fn selection_indices(&self) -> Option<(usize, usize)> {
        let selection = self.selection.as_ref()?;
        Some((
            self.doc.index_of(selection.anchor.block)?,
            self.doc.index_of(selection.focus.block)?,
        ))
    }

    /// Re-anchors selection points whose block vanished to the nearest text block.
    pub(crate) fn repair_selection(&mut self, before: Option<(usize, usize)>) {
        let Some(selection) = self.selection.take() else {
            return;
        };
        let (anchor_ix, focus_ix) = before.unwrap_or((0, 0));
        let anchor = self
            .valid_point(selection.anchor)
            .or_else(|| self.doc.nearest_text_point(anchor_ix));
        let focus = self
            .valid_point(selection.focus)
            .or_else(|| self.doc.nearest_text_point(focus_ix));
        self.selection = match (anchor, focus) {
            (Some(anchor), Some(focus)) => Some(Selection::new(anchor, focus)),
            (Some(point), None) | (None, Some(point)) => Some(Selection::collapsed(point)),
            (None, None) => None,
        };
    }

    /// Publishes a mutation: drops dangling gesture references, notifies listeners,
    /// and schedules a checkpoint unless the policy skips history.
    pub(crate) fn commit_change(&mut self, policy: HistoryPolicy) {
        self.interaction.forget_missing(&self.doc);
        self.revision += 1;
        let serialized = self.serialize();
        for listener in &self.listeners {
            listener(&serialized);
        }
        if policy == HistoryPolicy::Debounced {
            self.history.request_checkpoint(self.clock.now());
        }
    }

    /// Swaps in a history snapshot without recording it.
    pub(crate) fn restore_snapshot(&mut self, entry: HistoryEntry) {
        let before = self.selection_indices();
        let previous = self.selection.take();
        let floor = self.doc.id_floor();
        self.doc = html::load(&entry.snapshot);
        self.doc.adopt_ids(&entry.ids, floor);
        self.interaction.reset();
        self.pending_marks = None;

        if let (Some(previous), Some((anchor_ix, focus_ix))) = (previous, before) {
            let remap = |ix: usize, offset: usize| {
                let block = self.doc.blocks().get(ix)?;
                let text = block.as_text()?;
                Some(Point::new(block.id, text.clamp_offset(offset)))
            };
            let anchor = remap(anchor_ix, previous.anchor.offset)
                .or_else(|| self.doc.nearest_text_point(anchor_ix));
            let focus = remap(focus_ix, previous.focus.offset)
                .or_else(|| self.doc.nearest_text_point(focus_ix));
            self.selection = match (anchor, focus) {
                (Some(anchor), Some(focus)) => Some(Selection::new(anchor, focus)),
                _ => None,
            };
        }
        if self.selection.is_none() {
            self.selection = self.doc.first_text_point().map(Selection::collapsed);
        }
        self.commit_change(HistoryPolicy::Skip);
    }
}

pub(crate) fn apply_op_to(doc: &mut Document, op: Op) -> Result<bool, ApplyError> {
    match op {
        Op::InsertBlock { index, mut block } => {
            if doc.contains(block.id) {
                return Err(ApplyError::DuplicateId(block.id));
            }
            if let BlockKind::Media(media) = &mut block.kind {
                let trimmed = media.source_url.trim();
                if trimmed.is_empty() {
                    return Err(ApplyError::EmptySource(block.id));
                }
                // Markup loading trims `src` too.
                if trimmed.len() != media.source_url.len() {
                    media.source_url = trimmed.to_string();
                }
            }
            doc.insert_block(index, block);
            Ok(true)
        }
        Op::RemoveBlock { id } => doc
            .remove_block(id)
            .map(|_| true)
            .ok_or(ApplyError::StaleReference(id)),
        Op::MoveBlock { id, to } => doc.move_block(id, to),
        Op::SetTextStyle { id, style } => {
            let text = text_mut(doc, id)?;
            let changed = text.style != style;
            text.style = style;
            Ok(changed)
        }
        Op::SetInlines { id, inlines } => {
            let text = text_mut(doc, id)?;
            let changed = text.inlines != inlines;
            text.inlines = inlines;
            Ok(changed)
        }
        Op::SetMedia { id, patch } => {
            let media = doc
                .block_mut(id)
                .ok_or(ApplyError::StaleReference(id))?
                .as_media_mut()
                .ok_or(ApplyError::WrongKind(id, "media"))?;
            Ok(patch_media(media, patch))
        }
    }
}

fn text_mut(doc: &mut Document, id: NodeId) -> Result<&mut TextBlock, ApplyError> {
    doc.block_mut(id)
        .ok_or(ApplyError::StaleReference(id))?
        .as_text_mut()
        .ok_or(ApplyError::WrongKind(id, "text"))
}

fn patch_media(media: &mut MediaBlock, patch: MediaPatch) -> bool {
    let mut changed = false;
    if let Some(caption) = patch.caption {
        changed |= media.caption != caption;
        media.caption = caption;
    }
    if let Some(width) = patch.width {
        changed |= media.width != width;
        media.width = width;
    }
    changed
}

pub(crate) fn clamp_to_char_boundary(s: &str, mut ix: usize) -> usize {
    ix = ix.min(s.len());
    while ix > 0 && !s.is_char_boundary(ix) {
        ix -= 1;
    }
    ix
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn runs(block: &TextBlock) -> Vec<(String, bool)> {
        block
            .inlines
            .iter()
            .map(|inline| match inline {
                Inline::Text(run) => (run.text.clone(), run.marks.bold),
                Inline::Opaque(o) => (o.html.clone(), false),
            })
            .collect()
    }

    #[test]
    fn split_off_keeps_marks_on_both_halves() {
        let bold = Marks {
            bold: true,
            ..Marks::default()
        };
        let mut block = TextBlock {
            style: TextStyle::Paragraph,
            inlines: vec![
                Inline::Text(TextRun::plain("ab")),
                Inline::Text(TextRun::with_marks("cde", bold)),
            ],
        };
        let tail = block.split_off(3);
        assert_eq!(runs(&block), vec![("ab".into(), false), ("c".into(), true)]);
        assert_eq!(tail.len(), 1);
        assert!(matches!(&tail[0], Inline::Text(run) if run.text == "de" && run.marks.bold));
    }

    #[test]
    fn clamp_offset_respects_char_boundaries_and_opaque_inlines() {
        let block = TextBlock {
            style: TextStyle::Paragraph,
            inlines: vec![
                Inline::Text(TextRun::plain("ü")),
                Inline::Opaque(OpaqueInline {
                    html: "<span>x</span>".into(),
                    marks: Marks::default(),
                }),
            ],
        };
        assert_eq!(block.len(), 3);
        assert_eq!(block.clamp_offset(1), 0);
        assert_eq!(block.clamp_offset(2), 2);
        assert_eq!(block.clamp_offset(9), 3);
    }

    #[test]
    fn remove_range_merges_neighbours() {
        let mut block = TextBlock::paragraph("hello world");
        block.remove_range(5, 11);
        assert_eq!(runs(&block), vec![("hello".into(), false)]);
    }

    #[test]
    fn move_block_before_and_after() {
        let mut doc = Document::from_kinds([
            BlockKind::Media(MediaBlock::image("u1")),
            BlockKind::Media(MediaBlock::image("u2")),
            BlockKind::Media(MediaBlock::image("u3")),
        ]);
        let ids: Vec<NodeId> = doc.blocks().iter().map(|b| b.id).collect();
        assert_eq!(doc.move_block(ids[2], DropPosition::Before(ids[0])), Ok(true));
        assert_eq!(doc.order_index(ids[2]), Some(0));
        assert_eq!(doc.move_block(ids[2], DropPosition::After(ids[1])), Ok(true));
        assert_eq!(doc.order_index(ids[2]), Some(2));
        assert_eq!(doc.move_block(ids[0], DropPosition::Before(ids[0])), Ok(false));
        assert_eq!(
            doc.move_block(NodeId(99), DropPosition::Before(ids[0])),
            Err(ApplyError::StaleReference(NodeId(99)))
        );
    }
}
