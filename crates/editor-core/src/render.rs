//! Projection of the document into a view tree.
//!
//! The view is rebuilt from the document on every call; nothing in it refers back to
//! previously rendered output, so hosts can diff or replace it wholesale.

use serde::Serialize;

use crate::config::EditorConfig;
use crate::core::{BlockKind, Document, DropPosition, Editor, MediaKind, NodeId, TextStyle};
use crate::gesture::{Gesture, ResizeHandle};
use crate::html::{self, IMAGE_ALT};

/// Interaction state the projection needs besides the document.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub selected_media: Option<NodeId>,
    pub dragging: Option<NodeId>,
    pub drop_indicator: Option<DropPosition>,
    pub focused_caption: Option<NodeId>,
    pub placeholder: String,
    pub image_caption_placeholder: String,
    pub video_caption_placeholder: String,
}

impl ViewState {
    pub fn from_config(config: &EditorConfig) -> Self {
        Self {
            placeholder: config.placeholder.clone(),
            image_caption_placeholder: config.image_caption_placeholder.clone(),
            video_caption_placeholder: config.video_caption_placeholder.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderMedia {
    pub id: NodeId,
    pub kind: MediaKind,
    pub tag: &'static str,
    pub source_url: String,
    pub alt: Option<&'static str>,
    /// `"100%"` at natural width, otherwise `"{n}px"`.
    pub width: String,
    pub selected: bool,
    pub dragging: bool,
    pub handles: Vec<&'static str>,
    pub caption: String,
    pub caption_placeholder: String,
    pub caption_focused: bool,
    pub order_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderBlock {
    Text {
        id: NodeId,
        tag: &'static str,
        style: TextStyle,
        html: String,
    },
    Media(RenderMedia),
    Opaque {
        id: NodeId,
        html: String,
    },
}

impl RenderBlock {
    pub fn id(&self) -> NodeId {
        match self {
            RenderBlock::Text { id, .. } | RenderBlock::Opaque { id, .. } => *id,
            RenderBlock::Media(media) => media.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderTree {
    pub blocks: Vec<RenderBlock>,
    pub drop_indicator: Option<DropPosition>,
    pub placeholder: Option<String>,
    pub char_count: usize,
}

pub fn render(doc: &Document, view: &ViewState) -> RenderTree {
    let mut blocks = Vec::with_capacity(doc.len());
    let mut media_index = 0usize;
    let mut char_count = 0usize;
    let mut has_content = false;

    for block in doc.blocks() {
        match &block.kind {
            BlockKind::Text(text) => {
                let chars = text.plain_text().chars().count();
                char_count += chars;
                has_content |= !text.is_empty();
                let mut markup = String::new();
                html::write_inlines(&mut markup, &text.inlines);
                blocks.push(RenderBlock::Text {
                    id: block.id,
                    tag: text.style.tag(),
                    style: text.style,
                    html: markup,
                });
            }
            BlockKind::Media(media) => {
                has_content = true;
                let (tag, alt, placeholder) = match media.kind {
                    MediaKind::Image => ("img", Some(IMAGE_ALT), &view.image_caption_placeholder),
                    MediaKind::Video => ("video", None, &view.video_caption_placeholder),
                };
                blocks.push(RenderBlock::Media(RenderMedia {
                    id: block.id,
                    kind: media.kind,
                    tag,
                    source_url: media.source_url.clone(),
                    alt,
                    width: media
                        .width
                        .map_or_else(|| "100%".to_string(), |w| format!("{w}px")),
                    selected: view.selected_media == Some(block.id),
                    dragging: view.dragging == Some(block.id),
                    handles: ResizeHandle::ALL.iter().map(|h| h.as_str()).collect(),
                    caption: media.caption.clone(),
                    caption_placeholder: placeholder.clone(),
                    caption_focused: view.focused_caption == Some(block.id),
                    order_index: media_index,
                }));
                media_index += 1;
            }
            BlockKind::Opaque(opaque) => {
                has_content = true;
                blocks.push(RenderBlock::Opaque {
                    id: block.id,
                    html: opaque.html.clone(),
                });
            }
        }
    }

    RenderTree {
        blocks,
        drop_indicator: view.drop_indicator,
        placeholder: (!has_content).then(|| view.placeholder.clone()),
        char_count,
    }
}

impl Editor {
    pub fn view_state(&self) -> ViewState {
        let mut view = ViewState::from_config(&self.config);
        view.selected_media = self.interaction.selected_media;
        view.focused_caption = self.interaction.focused_caption;
        if let Gesture::Dragging(session) = &self.interaction.gesture {
            view.dragging = Some(session.block);
            view.drop_indicator = session.indicator;
        }
        view
    }

    pub fn render(&self) -> RenderTree {
        render(&self.doc, &self.view_state())
    }
}
