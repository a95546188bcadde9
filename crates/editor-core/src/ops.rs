use serde::{Deserialize, Serialize};

use crate::core::{Block, DropPosition, Inline, NodeId, Selection, TextStyle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    InsertBlock {
        index: usize,
        block: Block,
    },
    RemoveBlock {
        id: NodeId,
    },
    MoveBlock {
        id: NodeId,
        to: DropPosition,
    },
    SetTextStyle {
        id: NodeId,
        style: TextStyle,
    },
    SetInlines {
        id: NodeId,
        #[serde(default)]
        inlines: Vec<Inline>,
    },
    SetMedia {
        id: NodeId,
        patch: MediaPatch,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::InsertBlock { .. } => "insert_block",
            Op::RemoveBlock { .. } => "remove_block",
            Op::MoveBlock { .. } => "move_block",
            Op::SetTextStyle { .. } => "set_text_style",
            Op::SetInlines { .. } => "set_inlines",
            Op::SetMedia { .. } => "set_media",
        }
    }
}

/// Fields left as `None` are not touched. `width: Some(None)` resets to natural width.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Option<u32>>,
}

impl MediaPatch {
    pub fn caption(caption: impl Into<String>) -> Self {
        Self {
            caption: Some(caption.into()),
            width: None,
        }
    }

    pub fn width(width: Option<u32>) -> Self {
        Self {
            caption: None,
            width: Some(width),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Schedule a checkpoint once the quiet window elapses.
    #[default]
    Debounced,
    /// Live feedback writes that must not be recorded on their own.
    Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub history: HistoryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub ops: Vec<Op>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_after: Option<Selection>,
    #[serde(default)]
    pub meta: TransactionMeta,
}

impl Transaction {
    pub fn new(ops: Vec<Op>) -> Self {
        Self {
            ops,
            selection_after: None,
            meta: TransactionMeta::default(),
        }
    }

    pub fn selection_after(mut self, selection_after: Selection) -> Self {
        self.selection_after = Some(selection_after);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.meta.source = Some(source.into());
        self
    }

    pub fn skip_history(mut self) -> Self {
        self.meta.history = HistoryPolicy::Skip;
        self
    }
}
