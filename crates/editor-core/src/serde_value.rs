use serde::Serialize;

use crate::core::{Document, MediaKind, NodeId};

const DEFAULT_SCHEMA: &str = "sauterhof-editor";
const DEFAULT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaSummary {
    pub id: NodeId,
    pub order_index: usize,
    pub kind: MediaKind,
    pub source_url: String,
    pub width: Option<u32>,
}

/// JSON view of a document for tooling: the block tree plus the derived media order.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentValue<'a> {
    pub schema: &'static str,
    pub version: u32,
    pub document: &'a Document,
    pub media: Vec<MediaSummary>,
}

impl<'a> DocumentValue<'a> {
    pub fn from_document(document: &'a Document) -> Self {
        let media = document
            .media_blocks()
            .enumerate()
            .map(|(order_index, (id, media))| MediaSummary {
                id,
                order_index,
                kind: media.kind,
                source_url: media.source_url.clone(),
                width: media.width,
            })
            .collect();
        Self {
            schema: DEFAULT_SCHEMA,
            version: DEFAULT_VERSION,
            document,
            media,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
