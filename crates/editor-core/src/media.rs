use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::{Block, BlockKind, Editor, InsertAt, InsertTarget, MediaBlock, MediaKind, NodeId};
use crate::html;
use crate::ops::{Op, Transaction};

static MEDIA_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/api/media/([a-f0-9]{24})").expect("valid media id regex"));

static IMAGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(jpeg|jpg|gif|png|webp|svg|bmp)(\?|$)").expect("valid image url regex")
});

impl MediaKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(MediaKind::Image)
        } else if mime.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// Stored media ids referenced by `/api/media/<id>` urls, in document order.
pub fn extract_media_ids(markup: &str) -> Vec<String> {
    MEDIA_ID_RE
        .captures_iter(markup)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Ids referenced by `old` that `new` no longer references. Each id is listed once.
pub fn unused_media_ids(old: &str, new: Option<&str>) -> Vec<String> {
    let still_used = new.map(extract_media_ids).unwrap_or_default();
    let mut unused: Vec<String> = Vec::new();
    for id in extract_media_ids(old) {
        if !still_used.contains(&id) && !unused.contains(&id) {
            unused.push(id);
        }
    }
    unused
}

/// Whether a dropped url points at an image file, judged by its extension.
pub fn is_image_url(url: &str) -> bool {
    IMAGE_URL_RE.is_match(url.trim())
}

impl Editor {
    /// Inserts an image for a url dropped onto the surface. Other urls are ignored.
    pub fn drop_url(&mut self, url: &str, y: f32) -> Option<NodeId> {
        let url = url.trim();
        if !is_image_url(url) {
            debug!(url, "ignoring dropped url");
            return None;
        }
        self.insert_node(BlockKind::Media(MediaBlock::image(url)), InsertAt::Point { y })
    }

    /// Inserts the blocks of dropped markup at the drop point.
    pub fn drop_html(&mut self, markup: &str, y: f32) -> bool {
        let dropped = html::load(markup);
        if dropped.is_empty() {
            return false;
        }
        let end = self.doc.len();
        let mut index = match self.resolve_insert_at(InsertAt::Point { y }) {
            InsertTarget::Before(id) => self.doc.index_of(id).unwrap_or(end),
            InsertTarget::After(id) | InsertTarget::Split { block: id, .. } => {
                self.doc.index_of(id).map_or(end, |ix| ix + 1)
            }
            InsertTarget::End => end,
        };

        let mut ops = Vec::with_capacity(dropped.len());
        for block in dropped.blocks() {
            let id = self.doc.alloc_id();
            ops.push(Op::InsertBlock {
                index,
                block: Block {
                    id,
                    kind: block.kind.clone(),
                },
            });
            index += 1;
        }
        self.apply(Transaction::new(ops).source("drop:html"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const A: &str = "65a1f0c2e4b0a1b2c3d4e5f6";
    const B: &str = "65a1f0c2e4b0a1b2c3d4e5f7";

    #[test]
    fn extracts_ids_in_order() {
        let markup = format!(
            "<div class=\"image-wrapper\"><img src=\"/api/media/{A}\"></div><p>x</p><video src=\"/api/media/{B}\"></video>"
        );
        assert_eq!(extract_media_ids(&markup), vec![A.to_string(), B.to_string()]);
        assert!(extract_media_ids("/api/media/not-an-id").is_empty());
    }

    #[test]
    fn unused_ids_are_those_dropped_from_new_content() {
        let old = format!("/api/media/{A} /api/media/{B} /api/media/{A}");
        let new = format!("/api/media/{B}");
        assert_eq!(unused_media_ids(&old, Some(&new)), vec![A.to_string()]);
        assert_eq!(unused_media_ids(&old, None), vec![A.to_string(), B.to_string()]);
    }

    #[rstest]
    #[case("https://example.com/a.jpg", true)]
    #[case("https://example.com/a.PNG?w=200", true)]
    #[case("/media/b.webp", true)]
    #[case("https://example.com/a.jpg.html", false)]
    #[case("https://example.com/page", false)]
    fn image_urls(#[case] url: &str, #[case] expected: bool) {
        assert_eq!(is_image_url(url), expected);
    }

    #[rstest]
    #[case("image/jpeg", Some(MediaKind::Image))]
    #[case("Video/MP4", Some(MediaKind::Video))]
    #[case("application/pdf", None)]
    #[case("", None)]
    fn kinds_from_mime(#[case] mime: &str, #[case] expected: Option<MediaKind>) {
        assert_eq!(MediaKind::from_mime(mime), expected);
    }
}
