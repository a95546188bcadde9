//! Upload pipeline for media files.
//!
//! Images go through a crop step before they are stored; videos are checked against
//! the size ceiling and stored as they are. The store and cropper are supplied by the
//! host, so the pipeline itself never touches the network or a UI.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::EditorConfig;
use crate::core::{
    Block, BlockKind, Document, Editor, Inline, InsertAt, InsertTarget, MediaBlock, MediaKind,
    NodeId,
};
use crate::ops::Op;

/// File name the cropped image is stored under.
pub const CROPPED_IMAGE_NAME: &str = "cropped-image.jpg";

const DEFAULT_DATA_URL_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("upload failed: {0}")]
    UploadFailure(String),
    #[error("file is too large: {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("expected a {} file, got {mime:?}", expected.as_str())]
    WrongKind { expected: MediaKind, mime: String },
    #[error("crop was cancelled")]
    CropCancelled,
    #[error("store returned an empty url")]
    EmptyUrl,
    #[error("upload ticket {0} is not pending")]
    UnknownTicket(u64),
}

impl UploadError {
    /// Message shown to the user. Every failure except a cancelled crop is retryable.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::TooLarge { limit, .. } => format!(
                "Die Videodatei ist zu groß. Maximal {} MB.",
                limit / (1024 * 1024)
            ),
            UploadError::WrongKind {
                expected: MediaKind::Image,
                ..
            } => "Bitte eine Bilddatei auswählen.".to_string(),
            UploadError::WrongKind {
                expected: MediaKind::Video,
                ..
            } => "Bitte eine Videodatei auswählen.".to_string(),
            UploadError::CropCancelled => "Zuschneiden abgebrochen.".to_string(),
            UploadError::UploadFailure(_)
            | UploadError::EmptyUrl
            | UploadError::UnknownTicket(_) => {
                "Upload fehlgeschlagen. Bitte erneut versuchen.".to_string()
            }
        }
    }
}

/// Stores a file and returns the url it can be rendered from.
pub trait MediaStore {
    fn store(
        &self,
        file: MediaFile,
        kind: MediaKind,
    ) -> impl std::future::Future<Output = Result<String, UploadError>>;
}

/// Interactive crop step. Resolves to the re-encoded image, or `None` when the user
/// cancels.
pub trait Cropper {
    fn crop(
        &self,
        source: MediaFile,
        aspect: f32,
    ) -> impl std::future::Future<Output = Option<MediaFile>>;
}

/// Unit type implementation - the source is already cropped.
impl Cropper for () {
    async fn crop(&self, source: MediaFile, _aspect: f32) -> Option<MediaFile> {
        Some(source)
    }
}

/// Crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest rectangle of the given aspect (width / height) centered in the image.
pub fn centered_crop(image_width: u32, image_height: u32, aspect: f32) -> CropRect {
    let aspect = if aspect.is_finite() && aspect > 0.0 {
        aspect
    } else {
        1.0
    };
    let (w, h) = (image_width as f32, image_height as f32);
    let (width, height) = if w / h.max(1.0) > aspect {
        ((h * aspect).round(), h)
    } else {
        (w, (w / aspect).round())
    };
    let width = (width as u32).min(image_width);
    let height = (height as u32).min(image_height);
    CropRect {
        x: (image_width - width) / 2,
        y: (image_height - height) / 2,
        width,
        height,
    }
}

/// Runs uploads one at a time in submission order.
pub struct UploadPipeline<S, C> {
    store: S,
    cropper: C,
    queue: Mutex<()>,
    max_video_bytes: u64,
    crop_aspect: f32,
}

impl<S: MediaStore, C: Cropper> UploadPipeline<S, C> {
    pub fn new(store: S, cropper: C, config: &EditorConfig) -> Self {
        Self {
            store,
            cropper,
            queue: Mutex::new(()),
            max_video_bytes: config.max_video_bytes,
            crop_aspect: config.crop_aspect,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn submit_image(&self, file: MediaFile) -> Result<String, UploadError> {
        if file.kind() != Some(MediaKind::Image) {
            return Err(UploadError::WrongKind {
                expected: MediaKind::Image,
                mime: file.mime,
            });
        }
        let Some(mut cropped) = self.cropper.crop(file, self.crop_aspect).await else {
            debug!("image crop cancelled");
            return Err(UploadError::CropCancelled);
        };
        cropped.name = CROPPED_IMAGE_NAME.to_string();
        self.upload(cropped, MediaKind::Image).await
    }

    pub async fn submit_video(&self, file: MediaFile) -> Result<String, UploadError> {
        if file.kind() != Some(MediaKind::Video) {
            return Err(UploadError::WrongKind {
                expected: MediaKind::Video,
                mime: file.mime,
            });
        }
        if file.size() > self.max_video_bytes {
            warn!(
                size = file.size(),
                limit = self.max_video_bytes,
                "rejecting oversized video"
            );
            return Err(UploadError::TooLarge {
                size: file.size(),
                limit: self.max_video_bytes,
            });
        }
        self.upload(file, MediaKind::Video).await
    }

    async fn upload(&self, file: MediaFile, kind: MediaKind) -> Result<String, UploadError> {
        let _turn = self.queue.lock().await;
        let name = file.name.clone();
        let size = file.size();
        match self.store.store(file, kind).await {
            Ok(url) if url.trim().is_empty() => {
                warn!(%name, "store returned an empty url");
                Err(UploadError::EmptyUrl)
            }
            Ok(url) => {
                debug!(%name, size, %url, kind = kind.as_str(), "stored media");
                Ok(url)
            }
            Err(err) => {
                warn!(%name, %err, "upload failed");
                Err(err)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Posts files as multipart field `file` and reads `{ "url": ... }` back.
#[derive(Debug, Clone)]
pub struct HttpMediaStore {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpMediaStore {
    pub fn new(base_url: &str, endpoint: &str) -> Result<Self, UploadError> {
        let endpoint = reqwest::Url::parse(base_url)
            .and_then(|base| base.join(endpoint))
            .map_err(|err| UploadError::UploadFailure(format!("invalid upload url: {err}")))?;
        Ok(Self::with_client(reqwest::Client::new(), endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: reqwest::Url) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }
}

impl MediaStore for HttpMediaStore {
    async fn store(&self, file: MediaFile, _kind: MediaKind) -> Result<String, UploadError> {
        let failure = |err: reqwest::Error| UploadError::UploadFailure(err.to_string());
        let part = reqwest::multipart::Part::bytes(file.bytes)
            .file_name(file.name)
            .mime_str(&file.mime)
            .map_err(failure)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(failure)?
            .error_for_status()
            .map_err(failure)?;
        let body: UploadResponse = response.json().await.map_err(failure)?;
        Ok(body.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataUrlError {
    #[error("not a data url")]
    MissingPrefix,
    #[error("data url has no payload")]
    MissingData,
    #[error("data url payload is not base64")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decodes a base64 `data:` url (as produced by a canvas crop) into a file.
pub fn decode_data_url(data_url: &str, name: &str) -> Result<MediaFile, DataUrlError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or(DataUrlError::MissingPrefix)?;
    let (header, payload) = rest.split_once(',').ok_or(DataUrlError::MissingData)?;
    let mut params = header.split(';');
    let mime = params
        .next()
        .filter(|mime| !mime.is_empty())
        .unwrap_or(DEFAULT_DATA_URL_MIME);
    if !params.any(|param| param.eq_ignore_ascii_case("base64")) {
        return Err(DataUrlError::NotBase64);
    }
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(MediaFile::new(name, mime, bytes))
}

/// Handle for an upload whose insertion point was fixed when it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadTicket {
    id: u64,
    kind: MediaKind,
}

impl UploadTicket {
    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

/// Insertion anchors of pending uploads. Every applied op moves them along with the
/// content they point into.
#[derive(Debug, Default)]
pub(crate) struct PendingUploads {
    next_id: u64,
    anchors: HashMap<u64, InsertTarget>,
    /// Tails cut off an anchored block earlier in the current transaction.
    cuts: Vec<Cut>,
    /// Blocks whose inlines were replaced earlier in the current transaction.
    touched: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Cut {
    ticket: u64,
    tail: Vec<u8>,
    offset: usize,
}

/// Anchor updates implied by one op, computed before the op runs.
#[derive(Debug, Default)]
pub(crate) struct AnchorMoves {
    moves: Vec<(u64, InsertTarget)>,
    cuts: Vec<Cut>,
    consumed: Vec<u64>,
    touched: Option<NodeId>,
}

impl PendingUploads {
    pub(crate) fn clear(&mut self) {
        if !self.anchors.is_empty() {
            debug!(dropped = self.anchors.len(), "dropping pending uploads");
        }
        self.anchors.clear();
        self.end_transaction();
    }

    pub(crate) fn end_transaction(&mut self) {
        self.cuts.clear();
        self.touched.clear();
    }

    pub(crate) fn follow(&self, doc: &Document, op: &Op) -> AnchorMoves {
        let mut out = AnchorMoves::default();
        if self.anchors.is_empty() {
            return out;
        }
        match op {
            Op::SetInlines { id, inlines } => {
                out.touched = Some(*id);
                let Some(old) = doc.text(*id) else {
                    return out;
                };
                let old_units = units(&old.inlines);
                let new_units = units(inlines);
                for (&ticket, target) in &self.anchors {
                    let InsertTarget::Split { block, offset } = *target else {
                        continue;
                    };
                    if block != *id {
                        continue;
                    }
                    let offset = old.clamp_offset(offset);
                    let (moved, cut) = shift_offset(&old_units, &new_units, offset);
                    out.moves.push((ticket, InsertTarget::Split { block, offset: moved }));
                    if let Some((tail, offset)) = cut {
                        out.cuts.push(Cut {
                            ticket,
                            tail,
                            offset,
                        });
                    }
                }
            }
            Op::InsertBlock { block, .. } => {
                let Some(text) = block.as_text() else {
                    return out;
                };
                let inserted = units(&text.inlines);
                for cut in &self.cuts {
                    if cut.tail == inserted && !out.consumed.contains(&cut.ticket) {
                        out.consumed.push(cut.ticket);
                        out.moves.push((
                            cut.ticket,
                            InsertTarget::Split {
                                block: block.id,
                                offset: cut.offset,
                            },
                        ));
                    }
                }
            }
            Op::RemoveBlock { id } => {
                let Some(index) = doc.index_of(*id) else {
                    return out;
                };
                let blocks = doc.blocks();
                let prev = index.checked_sub(1).and_then(|ix| blocks.get(ix));
                let next = blocks.get(index + 1);
                for (&ticket, target) in &self.anchors {
                    let moved = match *target {
                        InsertTarget::Split { block, offset } if block == *id => self
                            .merged_into(prev, &blocks[index], offset)
                            .unwrap_or_else(|| took_place_of(prev, next)),
                        InsertTarget::Before(block) if block == *id => took_place_of(prev, next),
                        InsertTarget::After(block) if block == *id => match (prev, next) {
                            (Some(prev), _) => InsertTarget::After(prev.id),
                            (None, Some(next)) => InsertTarget::Before(next.id),
                            (None, None) => InsertTarget::End,
                        },
                        _ => continue,
                    };
                    out.moves.push((ticket, moved));
                }
            }
            Op::MoveBlock { .. } | Op::SetTextStyle { .. } | Op::SetMedia { .. } => {}
        }
        out
    }

    /// Where an anchor lands when its block was merged into the text block before it.
    fn merged_into(&self, prev: Option<&Block>, removed: &Block, offset: usize) -> Option<InsertTarget> {
        let prev = prev?;
        if !self.touched.contains(&prev.id) {
            return None;
        }
        let prev_units = units(&prev.as_text()?.inlines);
        let removed_text = removed.as_text()?;
        let removed_units = units(&removed_text.inlines);
        let offset = removed_text.clamp_offset(offset);
        let shared = common_suffix(&prev_units, &removed_units);
        let from_end = if offset >= removed_units.len() - shared {
            removed_units.len() - offset
        } else {
            shared
        };
        Some(InsertTarget::Split {
            block: prev.id,
            offset: prev_units.len() - from_end,
        })
    }

    pub(crate) fn settle(&mut self, moves: AnchorMoves) {
        for (ticket, target) in moves.moves {
            if let Some(anchor) = self.anchors.get_mut(&ticket) {
                trace!(ticket, ?target, "upload anchor moved");
                *anchor = target;
            }
        }
        self.cuts.retain(|cut| !moves.consumed.contains(&cut.ticket));
        self.cuts.extend(moves.cuts);
        if let Some(id) = moves.touched {
            self.touched.push(id);
        }
    }
}

/// Anchor for content that used to sit where a removed block was.
fn took_place_of(prev: Option<&Block>, next: Option<&Block>) -> InsertTarget {
    match (prev, next) {
        (_, Some(next)) => InsertTarget::Before(next.id),
        (Some(prev), None) => InsertTarget::After(prev.id),
        (None, None) => InsertTarget::End,
    }
}

/// A block's content as offset units: text bytes, one placeholder per opaque inline.
fn units(inlines: &[Inline]) -> Vec<u8> {
    let mut out = Vec::new();
    for inline in inlines {
        match inline {
            Inline::Text(run) => out.extend_from_slice(run.text.as_bytes()),
            Inline::Opaque(_) => out.push(0xff),
        }
    }
    out
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter().rev().zip(b.iter().rev()).take_while(|(x, y)| x == y).count()
}

/// Moves `offset` from `old` into `new` around the single edited span between their
/// common prefix and suffix. When `new` is `old` with its tail cut off and the offset
/// lay inside that tail, the tail and the offset into it are returned as well.
fn shift_offset(old: &[u8], new: &[u8], offset: usize) -> (usize, Option<(Vec<u8>, usize)>) {
    let prefix = old.iter().zip(new).take_while(|(x, y)| x == y).count();
    let suffix = common_suffix(&old[prefix..], &new[prefix..]);
    if offset <= prefix {
        return (offset, None);
    }
    if offset >= old.len() - suffix {
        return (offset + new.len() - old.len(), None);
    }
    if suffix == 0 && new.len() == prefix {
        return (prefix, Some((old[prefix..].to_vec(), offset - prefix)));
    }
    (new.len() - suffix, None)
}

impl Editor {
    /// Captures where the uploaded media will go. Typing may continue meanwhile.
    pub fn begin_upload(&mut self, kind: MediaKind, at: InsertAt) -> UploadTicket {
        let target = self.resolve_insert_at(at);
        let uploads = &mut self.uploads;
        uploads.next_id += 1;
        uploads.anchors.insert(uploads.next_id, target);
        debug!(ticket = uploads.next_id, ?target, "upload started");
        UploadTicket {
            id: uploads.next_id,
            kind,
        }
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.anchors.len()
    }

    /// Inserts the uploaded media at the ticket's anchor. Failures leave the document
    /// untouched and are handed back for the user message.
    pub fn complete_upload(
        &mut self,
        ticket: UploadTicket,
        result: Result<String, UploadError>,
    ) -> Result<NodeId, UploadError> {
        let Some(target) = self.uploads.anchors.remove(&ticket.id) else {
            return Err(UploadError::UnknownTicket(ticket.id));
        };
        let url = match result {
            Ok(url) if url.trim().is_empty() => {
                warn!(ticket = ticket.id, "upload finished without a url");
                return Err(UploadError::EmptyUrl);
            }
            Ok(url) => url,
            Err(err) => {
                warn!(ticket = ticket.id, %err, "upload failed, nothing inserted");
                return Err(err);
            }
        };
        let block = BlockKind::Media(MediaBlock::new(ticket.kind, url));
        self.insert_at_target(block, target, "upload")
            .ok_or_else(|| UploadError::UploadFailure("media block was not inserted".to_string()))
    }
}
