use std::sync::Mutex;

use pretty_assertions::assert_eq;
use sauterhof_editor::{
    CROPPED_IMAGE_NAME, Cropper, Editor, EditorConfig, InsertAt, MediaFile, MediaKind, MediaStore,
    Point, Selection, UploadError, UploadPipeline,
};

#[derive(Default)]
struct RecordingStore {
    log: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingStore {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl MediaStore for RecordingStore {
    async fn store(&self, file: MediaFile, kind: MediaKind) -> Result<String, UploadError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("start {} {}", kind.as_str(), file.name));
        tokio::task::yield_now().await;
        self.log.lock().unwrap().push(format!("end {}", file.name));
        if self.fail {
            return Err(UploadError::UploadFailure("503 Service Unavailable".into()));
        }
        Ok(format!("/api/media/{}", file.name))
    }
}

struct SquareCropper;

impl Cropper for SquareCropper {
    async fn crop(&self, source: MediaFile, aspect: f32) -> Option<MediaFile> {
        assert_eq!(aspect, 1.0);
        Some(MediaFile::new("canvas.png", "image/jpeg", source.bytes))
    }
}

struct CancellingCropper;

impl Cropper for CancellingCropper {
    async fn crop(&self, _source: MediaFile, _aspect: f32) -> Option<MediaFile> {
        None
    }
}

fn outline(editor: &Editor) -> Vec<String> {
    editor
        .doc()
        .blocks()
        .iter()
        .map(|block| match (block.as_text(), block.as_media()) {
            (Some(text), _) => text.plain_text(),
            (_, Some(media)) => format!("[{}]", media.source_url),
            _ => "?".to_string(),
        })
        .collect()
}

fn caret(editor: &mut Editor, index: usize, offset: usize) {
    let id = editor.doc().blocks()[index].id;
    editor.set_selection(Selection::collapsed(Point::new(id, offset)));
}

fn video(name: &str, size: usize) -> MediaFile {
    MediaFile::new(name, "video/mp4", vec![0; size])
}

#[tokio::test]
async fn oversized_video_is_rejected_before_storing() {
    let pipeline = UploadPipeline::new(RecordingStore::default(), (), &EditorConfig::default());
    let mut editor = Editor::from_html("<p>Text</p>");
    let ticket = editor.begin_upload(MediaKind::Video, InsertAt::End);

    let result = pipeline.submit_video(video("big.mp4", 101 * 1024 * 1024)).await;
    let err = editor.complete_upload(ticket, result).unwrap_err();

    assert_eq!(
        err,
        UploadError::TooLarge {
            size: 101 * 1024 * 1024,
            limit: 100 * 1024 * 1024
        }
    );
    assert_eq!(err.user_message(), "Die Videodatei ist zu groß. Maximal 100 MB.");
    assert!(pipeline.store().log().is_empty());
    assert_eq!(editor.serialize(), "<p>Text</p>");
    assert_eq!(editor.pending_uploads(), 0);
}

#[tokio::test]
async fn video_at_the_limit_is_stored() {
    let config = EditorConfig {
        max_video_bytes: 16,
        ..EditorConfig::default()
    };
    let pipeline = UploadPipeline::new(RecordingStore::default(), (), &config);
    assert_eq!(
        pipeline.submit_video(video("clip.mp4", 16)).await,
        Ok("/api/media/clip.mp4".to_string())
    );
}

#[tokio::test]
async fn images_are_cropped_and_renamed() {
    let pipeline = UploadPipeline::new(RecordingStore::default(), SquareCropper, &EditorConfig::default());
    let url = pipeline
        .submit_image(MediaFile::new("welpe.png", "image/png", vec![1, 2, 3]))
        .await
        .unwrap();

    assert_eq!(url, format!("/api/media/{CROPPED_IMAGE_NAME}"));
    assert_eq!(
        pipeline.store().log(),
        vec![
            "start image cropped-image.jpg".to_string(),
            "end cropped-image.jpg".to_string()
        ]
    );
}

#[tokio::test]
async fn cancelled_crop_stores_nothing() {
    let pipeline = UploadPipeline::new(
        RecordingStore::default(),
        CancellingCropper,
        &EditorConfig::default(),
    );
    let result = pipeline
        .submit_image(MediaFile::new("welpe.png", "image/png", vec![1]))
        .await;
    assert_eq!(result, Err(UploadError::CropCancelled));
    assert!(pipeline.store().log().is_empty());
}

#[tokio::test]
async fn wrong_kind_is_rejected() {
    let pipeline = UploadPipeline::new(RecordingStore::default(), (), &EditorConfig::default());
    let result = pipeline
        .submit_image(MediaFile::new("notes.pdf", "application/pdf", vec![1]))
        .await;
    assert_eq!(
        result,
        Err(UploadError::WrongKind {
            expected: MediaKind::Image,
            mime: "application/pdf".to_string()
        })
    );

    let result = pipeline
        .submit_video(MediaFile::new("a.png", "image/png", vec![1]))
        .await;
    assert!(matches!(
        result,
        Err(UploadError::WrongKind {
            expected: MediaKind::Video,
            ..
        })
    ));
}

#[tokio::test]
async fn failed_upload_leaves_the_document_unchanged() {
    let pipeline = UploadPipeline::new(RecordingStore::failing(), (), &EditorConfig::default());
    let mut editor = Editor::from_html("<p>Text</p>");
    let revision = editor.revision();
    let ticket = editor.begin_upload(MediaKind::Image, InsertAt::End);

    let result = pipeline
        .submit_image(MediaFile::new("a.jpg", "image/jpeg", vec![1]))
        .await;
    let err = editor.complete_upload(ticket, result).unwrap_err();

    assert_eq!(err.user_message(), "Upload fehlgeschlagen. Bitte erneut versuchen.");
    assert_eq!(editor.serialize(), "<p>Text</p>");
    assert_eq!(editor.revision(), revision);
}

#[test]
fn empty_url_is_not_inserted() {
    let mut editor = Editor::from_html("<p>Text</p>");
    let ticket = editor.begin_upload(MediaKind::Image, InsertAt::End);
    assert_eq!(
        editor.complete_upload(ticket, Ok("   ".to_string())),
        Err(UploadError::EmptyUrl)
    );
    assert_eq!(editor.doc().media_blocks().count(), 0);
}

#[test]
fn tickets_complete_at_their_own_anchor_in_any_order() {
    let mut editor = Editor::from_html("<p>eins</p><p>zwei</p><p>drei</p>");
    let ids: Vec<_> = editor.doc().blocks().iter().map(|b| b.id).collect();

    editor.set_selection(Selection::collapsed(Point::new(ids[0], 4)));
    let image = editor.begin_upload(MediaKind::Image, InsertAt::Cursor);
    editor.set_selection(Selection::collapsed(Point::new(ids[1], 4)));
    let clip = editor.begin_upload(MediaKind::Video, InsertAt::Cursor);
    assert_eq!(editor.pending_uploads(), 2);

    editor.set_selection(Selection::collapsed(Point::new(ids[2], 4)));
    assert!(editor.insert_text("!"));

    let video_id = editor
        .complete_upload(clip, Ok("/api/media/v".to_string()))
        .unwrap();
    let image_id = editor
        .complete_upload(image, Ok("/api/media/i".to_string()))
        .unwrap();

    let order: Vec<_> = editor.doc().blocks().iter().map(|b| b.id).collect();
    assert_eq!(order, vec![ids[0], image_id, ids[1], video_id, ids[2]]);
    assert_eq!(editor.doc().plain_text(), "eins\nzwei\ndrei!");
    assert_eq!(editor.pending_uploads(), 0);

    assert!(editor.complete_upload(image, Ok("/api/media/i".to_string())).is_err());
}

#[tokio::test]
async fn uploads_run_one_at_a_time_in_submission_order() {
    let pipeline = UploadPipeline::new(RecordingStore::default(), (), &EditorConfig::default());

    let (a, b) = tokio::join!(
        pipeline.submit_video(video("a.mp4", 4)),
        pipeline.submit_video(video("b.mp4", 4)),
    );
    assert_eq!(a, Ok("/api/media/a.mp4".to_string()));
    assert_eq!(b, Ok("/api/media/b.mp4".to_string()));
    assert_eq!(
        pipeline.store().log(),
        vec![
            "start video a.mp4".to_string(),
            "end a.mp4".to_string(),
            "start video b.mp4".to_string(),
            "end b.mp4".to_string(),
        ]
    );
}

#[test]
fn typing_before_a_pending_upload_keeps_its_split_point() {
    let mut editor = Editor::from_html("<p>hello world</p>");
    caret(&mut editor, 0, 5);
    let ticket = editor.begin_upload(MediaKind::Image, InsertAt::Cursor);

    caret(&mut editor, 0, 0);
    assert!(editor.insert_text("Hi, "));
    editor
        .complete_upload(ticket, Ok("/api/media/i".to_string()))
        .unwrap();

    assert_eq!(outline(&editor), vec!["Hi, hello", "[/api/media/i]", " world"]);
}

#[test]
fn pending_upload_follows_its_text_into_a_split_off_block() {
    let mut editor = Editor::from_html("<p>hello world</p>");
    caret(&mut editor, 0, 8);
    let ticket = editor.begin_upload(MediaKind::Image, InsertAt::Cursor);

    caret(&mut editor, 0, 5);
    assert!(editor.split_block());
    editor
        .complete_upload(ticket, Ok("/api/media/i".to_string()))
        .unwrap();

    assert_eq!(outline(&editor), vec!["hello", " wo", "[/api/media/i]", "rld"]);
}

#[test]
fn pending_upload_follows_a_block_merge() {
    let mut editor = Editor::from_html("<p>ab</p><p>cd</p>");
    caret(&mut editor, 1, 1);
    let ticket = editor.begin_upload(MediaKind::Video, InsertAt::Cursor);

    caret(&mut editor, 1, 0);
    assert!(editor.delete_backward());
    editor
        .complete_upload(ticket, Ok("/api/media/v".to_string()))
        .unwrap();

    assert_eq!(outline(&editor), vec!["abc", "[/api/media/v]", "d"]);
}

#[test]
fn pending_upload_takes_the_place_of_a_removed_block() {
    let mut editor = Editor::from_html("<p>eins</p><p>zwei</p>");
    caret(&mut editor, 0, 2);
    let ticket = editor.begin_upload(MediaKind::Image, InsertAt::Cursor);

    let first = editor.doc().blocks()[0].id;
    assert!(editor.remove_node(first));
    editor
        .complete_upload(ticket, Ok("/api/media/i".to_string()))
        .unwrap();

    assert_eq!(outline(&editor), vec!["[/api/media/i]", "zwei"]);
}

#[test]
fn loading_a_new_document_drops_pending_uploads() {
    let mut editor = Editor::from_html("<p>hello world</p>");
    caret(&mut editor, 0, 5);
    let ticket = editor.begin_upload(MediaKind::Image, InsertAt::Cursor);

    editor.load("<p>other record</p>");
    assert_eq!(editor.pending_uploads(), 0);
    let err = editor
        .complete_upload(ticket, Ok("/api/media/i".to_string()))
        .unwrap_err();

    assert!(matches!(err, UploadError::UnknownTicket(_)));
    assert_eq!(err.user_message(), "Upload fehlgeschlagen. Bitte erneut versuchen.");
    assert_eq!(editor.serialize(), "<p>other record</p>");
}
