use pretty_assertions::assert_eq;
use sauterhof_editor::{
    BlockKind, Document, Editor, InsertAt, MediaBlock, MediaKind, NodeId, DropPosition, html,
};

fn media_urls(editor: &Editor) -> Vec<String> {
    editor
        .doc()
        .media_blocks()
        .map(|(_, media)| media.source_url.clone())
        .collect()
}

fn media_id(editor: &Editor, url: &str) -> NodeId {
    editor
        .doc()
        .media_blocks()
        .find(|(_, media)| media.source_url == url)
        .map(|(id, _)| id)
        .expect("media block")
}

#[test]
fn empty_document_inserts_and_reorders_media() {
    let mut editor = Editor::from_html("");
    assert_eq!(editor.serialize(), "");

    editor
        .insert_node(BlockKind::Media(MediaBlock::image("u1")), InsertAt::End)
        .unwrap();
    editor
        .insert_node(BlockKind::Media(MediaBlock::image("u2")), InsertAt::End)
        .unwrap();

    let reloaded = Editor::from_html(&editor.serialize());
    assert_eq!(media_urls(&reloaded), vec!["u1", "u2"]);

    let u1 = media_id(&editor, "u1");
    let u2 = media_id(&editor, "u2");
    assert!(editor.move_node(u2, DropPosition::Before(u1)));
    assert_eq!(media_urls(&editor), vec!["u2", "u1"]);
    assert_eq!(editor.doc().order_index(u2), Some(0));

    let reloaded = Editor::from_html(&editor.serialize());
    assert_eq!(media_urls(&reloaded), vec!["u2", "u1"]);
}

#[test]
fn inserted_source_urls_are_trimmed_like_loaded_ones() {
    let mut editor = Editor::from_html("");
    let id = editor
        .insert_node(
            BlockKind::Media(MediaBlock::video("  /api/media/clip \n")),
            InsertAt::End,
        )
        .unwrap();
    assert_eq!(
        editor.doc().media(id).map(|m| m.source_url.as_str()),
        Some("/api/media/clip")
    );

    let reloaded = Editor::from_html(&editor.serialize());
    assert!(reloaded.doc().is_equivalent(editor.doc()));
}

#[test]
fn stored_widths_below_the_minimum_are_raised_on_load() {
    let markup = "<div class=\"image-wrapper\" contenteditable=\"false\" style=\"width: 10px;\">\
<img src=\"u1\"></div>";
    let mut editor = Editor::from_html(markup);
    let (id, media) = editor.doc().media_blocks().next().unwrap();
    assert_eq!(media.width, Some(50));

    editor.load(&markup.replace("10px", "0px"));
    let (_, media) = editor.doc().media_blocks().next().unwrap();
    assert_eq!(media.width, Some(50));
    assert!(!editor.doc().contains(id));
}

#[test]
fn media_markup_serializes_caption_and_width() {
    let mut editor = Editor::from_html("");
    let id = editor
        .insert_node(
            BlockKind::Media(MediaBlock::image("/api/media/abc").with_width(320)),
            InsertAt::End,
        )
        .unwrap();
    assert!(editor.set_caption(id, "Welpe \"Anton\" & Bruder"));

    assert_eq!(
        editor.serialize(),
        "<div class=\"image-wrapper\" contenteditable=\"false\" style=\"width: 320px;\">\
<img src=\"/api/media/abc\" alt=\"inserted image\">\
<input type=\"text\" class=\"image-caption\" placeholder=\"Bildunterschrift hinzufügen (optional)\" \
value=\"Welpe &quot;Anton&quot; &amp; Bruder\"></div>"
    );

    let reloaded = Editor::from_html(&editor.serialize());
    let (_, media) = reloaded.doc().media_blocks().next().unwrap();
    assert_eq!(media.caption, "Welpe \"Anton\" & Bruder");
    assert_eq!(media.width, Some(320));
}

#[test]
fn round_trip_keeps_mixed_content_equivalent() {
    let input = concat!(
        "<h1>Wurf A</h1>",
        "<p>Die <b>Welpen</b> sind <i>da</i>, <u>endlich</u>!<br>Zweite Zeile</p>",
        "<ul><li>Anton</li><li><a href=\"https://sauterhof.de\" target=\"_blank\">Berta</a></li></ul>",
        "<div class=\"video-wrapper\" contenteditable=\"false\"><video src=\"/api/media/v1\" controls preload=\"metadata\"></video>",
        "<input type=\"text\" class=\"video-caption\" value=\"Spielzeit\"></div>",
        "<ol><li>eins</li></ol>",
        "<table><tr><td>Gewicht</td></tr></table>",
        "<h2>Ende</h2>",
    );
    let first = html::load(input);
    let serialized = html::serialize_document(&first);
    let second = html::load(&serialized);

    assert!(first.is_equivalent(&second));
    assert_eq!(html::serialize_document(&second), serialized);
    assert_eq!(first.len(), 8);
}

#[test]
fn unknown_markup_is_kept_verbatim() {
    let input = "<p>rot: <span style=\"color: red\">Achtung</span></p><table><tr><td>x</td></tr></table>";
    let editor = Editor::from_html(input);
    assert_eq!(editor.serialize(), input);
    assert!(matches!(editor.doc().blocks()[1].kind, BlockKind::Opaque(_)));
}

#[test]
fn malformed_markup_loads_as_empty_document() {
    let mut editor = Editor::from_html("<p>ok</p>");
    editor.load("<p>ok</p><img src=\"x\"");
    assert!(editor.doc().is_empty());
    assert_eq!(editor.serialize(), "");
}

#[test]
fn legacy_inline_images_split_their_paragraph() {
    let editor = Editor::from_html("<p>vor<img class=\"rte-image\" src=\"/api/media/x\">nach</p>");
    let kinds: Vec<&str> = editor
        .doc()
        .blocks()
        .iter()
        .map(|b| match &b.kind {
            BlockKind::Text(_) => "text",
            BlockKind::Media(_) => "media",
            BlockKind::Opaque(_) => "opaque",
        })
        .collect();
    assert_eq!(kinds, vec!["text", "media", "text"]);
    let (_, media) = editor.doc().media_blocks().next().unwrap();
    assert_eq!(media.kind, MediaKind::Image);
    assert_eq!(editor.doc().plain_text(), "vor\nnach");
}

#[test]
fn bare_top_level_video_is_recognized() {
    let doc: Document = html::load("<video src=\"/api/media/v\" style=\"width: 400px\"></video>");
    let (_, media) = doc.media_blocks().next().unwrap();
    assert_eq!(media.kind, MediaKind::Video);
    assert_eq!(media.width, Some(400));
    assert!(media.caption.is_empty());
}
