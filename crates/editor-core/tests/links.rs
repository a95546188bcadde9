use pretty_assertions::assert_eq;
use rstest::rstest;
use sauterhof_editor::{Editor, Point, Selection, normalize_link_url};
use serde_json::json;

fn select(editor: &mut Editor, start: usize, end: usize) -> Selection {
    let block = editor.doc().blocks()[0].id;
    let selection = Selection::new(Point::new(block, start), Point::new(block, end));
    editor.set_selection(selection);
    selection
}

#[test]
fn link_without_text_shows_the_url() {
    let mut editor = Editor::from_html("<p>hello world</p>");
    let selection = select(&mut editor, 6, 11);

    assert!(editor.insert_link("https://example.com", "", &selection));
    assert_eq!(
        editor.serialize(),
        "<p>hello <a href=\"https://example.com\" target=\"_blank\">https://example.com</a></p>"
    );
}

#[test]
fn link_with_display_text() {
    let mut editor = Editor::from_html("<p>Mehr Infos</p>");
    let selection = select(&mut editor, 5, 10);

    assert!(editor.insert_link("sauterhof.de/welpen", "hier", &selection));
    assert_eq!(
        editor.serialize(),
        "<p>Mehr <a href=\"https://sauterhof.de/welpen\" target=\"_blank\">hier</a></p>"
    );
    assert_eq!(
        editor.toolbar_state().link,
        None,
        "caret after the link arms plain marks"
    );
}

#[test]
fn typing_after_a_link_does_not_extend_it() {
    let mut editor = Editor::from_html("<p>Siehe</p>");
    let selection = select(&mut editor, 5, 5);

    assert!(editor.insert_link("https://example.com", "Seite", &selection));
    assert!(editor.insert_text("!"));
    assert_eq!(
        editor.serialize(),
        "<p>Siehe<a href=\"https://example.com\" target=\"_blank\">Seite</a>!</p>"
    );
}

#[test]
fn link_inherits_surrounding_marks() {
    let mut editor = Editor::from_html("<p><b>fett</b></p>");
    let selection = select(&mut editor, 4, 4);

    assert!(editor.insert_link("/kontakt", "Kontakt", &selection));
    assert_eq!(
        editor.serialize(),
        "<p><b>fett</b><a href=\"/kontakt\" target=\"_blank\"><b>Kontakt</b></a></p>"
    );
}

#[test]
fn link_command_requires_a_url() {
    let mut editor = Editor::from_html("<p>abc</p>");
    select(&mut editor, 0, 3);

    let err = editor
        .run_command("link.insert", Some(json!({ "url": "  " })))
        .unwrap_err();
    assert_eq!(err.message(), "Missing args.url");
    let err = editor.run_command("link.insert", None).unwrap_err();
    assert_eq!(err.message(), "Missing args.url");
    assert_eq!(editor.serialize(), "<p>abc</p>");

    editor
        .run_command(
            "link.insert",
            Some(json!({ "url": "example.com", "text": "Beispiel" })),
        )
        .unwrap();
    assert_eq!(
        editor.serialize(),
        "<p><a href=\"https://example.com\" target=\"_blank\">Beispiel</a></p>"
    );
}

#[rstest]
#[case("example.com", "https://example.com")]
#[case("  http://example.com ", "http://example.com")]
#[case("mailto:info@sauterhof.de", "mailto:info@sauterhof.de")]
#[case("/api/media/abc", "/api/media/abc")]
#[case("#kontakt", "#kontakt")]
#[case("example.com:8080/wurf", "https://example.com:8080/wurf")]
#[case("localhost:3000", "https://localhost:3000")]
#[case("HTTPS://Example.com", "HTTPS://Example.com")]
#[case("ftp://files.sauterhof.de", "ftp://files.sauterhof.de")]
#[case("tel:+497000123", "tel:+497000123")]
#[case("", "")]
fn link_urls_are_normalized(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(normalize_link_url(input), expected);
}
