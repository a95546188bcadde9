use pretty_assertions::assert_eq;
use sauterhof_editor::{Editor, Key, Modifiers, Point, Selection};
use serde_json::json;

fn select_first(editor: &mut Editor, start: usize, end: usize) {
    let block = editor.doc().blocks()[0].id;
    editor.set_selection(Selection::new(Point::new(block, start), Point::new(block, end)));
}

#[test]
fn registry_lists_every_command() {
    let editor = Editor::from_html("");
    assert_eq!(
        editor.registry().command_ids(),
        vec![
            "block.set_heading",
            "history.redo",
            "history.undo",
            "link.insert",
            "list.toggle_bulleted",
            "list.toggle_numbered",
            "marks.toggle_bold",
            "marks.toggle_italic",
            "marks.toggle_underline",
            "media.remove_selected",
        ]
    );
}

#[test]
fn unknown_command_is_an_error() {
    let mut editor = Editor::from_html("<p>a</p>");
    let err = editor.run_command("marks.toggle_strike", None).unwrap_err();
    assert_eq!(err.message(), "Unknown command: marks.toggle_strike");
    assert_eq!(err.to_string(), "Unknown command: marks.toggle_strike");
}

#[test]
fn mark_commands_use_the_current_selection() {
    let mut editor = Editor::from_html("<p>abcd</p>");
    select_first(&mut editor, 1, 3);

    editor.run_command("marks.toggle_bold", None).unwrap();
    editor.run_command("marks.toggle_underline", None).unwrap();
    assert_eq!(editor.serialize(), "<p>a<b><u>bc</u></b>d</p>");
}

#[test]
fn commands_without_a_selection_fail() {
    let mut editor = Editor::from_html("<p>a</p>");
    editor.clear_selection();
    let err = editor.run_command("marks.toggle_italic", None).unwrap_err();
    assert_eq!(err.message(), "No selection");
}

#[test]
fn heading_command_validates_its_level() {
    let mut editor = Editor::from_html("<p>Titel</p>");
    select_first(&mut editor, 0, 0);

    let err = editor
        .run_command("block.set_heading", Some(json!({ "level": "h4" })))
        .unwrap_err();
    assert_eq!(err.message(), "Unknown heading level: h4");
    let err = editor.run_command("block.set_heading", None).unwrap_err();
    assert_eq!(err.message(), "Missing args.level");

    editor
        .run_command("block.set_heading", Some(json!({ "level": "h1" })))
        .unwrap();
    assert_eq!(editor.serialize(), "<h1>Titel</h1>");
}

#[test]
fn list_commands_toggle() {
    let mut editor = Editor::from_html("<p>eins</p>");
    select_first(&mut editor, 0, 0);

    editor.run_command("list.toggle_numbered", None).unwrap();
    assert_eq!(editor.serialize(), "<ol><li>eins</li></ol>");
    editor.run_command("list.toggle_bulleted", None).unwrap();
    assert_eq!(editor.serialize(), "<ul><li>eins</li></ul>");
}

#[test]
fn history_commands_undo_and_redo() {
    let mut editor = Editor::from_html("<p>a</p>");
    select_first(&mut editor, 1, 1);
    editor.insert_text("b");

    editor.run_command("history.undo", None).unwrap();
    assert_eq!(editor.serialize(), "<p>a</p>");
    editor.run_command("history.redo", None).unwrap();
    assert_eq!(editor.serialize(), "<p>ab</p>");
}

#[test]
fn remove_selected_media_command() {
    let mut editor = Editor::from_html(
        "<p>a</p><div class=\"video-wrapper\" contenteditable=\"false\"><video src=\"/api/media/v\"></video></div>",
    );
    let err = editor.run_command("media.remove_selected", None).unwrap_err();
    assert_eq!(err.message(), "No media block selected");

    let (video, _) = editor.doc().media_blocks().next().unwrap();
    assert!(editor.select_media(video));
    editor.run_command("media.remove_selected", None).unwrap();
    assert_eq!(editor.doc().media_blocks().count(), 0);
}

#[test]
fn keyboard_shortcuts() {
    let mut editor = Editor::from_html("<p>abc</p>");
    select_first(&mut editor, 0, 3);

    assert!(editor.key_down(Key::Char('b'), Modifiers::command()));
    assert_eq!(editor.serialize(), "<p><b>abc</b></p>");
    assert!(editor.key_down(Key::Char('I'), Modifiers::command()));
    assert_eq!(editor.serialize(), "<p><b><i>abc</i></b></p>");

    // Both toggles fell into one quiet window, so they undo together.
    assert!(editor.key_down(Key::Char('z'), Modifiers::command()));
    assert_eq!(editor.serialize(), "<p>abc</p>");

    let redo = Modifiers {
        shift: true,
        ..Modifiers::command()
    };
    assert!(editor.key_down(Key::Char('z'), redo));
    assert_eq!(editor.serialize(), "<p><b><i>abc</i></b></p>");

    assert!(editor.key_down(Key::Char('z'), Modifiers::command()));
    assert!(editor.key_down(Key::Char('y'), Modifiers::command()));
    assert_eq!(editor.serialize(), "<p><b><i>abc</i></b></p>");

    assert!(!editor.key_down(Key::Char('q'), Modifiers::command()));
}

#[test]
fn select_all_shortcut_spans_every_text_block() {
    let mut editor = Editor::from_html("<p>ab</p><p>cde</p>");
    assert!(editor.key_down(Key::Char('a'), Modifiers::command()));
    let selection = *editor.selection().unwrap();
    let ids: Vec<_> = editor.doc().blocks().iter().map(|b| b.id).collect();
    assert_eq!(selection.anchor, Point::new(ids[0], 0));
    assert_eq!(selection.focus, Point::new(ids[1], 3));
}
