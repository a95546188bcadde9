use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{
    Document, Editor, Inline, Marks, NodeId, Point, Selection, TextBlock, TextRun, TextStyle,
};
use crate::ops::{Op, Transaction};

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"(?i)^(?:[a-z][a-z0-9+.-]*://|mailto:|tel:)").expect("valid scheme regex")
    });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingLevel {
    Paragraph,
    H1,
    H2,
}

impl HeadingLevel {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "p" => Some(HeadingLevel::Paragraph),
            "h1" => Some(HeadingLevel::H1),
            "h2" => Some(HeadingLevel::H2),
            _ => None,
        }
    }

    pub fn style(self) -> TextStyle {
        match self {
            HeadingLevel::Paragraph => TextStyle::Paragraph,
            HeadingLevel::H1 => TextStyle::Heading1,
            HeadingLevel::H2 => TextStyle::Heading2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatCommand {
    Bold,
    Italic,
    Underline,
    BulletList,
    NumberedList,
    Heading(HeadingLevel),
}

#[derive(Debug, Clone, Copy)]
enum MarkKind {
    Bold,
    Italic,
    Underline,
}

impl MarkKind {
    fn get(self, marks: &Marks) -> bool {
        match self {
            MarkKind::Bold => marks.bold,
            MarkKind::Italic => marks.italic,
            MarkKind::Underline => marks.underline,
        }
    }

    fn set(self, marks: &mut Marks, value: bool) {
        match self {
            MarkKind::Bold => marks.bold = value,
            MarkKind::Italic => marks.italic = value,
            MarkKind::Underline => marks.underline = value,
        }
    }

    fn source(self) -> &'static str {
        match self {
            MarkKind::Bold => "format:bold",
            MarkKind::Italic => "format:italic",
            MarkKind::Underline => "format:underline",
        }
    }
}

/// What the toolbar highlights for the current selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolbarState {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub link: Option<String>,
    pub style: Option<TextStyle>,
    pub can_undo: bool,
    pub can_redo: bool,
}

/// The part `[start, end)` of one text block covered by a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    block: NodeId,
    start: usize,
    end: usize,
}

fn selected_spans(doc: &Document, selection: &Selection) -> Vec<Span> {
    let Some((start, end)) = selection.ordered(doc) else {
        return Vec::new();
    };
    let (Some(from), Some(to)) = (doc.index_of(start.block), doc.index_of(end.block)) else {
        return Vec::new();
    };
    let mut spans = Vec::new();
    for block in &doc.blocks()[from..=to] {
        let Some(text) = block.as_text() else {
            continue;
        };
        let span_start = if block.id == start.block {
            text.clamp_offset(start.offset)
        } else {
            0
        };
        let span_end = if block.id == end.block {
            text.clamp_offset(end.offset)
        } else {
            text.len()
        };
        spans.push(Span {
            block: block.id,
            start: span_start,
            end: span_end.max(span_start),
        });
    }
    spans
}

/// Marks of every inline the spans cover.
fn covered_marks(doc: &Document, spans: &[Span]) -> Vec<Marks> {
    let mut out = Vec::new();
    for span in spans {
        let Some(text) = doc.text(span.block) else {
            continue;
        };
        for inline in text.slice(span.start, span.end) {
            match inline {
                Inline::Text(run) if !run.text.is_empty() => out.push(run.marks),
                Inline::Opaque(opaque) => out.push(opaque.marks),
                Inline::Text(_) => {}
            }
        }
    }
    out
}

fn inline_marks_mut(inline: &mut Inline) -> &mut Marks {
    match inline {
        Inline::Text(run) => &mut run.marks,
        Inline::Opaque(opaque) => &mut opaque.marks,
    }
}

/// Prefixes `https://` unless the url is `scheme://…`, `mailto:`, `tel:` or site-relative.
/// A `host:port` prefix is not a scheme.
pub fn normalize_link_url(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() || SCHEME_RE.is_match(url) || url.starts_with('/') || url.starts_with('#') {
        return url.to_string();
    }
    format!("https://{url}")
}

impl Editor {
    /// Applies `command` to `selection`. Returns whether the document changed; mark
    /// toggles on a collapsed selection only arm the marks for the next typed text.
    pub fn apply_format(&mut self, command: FormatCommand, selection: &Selection) -> bool {
        match command {
            FormatCommand::Bold => self.toggle_mark(MarkKind::Bold, selection),
            FormatCommand::Italic => self.toggle_mark(MarkKind::Italic, selection),
            FormatCommand::Underline => self.toggle_mark(MarkKind::Underline, selection),
            FormatCommand::BulletList => self.toggle_list(TextStyle::BulletItem, selection),
            FormatCommand::NumberedList => self.toggle_list(TextStyle::NumberedItem, selection),
            FormatCommand::Heading(level) => self.set_style(level.style(), selection, "format:heading"),
        }
    }

    fn toggle_mark(&mut self, mark: MarkKind, selection: &Selection) -> bool {
        if selection.is_collapsed() {
            let caret = selection.focus;
            let Some(text) = self.doc.text(caret.block) else {
                return false;
            };
            let mut marks = match &self.pending_marks {
                Some(marks) => marks.clone(),
                None => text.marks_at(text.clamp_offset(caret.offset)),
            };
            let value = !mark.get(&marks);
            mark.set(&mut marks, value);
            self.selection = Some(*selection);
            self.pending_marks = Some(marks);
            return false;
        }

        let spans = selected_spans(&self.doc, selection);
        let covered = covered_marks(&self.doc, &spans);
        let value = !covered.iter().all(|marks| mark.get(marks));

        let mut ops = Vec::new();
        for span in spans {
            let Some(text) = self.doc.text(span.block) else {
                continue;
            };
            let mut middle = text.slice(span.start, span.end);
            for inline in &mut middle {
                mark.set(inline_marks_mut(inline), value);
            }
            let mut toggled = TextBlock {
                style: text.style,
                inlines: text.slice(0, span.start),
            };
            toggled.inlines.extend(middle);
            toggled.inlines.extend(text.slice(span.end, text.len()));
            toggled.normalize();
            ops.push(Op::SetInlines {
                id: span.block,
                inlines: toggled.inlines,
            });
        }
        let tx = Transaction::new(ops)
            .selection_after(*selection)
            .source(mark.source());
        self.apply(tx)
    }

    fn toggle_list(&mut self, style: TextStyle, selection: &Selection) -> bool {
        let spans = selected_spans(&self.doc, selection);
        let all_in_list = !spans.is_empty()
            && spans
                .iter()
                .all(|span| self.doc.text(span.block).is_some_and(|t| t.style == style));
        let target = if all_in_list {
            TextStyle::Paragraph
        } else {
            style
        };
        self.set_style(target, selection, "format:list")
    }

    fn set_style(&mut self, style: TextStyle, selection: &Selection, source: &'static str) -> bool {
        let ops: Vec<Op> = selected_spans(&self.doc, selection)
            .into_iter()
            .map(|span| Op::SetTextStyle {
                id: span.block,
                style,
            })
            .collect();
        let tx = Transaction::new(ops)
            .selection_after(*selection)
            .source(source);
        self.apply(tx)
    }

    /// Replaces `selection` with a link. An empty `display_text` shows the normalized url.
    pub fn insert_link(&mut self, url: &str, display_text: &str, selection: &Selection) -> bool {
        let href = normalize_link_url(url);
        if href.is_empty() {
            return false;
        }
        let display = match display_text.trim() {
            "" => href.clone(),
            text => text.to_string(),
        };
        let Some((start, _)) = selection.ordered(&self.doc) else {
            return false;
        };
        let mut marks = self
            .doc
            .text(start.block)
            .map(|t| t.marks_at(t.clamp_offset(start.offset)))
            .unwrap_or_default();
        marks.link = Some(href);

        let inline = Inline::Text(TextRun::with_marks(display, marks));
        let Some(replacement) = self.replace_range(selection, vec![inline]) else {
            return false;
        };
        let mut ops = replacement.ops;
        ops.insert(
            0,
            Op::SetInlines {
                id: replacement.block,
                inlines: replacement.text.inlines,
            },
        );
        let caret = Point::new(replacement.block, replacement.caret);
        let tx = Transaction::new(ops)
            .selection_after(Selection::collapsed(caret))
            .source("format:link");
        let changed = self.apply(tx);
        // Text typed right after the link does not extend it.
        if changed {
            let mut after = self
                .doc
                .text(replacement.block)
                .map(|t| t.marks_at(replacement.caret))
                .unwrap_or_default();
            after.link = None;
            self.pending_marks = Some(after);
        }
        changed
    }

    pub fn toolbar_state(&self) -> ToolbarState {
        let mut state = ToolbarState {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            ..ToolbarState::default()
        };
        let Some(selection) = self.selection else {
            return state;
        };

        let marks = if selection.is_collapsed() {
            let caret = selection.focus;
            let Some(text) = self.doc.text(caret.block) else {
                return state;
            };
            vec![match &self.pending_marks {
                Some(marks) => marks.clone(),
                None => text.marks_at(text.clamp_offset(caret.offset)),
            }]
        } else {
            covered_marks(&self.doc, &selected_spans(&self.doc, &selection))
        };

        if !marks.is_empty() {
            state.bold = marks.iter().all(|m| m.bold);
            state.italic = marks.iter().all(|m| m.italic);
            state.underline = marks.iter().all(|m| m.underline);
            let first = marks[0].link.clone();
            if marks.iter().all(|m| m.link == first) {
                state.link = first;
            }
        }
        state.style = self.doc.text(selection.focus.block).map(|t| t.style);
        state
    }
}
