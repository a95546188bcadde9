//! Markup codec for the stored document representation.
//!
//! The editor stores its content as an HTML string inside the owning record.
//! [`parse_document`] tokenizes that string with a [Logos] lexer, builds a
//! small element tree keeping the byte span of every element, and lowers the
//! tree into a [`Document`]. Markup the editor understands becomes text or
//! media blocks; everything else is carried verbatim (by source span) as
//! opaque content so it survives a load/serialize cycle untouched.
//!
//! [`serialize_document`] is the inverse and emits the same wrapper markup the
//! rendering surface expects, including the caption in the `value` attribute
//! of the caption input.
//!
//! [Logos]: https://docs.rs/logos

use std::ops::Range;
use std::sync::LazyLock;

use logos::{Lexer, Logos};
use regex::Regex;
use thiserror::Error;
use tracing::{trace, warn};

use crate::core::{
    BlockKind, Document, Inline, Marks, MediaBlock, MediaKind, OpaqueBlock, OpaqueInline,
    TextBlock, TextRun, TextStyle,
};

const MAX_DEPTH: usize = 256;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "details",
    "dialog",
    "dd",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "iframe",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "ul",
    "video",
];

pub const IMAGE_ALT: &str = "inserted image";
pub const IMAGE_CAPTION_PLACEHOLDER: &str = "Bildunterschrift hinzufügen (optional)";
pub const VIDEO_CAPTION_PLACEHOLDER: &str = "Videounterschrift hinzufügen (optional)";

static TAG_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^</?([a-zA-Z][a-zA-Z0-9-]*)").expect("valid tag name regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("valid attribute regex")
});

static WIDTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|;)\s*width\s*:\s*(\d+(?:\.\d+)?)px").expect("valid width regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("markup nests deeper than {limit} levels at byte {offset}")]
    TooDeep { offset: usize, limit: usize },
    #[error("unterminated tag at byte {offset}")]
    UnterminatedTag { offset: usize },
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    #[token("<!--", lex_comment)]
    Comment,

    #[regex(r"<![a-zA-Z][^>]*>")]
    Declaration,

    #[regex(r"</[a-zA-Z][a-zA-Z0-9-]*[ \t\r\n]*>")]
    EndTag,

    #[regex(r#"<[a-zA-Z][a-zA-Z0-9-]*([^>"']|"[^"]*"|'[^']*')*>"#)]
    StartTag,

    #[regex(r"[^<]+")]
    Text,

    /// A `<` that does not open a tag.
    #[token("<")]
    Lt,
}

fn lex_comment(lex: &mut Lexer<TokenKind>) -> bool {
    match lex.remainder().find("-->") {
        Some(end) => {
            lex.bump(end + 3);
            true
        }
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HtmlNode {
    Element(HtmlElement),
    Text(String),
    /// Comments and declarations, kept by span.
    Raw(Range<usize>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HtmlElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<HtmlNode>,
    pub span: Range<usize>,
}

impl HtmlElement {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }

    fn descendants(&self) -> Vec<&HtmlElement> {
        let mut out = Vec::new();
        let mut stack: Vec<&HtmlElement> = vec![self];
        while let Some(el) = stack.pop() {
            for child in el.children.iter().rev() {
                if let HtmlNode::Element(child) = child {
                    out.push(child);
                    stack.push(child);
                }
            }
        }
        out
    }

    fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                HtmlNode::Text(text) => out.push_str(text),
                HtmlNode::Element(el) => out.push_str(&el.text_content()),
                HtmlNode::Raw(_) => {}
            }
        }
        out
    }
}

struct StartTag {
    name: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
}

fn parse_start_tag(slice: &str) -> Option<StartTag> {
    let caps = TAG_NAME_RE.captures(slice)?;
    let name_match = caps.get(1)?;
    let name = name_match.as_str().to_ascii_lowercase();
    let inner = slice
        .get(name_match.end()..slice.len().saturating_sub(1))
        .unwrap_or("");
    let self_closing = inner.trim_end().ends_with('/');

    let attrs = ATTR_RE
        .captures_iter(inner)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_ascii_lowercase();
            let raw = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            Some((key, html_escape::decode_html_entities(raw).into_owned()))
        })
        .collect();

    Some(StartTag {
        name,
        attrs,
        self_closing,
    })
}

fn end_tag_name(slice: &str) -> Option<String> {
    TAG_NAME_RE
        .captures(slice)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn is_void(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

fn is_block(tag: &str) -> bool {
    BLOCK_TAGS.contains(&tag)
}

fn children_of<'a>(
    stack: &'a mut [HtmlElement],
    root: &'a mut Vec<HtmlNode>,
) -> &'a mut Vec<HtmlNode> {
    match stack.last_mut() {
        Some(el) => &mut el.children,
        None => root,
    }
}

fn push_text(children: &mut Vec<HtmlNode>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(HtmlNode::Text(prev)) = children.last_mut() {
        prev.push_str(text);
        return;
    }
    children.push(HtmlNode::Text(text.to_string()));
}

fn close_top(stack: &mut Vec<HtmlElement>, root: &mut Vec<HtmlNode>, end: usize) {
    if let Some(mut el) = stack.pop() {
        el.span.end = end;
        children_of(stack, root).push(HtmlNode::Element(el));
    }
}

pub(crate) fn parse_tree(input: &str) -> Result<Vec<HtmlNode>, ParseError> {
    let mut root: Vec<HtmlNode> = Vec::new();
    let mut stack: Vec<HtmlElement> = Vec::new();
    let mut lexer = TokenKind::lexer(input);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let slice = lexer.slice();
        match result {
            Ok(TokenKind::StartTag) => {
                let Some(tag) = parse_start_tag(slice) else {
                    push_text(children_of(&mut stack, &mut root), slice);
                    continue;
                };

                let top = stack.last().map(|el| el.tag.as_str());
                if (top == Some("p") && is_block(&tag.name)) || (top == Some("li") && tag.name == "li")
                {
                    close_top(&mut stack, &mut root, span.start);
                }

                let el = HtmlElement {
                    tag: tag.name,
                    attrs: tag.attrs,
                    children: Vec::new(),
                    span: span.clone(),
                };
                if tag.self_closing || is_void(&el.tag) {
                    children_of(&mut stack, &mut root).push(HtmlNode::Element(el));
                } else {
                    if stack.len() >= MAX_DEPTH {
                        return Err(ParseError::TooDeep {
                            offset: span.start,
                            limit: MAX_DEPTH,
                        });
                    }
                    stack.push(el);
                }
            }
            Ok(TokenKind::EndTag) => {
                let Some(name) = end_tag_name(slice) else {
                    continue;
                };
                let Some(pos) = stack.iter().rposition(|el| el.tag == name) else {
                    trace!(tag = %name, offset = span.start, "dropping stray end tag");
                    continue;
                };
                while stack.len() > pos {
                    let end = if stack.len() == pos + 1 {
                        span.end
                    } else {
                        span.start
                    };
                    close_top(&mut stack, &mut root, end);
                }
            }
            Ok(TokenKind::Text) => {
                let text = html_escape::decode_html_entities(slice);
                push_text(children_of(&mut stack, &mut root), &text);
            }
            Ok(TokenKind::Comment) | Ok(TokenKind::Declaration) => {
                children_of(&mut stack, &mut root).push(HtmlNode::Raw(span));
            }
            Ok(TokenKind::Lt) | Err(()) => {
                if opens_tag(&input[span.start..]) {
                    return Err(ParseError::UnterminatedTag { offset: span.start });
                }
                push_text(children_of(&mut stack, &mut root), slice);
            }
        }
    }

    while !stack.is_empty() {
        close_top(&mut stack, &mut root, input.len());
    }
    Ok(root)
}

/// Whether text starting at a `<` looks like the start of a tag that never closed.
fn opens_tag(rest: &str) -> bool {
    let mut chars = rest.chars().skip(1);
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => true,
        Some('/') => chars.next().is_some_and(|c| c.is_ascii_alphabetic()),
        Some('!') => rest.starts_with("<!--"),
        _ => false,
    }
}

/// Parses stored markup into a document.
pub fn parse_document(input: &str) -> Result<Document, ParseError> {
    let tree = parse_tree(input)?;
    let mut converter = Converter {
        src: input,
        doc: Document::new(),
    };
    converter.flow(&tree);
    Ok(converter.doc)
}

/// Parses stored markup, falling back to an empty document on malformed input.
pub fn load(input: &str) -> Document {
    match parse_document(input) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(%err, "stored markup could not be parsed; starting from an empty document");
            Document::new()
        }
    }
}

enum Segment {
    Inlines(Vec<Inline>),
    Media(MediaBlock),
}

/// A block-level element showed up where only inline content is allowed.
struct NotInline;

struct Converter<'a> {
    src: &'a str,
    doc: Document,
}

impl Converter<'_> {
    fn raw(&self, span: &Range<usize>) -> String {
        self.src.get(span.clone()).unwrap_or_default().to_string()
    }

    fn opaque_block(&mut self, span: &Range<usize>) {
        let html = self.raw(span);
        self.doc.push(BlockKind::Opaque(OpaqueBlock { html }));
    }

    fn flush(&mut self, pending: &mut Vec<Inline>) {
        let inlines = std::mem::take(pending);
        let blank = inlines
            .iter()
            .all(|inline| matches!(inline, Inline::Text(run) if run.text.trim().is_empty()));
        if blank {
            return;
        }
        self.push_text(TextStyle::Paragraph, inlines);
    }

    fn push_text(&mut self, style: TextStyle, inlines: Vec<Inline>) {
        let mut block = TextBlock { style, inlines };
        block.normalize();
        self.doc.push(BlockKind::Text(block));
    }

    fn flow(&mut self, nodes: &[HtmlNode]) {
        let mut pending: Vec<Inline> = Vec::new();
        for node in nodes {
            match node {
                HtmlNode::Text(text) => {
                    if pending.is_empty() && text.trim().is_empty() {
                        continue;
                    }
                    pending.push(Inline::Text(TextRun::plain(text.clone())));
                }
                HtmlNode::Raw(span) => {
                    if pending.is_empty() {
                        self.opaque_block(span);
                    } else {
                        pending.push(Inline::Opaque(OpaqueInline {
                            html: self.raw(span),
                            marks: Marks::default(),
                        }));
                    }
                }
                HtmlNode::Element(el) => {
                    if let Some(media) = media_from(el, true) {
                        self.flush(&mut pending);
                        self.doc.push(BlockKind::Media(media));
                        continue;
                    }
                    let style = match el.tag.as_str() {
                        "p" | "div" => Some(TextStyle::Paragraph),
                        "h1" => Some(TextStyle::Heading1),
                        "h2" => Some(TextStyle::Heading2),
                        _ => None,
                    };
                    if let (Some(style), true) = (style, el.attrs.is_empty()) {
                        self.flush(&mut pending);
                        self.text_element(style, el);
                    } else if matches!(el.tag.as_str(), "ul" | "ol") {
                        self.flush(&mut pending);
                        self.list(el);
                    } else if is_block(&el.tag) {
                        self.flush(&mut pending);
                        self.opaque_block(&el.span);
                    } else {
                        let mut inlines = Vec::new();
                        match self.inline_element(el, &Marks::default(), &mut inlines) {
                            Ok(()) => pending.extend(inlines),
                            Err(NotInline) => {
                                self.flush(&mut pending);
                                self.opaque_block(&el.span);
                            }
                        }
                    }
                }
            }
        }
        self.flush(&mut pending);
    }

    /// A paragraph-like element. Media wrappers inside it split it into several blocks.
    fn text_element(&mut self, style: TextStyle, el: &HtmlElement) {
        let mut segments: Vec<Segment> = Vec::new();
        let mut current: Vec<Inline> = Vec::new();
        for child in &el.children {
            if let HtmlNode::Element(child_el) = child {
                if let Some(media) = media_from(child_el, false) {
                    if !current.is_empty() {
                        segments.push(Segment::Inlines(std::mem::take(&mut current)));
                    }
                    segments.push(Segment::Media(media));
                    continue;
                }
            }
            if self.inline_node(child, &Marks::default(), &mut current).is_err() {
                self.opaque_block(&el.span);
                return;
            }
        }

        let has_media = segments.iter().any(|s| matches!(s, Segment::Media(_)));
        if !current.is_empty() || !has_media {
            segments.push(Segment::Inlines(current));
        }
        for segment in segments {
            match segment {
                Segment::Inlines(inlines) => self.push_text(style, inlines),
                Segment::Media(media) => {
                    self.doc.push(BlockKind::Media(media));
                }
            }
        }
    }

    fn list(&mut self, el: &HtmlElement) {
        let style = if el.tag == "ol" {
            TextStyle::NumberedItem
        } else {
            TextStyle::BulletItem
        };
        let mut items: Vec<Vec<Inline>> = Vec::new();
        let representable = el.attrs.is_empty()
            && el.children.iter().all(|child| match child {
                HtmlNode::Text(text) => text.trim().is_empty(),
                HtmlNode::Element(li) if li.tag == "li" && li.attrs.is_empty() => {
                    let mut inlines = Vec::new();
                    let ok = li
                        .children
                        .iter()
                        .all(|node| self.inline_node(node, &Marks::default(), &mut inlines).is_ok());
                    items.push(inlines);
                    ok
                }
                _ => false,
            });
        if !representable {
            self.opaque_block(&el.span);
            return;
        }
        for inlines in items {
            self.push_text(style, inlines);
        }
    }

    fn inline_node(
        &self,
        node: &HtmlNode,
        marks: &Marks,
        out: &mut Vec<Inline>,
    ) -> Result<(), NotInline> {
        match node {
            HtmlNode::Text(text) => {
                out.push(Inline::Text(TextRun::with_marks(text.clone(), marks.clone())));
                Ok(())
            }
            HtmlNode::Raw(span) => {
                out.push(Inline::Opaque(OpaqueInline {
                    html: self.raw(span),
                    marks: marks.clone(),
                }));
                Ok(())
            }
            HtmlNode::Element(el) => self.inline_element(el, marks, out),
        }
    }

    fn inline_element(
        &self,
        el: &HtmlElement,
        marks: &Marks,
        out: &mut Vec<Inline>,
    ) -> Result<(), NotInline> {
        if is_block(&el.tag) {
            return Err(NotInline);
        }

        let mut next = marks.clone();
        let recognized = match el.tag.as_str() {
            "br" => {
                out.push(Inline::Text(TextRun::with_marks("\n", marks.clone())));
                return Ok(());
            }
            "b" | "strong" if el.attrs.is_empty() => {
                next.bold = true;
                true
            }
            "i" | "em" if el.attrs.is_empty() => {
                next.italic = true;
                true
            }
            "u" if el.attrs.is_empty() => {
                next.underline = true;
                true
            }
            "a" => match el.attr("href") {
                Some(href)
                    if el
                        .attrs
                        .iter()
                        .all(|(key, _)| matches!(key.as_str(), "href" | "target" | "rel")) =>
                {
                    next.link = Some(href.to_string());
                    true
                }
                _ => false,
            },
            _ => false,
        };

        if !recognized {
            out.push(Inline::Opaque(OpaqueInline {
                html: self.raw(&el.span),
                marks: marks.clone(),
            }));
            return Ok(());
        }

        for child in &el.children {
            self.inline_node(child, &next, out)?;
        }
        Ok(())
    }
}

fn parse_width(style: Option<&str>) -> Option<u32> {
    let caps = WIDTH_RE.captures(style?)?;
    let value: f32 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.round() as u32)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Recognizes media markup. Bare `img`/`video` elements count only at the top level.
fn media_from(el: &HtmlElement, top_level: bool) -> Option<MediaBlock> {
    let wrapper_kind = if el.tag != "div" {
        None
    } else if el.has_class("image-wrapper") {
        Some(MediaKind::Image)
    } else if el.has_class("video-wrapper") {
        Some(MediaKind::Video)
    } else {
        None
    };

    if let Some(kind) = wrapper_kind {
        let descendants = el.descendants();
        let source_url = match kind {
            MediaKind::Image => descendants
                .iter()
                .find(|d| d.tag == "img")
                .and_then(|img| non_empty(img.attr("src"))),
            MediaKind::Video => descendants
                .iter()
                .find(|d| d.tag == "video")
                .and_then(|video| {
                    non_empty(video.attr("src")).or_else(|| {
                        video
                            .descendants()
                            .into_iter()
                            .find(|d| d.tag == "source")
                            .and_then(|source| non_empty(source.attr("src")))
                    })
                }),
        }?;
        let caption_class = match kind {
            MediaKind::Image => "image-caption",
            MediaKind::Video => "video-caption",
        };
        let caption = descendants
            .iter()
            .find(|d| d.tag == "input" && d.has_class(caption_class))
            .and_then(|input| input.attr("value").map(str::to_string))
            .or_else(|| {
                descendants
                    .iter()
                    .find(|d| d.tag == "figcaption")
                    .map(|f| f.text_content())
            })
            .unwrap_or_default();
        return Some(MediaBlock {
            kind,
            source_url,
            caption,
            width: parse_width(el.attr("style")),
        });
    }

    let standalone = match el.tag.as_str() {
        "img" if top_level || el.has_class("rte-image") => MediaKind::Image,
        "video" if top_level => MediaKind::Video,
        _ => return None,
    };
    let source_url = non_empty(el.attr("src")).or_else(|| {
        el.descendants()
            .into_iter()
            .find(|d| d.tag == "source")
            .and_then(|source| non_empty(source.attr("src")))
    })?;
    let width = parse_width(el.attr("style")).or_else(|| {
        el.attr("width")
            .and_then(|w| w.trim().trim_end_matches("px").parse::<u32>().ok())
    });
    Some(MediaBlock {
        kind: standalone,
        source_url,
        caption: String::new(),
        width,
    })
}

/// Serializes a document to its stored markup. An empty document yields `""`.
pub fn serialize_document(doc: &Document) -> String {
    let mut out = String::new();
    let mut open_list: Option<TextStyle> = None;

    for block in doc.blocks() {
        let list_style = block
            .as_text()
            .map(|text| text.style)
            .filter(|style| style.is_list_item());
        if open_list != list_style {
            if let Some(style) = open_list {
                out.push_str(list_close_tag(style));
            }
            if let Some(style) = list_style {
                out.push_str(list_open_tag(style));
            }
            open_list = list_style;
        }

        match &block.kind {
            BlockKind::Text(text) => {
                let tag = text.style.tag();
                out.push('<');
                out.push_str(tag);
                out.push('>');
                write_inlines(&mut out, &text.inlines);
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            BlockKind::Media(media) => write_media(&mut out, media),
            BlockKind::Opaque(opaque) => out.push_str(&opaque.html),
        }
    }

    if let Some(style) = open_list {
        out.push_str(list_close_tag(style));
    }
    out
}

fn list_open_tag(style: TextStyle) -> &'static str {
    if style == TextStyle::NumberedItem {
        "<ol>"
    } else {
        "<ul>"
    }
}

fn list_close_tag(style: TextStyle) -> &'static str {
    if style == TextStyle::NumberedItem {
        "</ol>"
    } else {
        "</ul>"
    }
}

pub(crate) fn write_inlines(out: &mut String, inlines: &[Inline]) {
    for inline in inlines {
        let marks = match inline {
            Inline::Text(run) => &run.marks,
            Inline::Opaque(opaque) => &opaque.marks,
        };
        if let Some(link) = &marks.link {
            out.push_str("<a href=\"");
            out.push_str(&html_escape::encode_double_quoted_attribute(link));
            out.push_str("\" target=\"_blank\">");
        }
        if marks.bold {
            out.push_str("<b>");
        }
        if marks.italic {
            out.push_str("<i>");
        }
        if marks.underline {
            out.push_str("<u>");
        }

        match inline {
            Inline::Text(run) => {
                for (ix, line) in run.text.split('\n').enumerate() {
                    if ix > 0 {
                        out.push_str("<br>");
                    }
                    out.push_str(&html_escape::encode_text(line));
                }
            }
            Inline::Opaque(opaque) => out.push_str(&opaque.html),
        }

        if marks.underline {
            out.push_str("</u>");
        }
        if marks.italic {
            out.push_str("</i>");
        }
        if marks.bold {
            out.push_str("</b>");
        }
        if marks.link.is_some() {
            out.push_str("</a>");
        }
    }
}

fn write_media(out: &mut String, media: &MediaBlock) {
    let (wrapper, caption_class, placeholder) = match media.kind {
        MediaKind::Image => ("image-wrapper", "image-caption", IMAGE_CAPTION_PLACEHOLDER),
        MediaKind::Video => ("video-wrapper", "video-caption", VIDEO_CAPTION_PLACEHOLDER),
    };
    let src = html_escape::encode_double_quoted_attribute(&media.source_url);

    out.push_str("<div class=\"");
    out.push_str(wrapper);
    out.push_str("\" contenteditable=\"false\"");
    if let Some(width) = media.width {
        out.push_str(&format!(" style=\"width: {width}px;\""));
    }
    out.push('>');
    match media.kind {
        MediaKind::Image => {
            out.push_str(&format!("<img src=\"{src}\" alt=\"{IMAGE_ALT}\">"));
        }
        MediaKind::Video => {
            out.push_str(&format!(
                "<video src=\"{src}\" controls preload=\"metadata\"></video>"
            ));
        }
    }
    out.push_str(&format!(
        "<input type=\"text\" class=\"{caption_class}\" placeholder=\"{placeholder}\" value=\"{}\">",
        html_escape::encode_double_quoted_attribute(&media.caption)
    ));
    out.push_str("</div>");
}
