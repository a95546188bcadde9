use tracing::trace;

use crate::core::{
    Block, BlockKind, Editor, Inline, NodeId, Point, Selection, TextBlock, TextRun, TextStyle,
};
use crate::ops::{Op, Transaction};

/// A selection range collapsed into its first block.
pub(crate) struct Replacement {
    /// Removals of every block after the first one the range touched.
    pub ops: Vec<Op>,
    pub block: NodeId,
    pub text: TextBlock,
    pub caret: usize,
}

impl Editor {
    /// Deletes the selected range and puts `inlines` in its place, without applying anything.
    pub(crate) fn replace_range(&self, selection: &Selection, inlines: Vec<Inline>) -> Option<Replacement> {
        let (start, end) = selection.ordered(&self.doc)?;
        let start_text = self.doc.text(start.block)?;
        let end_text = self.doc.text(end.block)?;
        let start_offset = start_text.clamp_offset(start.offset);
        let end_offset = end_text.clamp_offset(end.offset);
        let inserted: usize = inlines.iter().map(Inline::len).sum();

        let mut text = start_text.clone();
        text.split_off(start_offset);
        text.inlines.extend(inlines);
        let mut end_copy = end_text.clone();
        text.inlines.extend(end_copy.split_off(end_offset));
        text.normalize();

        let mut ops = Vec::new();
        if start.block != end.block {
            let from = self.doc.index_of(start.block)?;
            let to = self.doc.index_of(end.block)?;
            for block in &self.doc.blocks()[from + 1..=to] {
                ops.push(Op::RemoveBlock { id: block.id });
            }
        }
        Some(Replacement {
            ops,
            block: start.block,
            text,
            caret: start_offset + inserted,
        })
    }

    fn commit_replacement(&mut self, replacement: Replacement, source: &'static str) -> bool {
        let Replacement {
            mut ops,
            block,
            text,
            caret,
        } = replacement;
        ops.insert(
            0,
            Op::SetInlines {
                id: block,
                inlines: text.inlines,
            },
        );
        let tx = Transaction::new(ops)
            .selection_after(Selection::collapsed(Point::new(block, caret)))
            .source(source);
        self.apply(tx)
    }

    /// Types `text` at the caret, replacing a non-empty selection. Pending marks apply
    /// to this insertion only.
    pub fn insert_text(&mut self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let Some(selection) = self.selection else {
            return false;
        };
        let Some((start, _)) = selection.ordered(&self.doc) else {
            return false;
        };
        let marks = match self.pending_marks.take() {
            Some(marks) => marks,
            None => self
                .doc
                .text(start.block)
                .map(|t| t.marks_at(t.clamp_offset(start.offset)))
                .unwrap_or_default(),
        };
        let inline = Inline::Text(TextRun::with_marks(text, marks));
        let Some(replacement) = self.replace_range(&selection, vec![inline]) else {
            return false;
        };
        self.commit_replacement(replacement, "edit:insert_text")
    }

    /// Soft line break inside the current block, serialized as `<br>`.
    pub fn insert_line_break(&mut self) -> bool {
        self.insert_text("\n")
    }

    /// Inserts plain text from the clipboard. Line endings are normalized to line breaks.
    pub fn paste_text(&mut self, text: &str) -> bool {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        self.insert_text(&text)
    }

    pub fn delete_selection(&mut self) -> bool {
        let Some(selection) = self.selection else {
            return false;
        };
        if selection.is_collapsed() {
            return false;
        }
        let Some(replacement) = self.replace_range(&selection, Vec::new()) else {
            return false;
        };
        self.commit_replacement(replacement, "edit:delete_selection")
    }

    /// Splits the block at the caret. An empty list item leaves the list instead.
    pub fn split_block(&mut self) -> bool {
        let Some(selection) = self.selection else {
            return false;
        };
        let Some(Replacement {
            mut ops,
            block,
            mut text,
            caret,
        }) = self.replace_range(&selection, Vec::new())
        else {
            return false;
        };
        let Some(index) = self.doc.index_of(block) else {
            return false;
        };

        if text.style.is_list_item() && text.is_empty() {
            ops.insert(
                0,
                Op::SetTextStyle {
                    id: block,
                    style: TextStyle::Paragraph,
                },
            );
            let tx = Transaction::new(ops)
                .selection_after(Selection::collapsed(Point::new(block, 0)))
                .source("edit:split_block");
            return self.apply(tx);
        }

        let tail = text.split_off(caret);
        let next_style = match text.style {
            TextStyle::Heading1 | TextStyle::Heading2 if tail.is_empty() => TextStyle::Paragraph,
            style => style,
        };
        let next_id = self.doc.alloc_id();
        ops.insert(
            0,
            Op::SetInlines {
                id: block,
                inlines: text.inlines,
            },
        );
        ops.push(Op::InsertBlock {
            index: index + 1,
            block: Block {
                id: next_id,
                kind: BlockKind::Text(TextBlock {
                    style: next_style,
                    inlines: tail,
                }),
            },
        });
        let tx = Transaction::new(ops)
            .selection_after(Selection::collapsed(Point::new(next_id, 0)))
            .source("edit:split_block");
        self.apply(tx)
    }

    pub fn delete_backward(&mut self) -> bool {
        let Some(selection) = self.selection else {
            return false;
        };
        if !selection.is_collapsed() {
            return self.delete_selection();
        }
        let caret = selection.focus;
        let Some(text) = self.doc.text(caret.block) else {
            return false;
        };
        let offset = text.clamp_offset(caret.offset);

        if offset > 0 {
            let from = prev_boundary(text, offset);
            let range = Selection::new(Point::new(caret.block, from), Point::new(caret.block, offset));
            let Some(replacement) = self.replace_range(&range, Vec::new()) else {
                return false;
            };
            return self.commit_replacement(replacement, "edit:delete_backward");
        }

        if text.style.is_list_item() {
            return self.set_block_style(caret.block, TextStyle::Paragraph);
        }
        let Some(index) = self.doc.index_of(caret.block) else {
            return false;
        };
        let Some(prev) = index.checked_sub(1).and_then(|ix| self.doc.blocks().get(ix)) else {
            return false;
        };
        match &prev.kind {
            BlockKind::Text(prev_text) => {
                let prev_id = prev.id;
                let joint = prev_text.len();
                let mut inlines = prev_text.inlines.clone();
                inlines.extend(text.inlines.iter().cloned());
                let tx = Transaction::new(vec![
                    Op::SetInlines {
                        id: prev_id,
                        inlines,
                    },
                    Op::RemoveBlock { id: caret.block },
                ])
                .selection_after(Selection::collapsed(Point::new(prev_id, joint)))
                .source("edit:merge_backward");
                self.apply(tx)
            }
            BlockKind::Media(_) => {
                trace!(block = %prev.id, "selecting media before caret");
                let id = prev.id;
                self.select_media(id);
                false
            }
            BlockKind::Opaque(_) => false,
        }
    }

    pub fn delete_forward(&mut self) -> bool {
        let Some(selection) = self.selection else {
            return false;
        };
        if !selection.is_collapsed() {
            return self.delete_selection();
        }
        let caret = selection.focus;
        let Some(text) = self.doc.text(caret.block) else {
            return false;
        };
        let offset = text.clamp_offset(caret.offset);

        if offset < text.len() {
            let to = next_boundary(text, offset);
            let range = Selection::new(Point::new(caret.block, offset), Point::new(caret.block, to));
            let Some(replacement) = self.replace_range(&range, Vec::new()) else {
                return false;
            };
            return self.commit_replacement(replacement, "edit:delete_forward");
        }

        let Some(index) = self.doc.index_of(caret.block) else {
            return false;
        };
        let Some(next) = self.doc.blocks().get(index + 1) else {
            return false;
        };
        match &next.kind {
            BlockKind::Text(next_text) => {
                let mut inlines = text.inlines.clone();
                inlines.extend(next_text.inlines.iter().cloned());
                let tx = Transaction::new(vec![
                    Op::SetInlines {
                        id: caret.block,
                        inlines,
                    },
                    Op::RemoveBlock { id: next.id },
                ])
                .selection_after(Selection::collapsed(Point::new(caret.block, offset)))
                .source("edit:merge_forward");
                self.apply(tx)
            }
            BlockKind::Media(_) => {
                let id = next.id;
                self.select_media(id);
                false
            }
            BlockKind::Opaque(_) => false,
        }
    }

    /// Selects from the start of the first text block to the end of the last one.
    pub fn select_all(&mut self) -> bool {
        let blocks = self.doc.blocks();
        let first = blocks.iter().find(|b| b.as_text().is_some());
        let last = blocks
            .iter()
            .rev()
            .find_map(|b| b.as_text().map(|text| Point::new(b.id, text.len())));
        let (Some(first), Some(last)) = (first, last) else {
            return false;
        };
        let anchor = Point::new(first.id, 0);
        self.set_selection(Selection::new(anchor, last));
        true
    }

    pub(crate) fn set_block_style(&mut self, id: NodeId, style: TextStyle) -> bool {
        let tx = Transaction::new(vec![Op::SetTextStyle { id, style }]).source("edit:set_style");
        self.apply(tx)
    }
}

/// Offset of the character (or atomic inline) ending at `offset`.
fn prev_boundary(text: &TextBlock, offset: usize) -> usize {
    let mut cursor = 0usize;
    for inline in &text.inlines {
        let len = inline.len();
        if offset > cursor && offset <= cursor + len {
            return match inline {
                Inline::Text(run) => run.text[..offset - cursor]
                    .char_indices()
                    .last()
                    .map_or(cursor, |(ix, _)| cursor + ix),
                Inline::Opaque(_) => cursor,
            };
        }
        cursor += len;
    }
    offset
}

/// Offset just past the character (or atomic inline) starting at `offset`.
fn next_boundary(text: &TextBlock, offset: usize) -> usize {
    let mut cursor = 0usize;
    for inline in &text.inlines {
        let len = inline.len();
        if offset >= cursor && offset < cursor + len {
            return match inline {
                Inline::Text(run) => run.text[offset - cursor..]
                    .chars()
                    .next()
                    .map_or(cursor + len, |c| offset + c.len_utf8()),
                Inline::Opaque(_) => cursor + len,
            };
        }
        cursor += len;
    }
    offset
}
