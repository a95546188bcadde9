use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::Editor;
use crate::format::FormatCommand;
use crate::gesture::Modifiers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "char", rename_all = "snake_case")]
pub enum Key {
    Char(char),
    Backspace,
    Delete,
    Enter,
    Escape,
    Shift,
    Other,
}

impl Editor {
    /// Handles a key press on the editing surface. Returns whether the key was consumed.
    /// Keys typed into a focused caption belong to the caption input.
    pub fn key_down(&mut self, key: Key, modifiers: Modifiers) -> bool {
        if key == Key::Shift {
            self.set_aspect_lock(true);
            return false;
        }
        if self.interaction.focused_caption.is_some() {
            trace!(?key, "key handled by caption input");
            return false;
        }

        match key {
            Key::Char(c) if modifiers.is_command() => self.shortcut(c.to_ascii_lowercase(), modifiers),
            Key::Char(c) => {
                self.interaction.selected_media = None;
                self.insert_text(c.encode_utf8(&mut [0u8; 4]))
            }
            Key::Backspace | Key::Delete if self.interaction.selected_media.is_some() => {
                self.remove_selected_media()
            }
            Key::Backspace => self.delete_backward(),
            Key::Delete => self.delete_forward(),
            Key::Enter if modifiers.shift => self.insert_line_break(),
            Key::Enter => self.split_block(),
            Key::Escape => {
                if !self.interaction.gesture.is_idle() {
                    self.cancel_gesture();
                    true
                } else {
                    self.interaction.selected_media.take().is_some()
                }
            }
            Key::Shift | Key::Other => false,
        }
    }

    pub fn key_up(&mut self, key: Key) {
        if key == Key::Shift {
            self.set_aspect_lock(false);
        }
    }

    fn shortcut(&mut self, c: char, modifiers: Modifiers) -> bool {
        let format = match c {
            'z' if modifiers.shift => return self.redo(),
            'z' => return self.undo(),
            'y' if modifiers.ctrl => return self.redo(),
            'a' => return self.select_all(),
            'b' => FormatCommand::Bold,
            'i' => FormatCommand::Italic,
            'u' => FormatCommand::Underline,
            _ => return false,
        };
        let Some(selection) = self.selection else {
            return false;
        };
        self.apply_format(format, &selection);
        true
    }
}
