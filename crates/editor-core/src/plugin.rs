use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::core::Editor;
use crate::format::{FormatCommand, HeadingLevel};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type CommandHandler =
    Arc<dyn Fn(&mut Editor, Option<Value>) -> Result<(), CommandError> + Send + Sync>;

#[derive(Clone)]
pub struct CommandSpec {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub args_example: Option<Value>,
    pub handler: CommandHandler,
}

impl CommandSpec {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        handler: impl Fn(&mut Editor, Option<Value>) -> Result<(), CommandError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            keywords: Vec::new(),
            args_example: None,
            handler: Arc::new(handler),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn args_example(mut self, args_example: Value) -> Self {
        self.args_example = Some(args_example);
        self
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

pub trait EditorPlugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<&'static str>,
    commands: HashMap<String, CommandSpec>,
}

impl PluginRegistry {
    pub fn new(plugins: impl IntoIterator<Item = Box<dyn EditorPlugin>>) -> Result<Self, String> {
        let mut registry = Self::default();
        for plugin in plugins {
            registry.register_plugin(plugin)?;
        }
        Ok(registry)
    }

    /// Marks, block styles, links, history and media commands.
    pub fn richtext() -> Self {
        let plugins: Vec<Box<dyn EditorPlugin>> = vec![
            Box::new(MarksPlugin),
            Box::new(BlockStylePlugin),
            Box::new(LinkPlugin),
            Box::new(HistoryPlugin),
            Box::new(MediaPlugin),
        ];
        let mut registry = Self::default();
        for plugin in plugins {
            let id = plugin.id();
            if let Err(err) = registry.register_plugin(plugin) {
                error!(plugin = id, %err, "skipping plugin");
            }
        }
        registry
    }

    pub fn register_plugin(&mut self, plugin: Box<dyn EditorPlugin>) -> Result<(), String> {
        if self.plugins.contains(&plugin.id()) {
            return Err(format!("Duplicate plugin id: {}", plugin.id()));
        }
        let commands = plugin.commands();
        if let Some(cmd) = commands.iter().find(|cmd| self.commands.contains_key(&cmd.id)) {
            return Err(format!("Duplicate command id: {}", cmd.id));
        }
        for cmd in commands {
            self.commands.insert(cmd.id.clone(), cmd);
        }
        self.plugins.push(plugin.id());
        Ok(())
    }

    pub fn plugins(&self) -> &[&'static str] {
        &self.plugins
    }

    pub fn commands(&self) -> &HashMap<String, CommandSpec> {
        &self.commands
    }

    pub fn command(&self, id: &str) -> Option<CommandSpec> {
        self.commands.get(id).cloned()
    }

    /// Command ids in lexical order.
    pub fn command_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn run_format(editor: &mut Editor, command: FormatCommand) -> Result<(), CommandError> {
    let selection = editor
        .selection()
        .copied()
        .ok_or_else(|| CommandError::new("No selection"))?;
    editor.apply_format(command, &selection);
    Ok(())
}

fn string_arg<'a>(args: &'a Option<Value>, key: &str) -> Option<&'a str> {
    args.as_ref().and_then(|v| v.get(key)).and_then(Value::as_str)
}

struct MarksPlugin;

impl EditorPlugin for MarksPlugin {
    fn id(&self) -> &'static str {
        "marks"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("marks.toggle_bold", "Fett", |editor, _args| {
                run_format(editor, FormatCommand::Bold)
            })
            .description("Toggle bold on the selection or for the next typed text.")
            .keywords(["bold", "fett", "strong"]),
            CommandSpec::new("marks.toggle_italic", "Kursiv", |editor, _args| {
                run_format(editor, FormatCommand::Italic)
            })
            .description("Toggle italic on the selection or for the next typed text.")
            .keywords(["italic", "kursiv", "emphasis"]),
            CommandSpec::new("marks.toggle_underline", "Unterstrichen", |editor, _args| {
                run_format(editor, FormatCommand::Underline)
            })
            .description("Toggle underline on the selection or for the next typed text.")
            .keywords(["underline", "unterstrichen"]),
        ]
    }
}

struct BlockStylePlugin;

impl EditorPlugin for BlockStylePlugin {
    fn id(&self) -> &'static str {
        "block_style"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("block.set_heading", "Überschrift", |editor, args| {
                let tag = string_arg(&args, "level")
                    .ok_or_else(|| CommandError::new("Missing args.level"))?;
                let level = HeadingLevel::from_tag(tag)
                    .ok_or_else(|| CommandError::new(format!("Unknown heading level: {tag}")))?;
                run_format(editor, FormatCommand::Heading(level))
            })
            .description("Set the style of every selected block to paragraph, h1 or h2.")
            .keywords(["heading", "überschrift", "paragraph", "absatz"])
            .args_example(serde_json::json!({ "level": "h1" })),
            CommandSpec::new("list.toggle_bulleted", "Aufzählung", |editor, _args| {
                run_format(editor, FormatCommand::BulletList)
            })
            .description("Turn the selected blocks into a bulleted list, or back into paragraphs.")
            .keywords(["list", "bullet", "ul", "liste"]),
            CommandSpec::new("list.toggle_numbered", "Nummerierung", |editor, _args| {
                run_format(editor, FormatCommand::NumberedList)
            })
            .description("Turn the selected blocks into a numbered list, or back into paragraphs.")
            .keywords(["list", "numbered", "ol", "liste"]),
        ]
    }
}

struct LinkPlugin;

impl EditorPlugin for LinkPlugin {
    fn id(&self) -> &'static str {
        "link"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("link.insert", "Link einfügen", |editor, args| {
                let url = string_arg(&args, "url")
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| CommandError::new("Missing args.url"))?;
                let text = string_arg(&args, "text").unwrap_or_default();
                let selection = editor
                    .selection()
                    .copied()
                    .ok_or_else(|| CommandError::new("No selection"))?;
                editor.insert_link(url, text, &selection);
                Ok(())
            })
            .description("Replace the selection with a link; the url is shown when no text is given.")
            .keywords(["link", "url", "href"])
            .args_example(serde_json::json!({ "url": "https://example.com", "text": "Beispiel" })),
        ]
    }
}

struct HistoryPlugin;

impl EditorPlugin for HistoryPlugin {
    fn id(&self) -> &'static str {
        "history"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("history.undo", "Rückgängig", |editor, _args| {
                editor.undo();
                Ok(())
            })
            .keywords(["undo", "rückgängig"]),
            CommandSpec::new("history.redo", "Wiederholen", |editor, _args| {
                editor.redo();
                Ok(())
            })
            .keywords(["redo", "wiederholen"]),
        ]
    }
}

struct MediaPlugin;

impl EditorPlugin for MediaPlugin {
    fn id(&self) -> &'static str {
        "media"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("media.remove_selected", "Medium entfernen", |editor, _args| {
                if editor.remove_selected_media() {
                    Ok(())
                } else {
                    Err(CommandError::new("No media block selected"))
                }
            })
            .description("Remove the selected image or video block.")
            .keywords(["remove", "delete", "image", "video", "bild"]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dup;

    impl EditorPlugin for Dup {
        fn id(&self) -> &'static str {
            "dup"
        }

        fn commands(&self) -> Vec<CommandSpec> {
            vec![CommandSpec::new("history.undo", "Undo", |_, _| Ok(()))]
        }
    }

    #[test]
    fn richtext_registers_every_command() {
        let registry = PluginRegistry::richtext();
        assert_eq!(
            registry.command_ids(),
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
    fn duplicate_command_ids_are_rejected() {
        let mut registry = PluginRegistry::richtext();
        let err = registry.register_plugin(Box::new(Dup)).unwrap_err();
        assert_eq!(err, "Duplicate command id: history.undo");
        assert!(!registry.plugins().contains(&"dup"));
    }
}
