mod config;
mod core;
mod edit;
mod format;
mod gesture;
mod history;
pub mod html;
mod keymap;
mod media;
mod ops;
mod plugin;
mod render;
mod serde_value;
mod upload;

pub use crate::config::*;
pub use crate::core::*;
pub use crate::format::*;
pub use crate::gesture::*;
pub use crate::history::*;
pub use crate::keymap::*;
pub use crate::media::*;
pub use crate::ops::*;
pub use crate::plugin::*;
pub use crate::render::*;
pub use crate::serde_value::*;
pub use crate::upload::*;
