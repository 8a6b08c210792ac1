//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Subprocess execution behind a swappable runner
//! - `shell` - Shell escaping, quoting and word splitting
//! - `template` - `{{ NAME }}` template rendering

pub mod command;
pub mod shell;
pub(crate) mod template;
