//! Configuration module: prompts and UI messages.

mod i18n;
mod prompts;

pub use i18n::{click_instruction, get_messages, type_instruction, Messages};
pub use prompts::{date_header, structural_prompt, vision_prompt, HISTORY_WINDOW};
