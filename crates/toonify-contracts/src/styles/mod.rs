mod registry;
mod selectors;

pub use registry::{StyleRegistry, StyleSpec};
pub use selectors::{select_prompt, StyleId, DEFAULT_PROMPT};
