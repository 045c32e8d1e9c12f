use std::fmt;

pub const DEFAULT_PROMPT: &str = "Transform this portrait into a stylized artistic version while keeping the person recognizable. Use portrait orientation and high quality.";

const CARTOON1_PROMPT: &str = "Create a character illustration from this image in the style of a modern Pixar or Disney animated film. The character should have soft, rounded features, large, expressive eyes, and a friendly, inviting expression. Use smooth, subtle shading and a warm, vibrant color palette. The lighting should be soft and cinematic, with a gentle glow that gives it a magical, polished look.";

const CARTOON2_PROMPT: &str = "Transform this image into a character design reminiscent of a modern DreamWorks animated film. The character should have slightly exaggerated features and dynamic, spirited facial expressions. Use bold, saturated colors and dramatic, directional lighting to create a strong sense of depth. Incorporate subtle textures to add detail and a sense of realism, while maintaining a playful, stylized aesthetic.";

const CARTOON3_PROMPT: &str = "Convert this image into a character illustration in a modern anime/manga style. Emphasize clean, sharp lines, slightly elongated proportions, and either large, expressive eyes (for a classic look) or more realistic, detailed eyes (for a contemporary feel). Use dynamic shading, a vibrant yet sometimes muted color palette, and subtle lighting effects that enhance the character's mood or action. The overall look should be visually striking, capturing the essence of popular anime or manga aesthetics.";

/// Style tag supplied by the caller for one run.
///
/// Anything outside the three known ids parses to `Unknown`, which keeps the
/// caller's raw text verbatim for logs and records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StyleId {
    Cartoon1,
    Cartoon2,
    Cartoon3,
    Unknown(String),
}

impl StyleId {
    pub const KNOWN: [StyleId; 3] = [StyleId::Cartoon1, StyleId::Cartoon2, StyleId::Cartoon3];

    /// Exact, case-sensitive match on the three ids; anything else,
    /// including `"CARTOON1"` or `" cartoon1"`, is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "cartoon1" => Self::Cartoon1,
            "cartoon2" => Self::Cartoon2,
            "cartoon3" => Self::Cartoon3,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Cartoon1 => "cartoon1",
            Self::Cartoon2 => "cartoon2",
            Self::Cartoon3 => "cartoon3",
            Self::Unknown(raw) if raw.is_empty() => "default",
            Self::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for StyleId {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl fmt::Display for StyleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instruction text sent to the remote service for `style`. Never empty.
pub fn select_prompt(style: &StyleId) -> &'static str {
    match style {
        StyleId::Cartoon1 => CARTOON1_PROMPT,
        StyleId::Cartoon2 => CARTOON2_PROMPT,
        StyleId::Cartoon3 => CARTOON3_PROMPT,
        StyleId::Unknown(_) => DEFAULT_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::{select_prompt, StyleId, DEFAULT_PROMPT};

    #[test]
    fn known_styles_get_distinct_non_empty_prompts() {
        let prompts: Vec<&str> = StyleId::KNOWN.iter().map(select_prompt).collect();
        assert!(prompts.iter().all(|prompt| !prompt.trim().is_empty()));
        assert_ne!(prompts[0], prompts[1]);
        assert_ne!(prompts[1], prompts[2]);
        assert!(prompts.iter().all(|prompt| *prompt != DEFAULT_PROMPT));
    }

    #[test]
    fn unknown_styles_resolve_to_the_same_default() {
        for raw in ["", "   ", "cartoon4", "watercolor", "CARTOON", "🎨"] {
            let style = StyleId::parse(raw);
            assert!(!style.is_known());
            assert_eq!(select_prompt(&style), DEFAULT_PROMPT);
            assert_eq!(select_prompt(&style), select_prompt(&StyleId::parse(raw)));
        }
    }

    #[test]
    fn near_miss_ids_take_the_default_path() {
        for raw in ["CARTOON1", " cartoon2 ", "Cartoon3", "cartoon1\n"] {
            let style = StyleId::parse(raw);
            assert_eq!(style, StyleId::Unknown(raw.to_string()));
            assert_eq!(select_prompt(&style), DEFAULT_PROMPT);
        }
        assert_eq!(StyleId::parse("cartoon2"), StyleId::Cartoon2);
        assert_eq!(StyleId::from("cartoon3"), StyleId::Cartoon3);
        assert_eq!(StyleId::parse("cartoon1").to_string(), "cartoon1");
    }

    #[test]
    fn unknown_style_keeps_raw_text_for_diagnostics() {
        assert_eq!(StyleId::parse(" sketch ").as_str(), " sketch ");
        assert_eq!(StyleId::parse("").as_str(), "default");
    }
}
