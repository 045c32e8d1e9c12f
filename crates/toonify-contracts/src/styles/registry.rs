use indexmap::IndexMap;

use super::selectors::{select_prompt, StyleId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSpec {
    pub id: StyleId,
    pub label: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct StyleRegistry {
    styles: IndexMap<String, StyleSpec>,
}

impl Default for StyleRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StyleRegistry {
    pub fn new(styles: Option<IndexMap<String, StyleSpec>>) -> Self {
        Self {
            styles: styles.unwrap_or_else(default_styles),
        }
    }

    pub fn get(&self, style: &StyleId) -> Option<&StyleSpec> {
        self.styles.get(style.as_str()).filter(|spec| &spec.id == style)
    }

    pub fn list(&self) -> impl Iterator<Item = &StyleSpec> {
        self.styles.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.styles.keys().cloned().collect()
    }
}

fn default_styles() -> IndexMap<String, StyleSpec> {
    let mut map = IndexMap::new();
    let labels = ["Animated film", "Bold animated", "Anime / manga"];
    for (id, label) in StyleId::KNOWN.into_iter().zip(labels) {
        map.insert(
            id.as_str().to_string(),
            StyleSpec {
                label: label.to_string(),
                prompt: select_prompt(&id).to_string(),
                id,
            },
        );
    }
    map
}

#[cfg(test)]
mod tests {
    use super::{StyleId, StyleRegistry};

    #[test]
    fn default_registry_lists_known_styles_in_order() {
        let registry = StyleRegistry::default();
        assert_eq!(registry.ids(), vec!["cartoon1", "cartoon2", "cartoon3"]);
        assert!(registry.list().all(|spec| spec.id.is_known()));
    }

    #[test]
    fn lookup_is_exact() {
        let registry = StyleRegistry::default();
        let spec = registry.get(&StyleId::parse("cartoon2")).expect("cartoon2 registered");
        assert_eq!(spec.label, "Bold animated");
        assert!(registry.get(&StyleId::parse(" CARTOON2")).is_none());
        assert!(registry.get(&StyleId::parse("sketch")).is_none());
    }

    #[test]
    fn unknown_text_matching_a_key_is_not_a_registered_style() {
        // `Unknown("cartoon1")` cannot come from `parse`, but the lookup must
        // still refuse it rather than trusting the string key.
        let registry = StyleRegistry::default();
        assert!(registry.get(&StyleId::Unknown("cartoon1".to_string())).is_none());
    }
}
