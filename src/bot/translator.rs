use std::collections::HashMap;

/// `labels -> language -> localized text` lookup; an unknown label passes
/// through unchanged (§4.5 "Rate-limited message sender").
pub struct Translator {
    labels: HashMap<String, HashMap<String, String>>,
    language: String,
}

impl Translator {
    pub fn new(labels: HashMap<String, HashMap<String, String>>, language: &str) -> Self {
        Translator { labels, language: language.to_string() }
    }

    pub fn translate(&self, label: &str) -> String {
        self.labels
            .get(label)
            .and_then(|by_language| by_language.get(&self.language))
            .cloned()
            .unwrap_or_else(|| label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_label_passes_through() {
        let translator = Translator::new(HashMap::new(), "EN");
        assert_eq!(translator.translate("not a label"), "not a label");
    }

    #[test]
    fn known_label_resolves_for_the_configured_language() {
        let labels = HashMap::from([("greeting".to_string(), HashMap::from([("EN".to_string(), "hi".to_string())]))]);
        let translator = Translator::new(labels, "EN");
        assert_eq!(translator.translate("greeting"), "hi");
    }
}
