use crate::types::Rule;

/// The rules of one rule-language document, in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedRules {
    pub rules: Vec<Rule>,
}

impl ParsedRules {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

impl IntoIterator for ParsedRules {
    type Item = Rule;
    type IntoIter = std::vec::IntoIter<Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.into_iter()
    }
}
