use async_trait::async_trait;

use super::{ClassificationError, Flagger, Verdict};

/// A phrase that, when present in a message, flags it under `category`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseRule {
    pub category: String,
    pub phrase: String,
}

impl PhraseRule {
    pub fn new(category: impl Into<String>, phrase: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            phrase: phrase.into().to_lowercase(),
        }
    }
}

/// Rule-matching flagger for informal or off-platform phrasing.
#[derive(Debug, Clone)]
pub struct PhraseRuleFlagger {
    rules: Vec<PhraseRule>,
}

impl PhraseRuleFlagger {
    pub fn new(rules: Vec<PhraseRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PhraseRule] {
        &self.rules
    }

    /// First matching rule wins; matching is case-insensitive and whitespace-normalized.
    pub fn evaluate(&self, text: &str) -> Verdict {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        self.rules
            .iter()
            .find(|rule| normalized.contains(&rule.phrase))
            .map(|rule| Verdict::flagged(format!("{}: \"{}\"", rule.category, rule.phrase)))
            .unwrap_or_else(Verdict::clean)
    }
}

impl Default for PhraseRuleFlagger {
    fn default() -> Self {
        let off_platform = [
            "whatsapp me",
            "text me on",
            "message me on telegram",
            "my personal email",
            "contact me outside",
        ];
        let payment = [
            "send money",
            "pay a fee",
            "registration fee",
            "bank details",
            "gift card",
            "cash in hand",
        ];
        let informal = [
            "off the record",
            "don't tell",
            "between you and me",
            "no need to mention",
        ];

        let rules = off_platform
            .iter()
            .map(|phrase| PhraseRule::new("off-platform contact", *phrase))
            .chain(
                payment
                    .iter()
                    .map(|phrase| PhraseRule::new("payment request", *phrase)),
            )
            .chain(
                informal
                    .iter()
                    .map(|phrase| PhraseRule::new("informal arrangement", *phrase)),
            )
            .collect();

        Self::new(rules)
    }
}

#[async_trait]
impl Flagger for PhraseRuleFlagger {
    async fn classify(&self, text: &str) -> Result<Verdict, ClassificationError> {
        Ok(self.evaluate(text))
    }

    fn backend(&self) -> &'static str {
        "phrase-rules"
    }
}
