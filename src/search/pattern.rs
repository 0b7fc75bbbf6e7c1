use serde::{Deserialize, Serialize};

use crate::error::{Result, VanityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    #[default]
    Suffix,
    Prefix,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Suffix => write!(f, "suffix"),
            PatternKind::Prefix => write!(f, "prefix"),
        }
    }
}

/// A case-insensitive target for rendered addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    kind: PatternKind,
    lowered: Vec<u8>,
}

impl Pattern {
    /// Validate and normalise a pattern.
    ///
    /// Every ASCII letter has at least one case in the base-58 alphabet, so
    /// only `0` and non-alphanumerics can never appear in a rendering.
    pub fn new(text: &str, kind: PatternKind) -> Result<Self> {
        if text.is_empty() {
            return Err(VanityError::InvalidPattern("pattern is empty".to_string()));
        }
        if let Some(bad) = text
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() || *c == '0')
        {
            return Err(VanityError::InvalidPattern(format!(
                "{:?} can never appear in a base-58 address",
                bad
            )));
        }
        Ok(Self {
            kind,
            lowered: text.to_ascii_lowercase().into_bytes(),
        })
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.lowered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lowered.is_empty()
    }

    /// Match against a rendering that is already lowercased.
    #[inline]
    pub fn matches_lowered(&self, rendered: &[u8]) -> bool {
        match self.kind {
            PatternKind::Suffix => rendered.ends_with(&self.lowered),
            PatternKind::Prefix => rendered.starts_with(&self.lowered),
        }
    }

    pub fn matches(&self, rendered: &str) -> bool {
        self.matches_lowered(rendered.to_ascii_lowercase().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn suffix_match_ignores_case() {
        let pattern = Pattern::new("AB", PatternKind::Suffix).unwrap();
        assert!(pattern.matches("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAb"));
        assert!(!pattern.matches("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsab1"));
        assert!(pattern.matches("zzzaB"));
        assert!(pattern.matches("zzzAb"));
    }

    #[test]
    fn prefix_match_ignores_case() {
        let pattern = Pattern::new("rIfT", PatternKind::Prefix).unwrap();
        assert!(pattern.matches("RiFt9xyz"));
        assert!(!pattern.matches("xRift"));
    }

    #[test]
    fn rejects_unrenderable_patterns() {
        assert!(Pattern::new("", PatternKind::Suffix).is_err());
        assert!(Pattern::new("a0", PatternKind::Suffix).is_err());
        assert!(Pattern::new("ab-", PatternKind::Suffix).is_err());
        assert!(Pattern::new("ab c", PatternKind::Suffix).is_err());
    }

    #[test]
    fn letters_excluded_from_alphabet_still_match_other_case() {
        // 'l', 'I' and 'O' are not in the alphabet but 'L', 'i' and 'o' are.
        let pattern = Pattern::new("lIO", PatternKind::Suffix).unwrap();
        assert!(pattern.matches("xxLio"));
    }

    proptest! {
        #[test]
        fn any_suffix_of_a_rendering_matches(s in "[1-9A-HJ-NP-Za-km-z]{1,44}", cut in 0usize..44) {
            let start = cut.min(s.len() - 1);
            let pattern = Pattern::new(&s[start..], PatternKind::Suffix).unwrap();
            prop_assert!(pattern.matches(&s));
        }
    }
}
