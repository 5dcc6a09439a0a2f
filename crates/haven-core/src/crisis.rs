//! Crisis term detection.
//!
//! A coarse, synchronous trigger that gates routing before any reply is
//! generated. Matching is a case-insensitive substring scan over fixed phrase
//! lists, so it runs in O(terms x text length) and never fails: input it
//! cannot make sense of simply yields "no crisis".

use crate::model::CrisisSeverity;

/// Explicit self-harm language.
const HIGH_SEVERITY_TERMS: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "end my life",
    "want to die",
    "better off dead",
    "end it all",
    "no reason to live",
    "self harm",
    "self-harm",
    "hurt myself",
];

/// Hopelessness language.
const MEDIUM_SEVERITY_TERMS: &[&str] = &["can't go on", "cant go on", "give up"];

/// Crisis-adjacent keywords counted by the engagement watcher's burst detector.
pub const BURST_KEYWORDS: &[&str] = &["help", "overwhelm", "can't do this", "give up"];

/// Result of scanning one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrisisScan {
    pub has_crisis_terms: bool,
    /// Matched phrases, in list order, without duplicates.
    pub terms: Vec<String>,
    /// Highest tier among the matched phrases.
    pub severity: Option<CrisisSeverity>,
}

/// Lowercase and fold typographic apostrophes so "can’t" matches "can't".
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Scan inbound text for crisis phrases.
pub fn detect_crisis(text: &str) -> CrisisScan {
    let normalized = normalize(text);
    if normalized.trim().is_empty() {
        return CrisisScan::default();
    }

    let mut terms = Vec::new();
    let mut severity = None;

    for (list, tier) in [
        (HIGH_SEVERITY_TERMS, CrisisSeverity::High),
        (MEDIUM_SEVERITY_TERMS, CrisisSeverity::Medium),
    ] {
        for term in list {
            if normalized.contains(term) {
                terms.push((*term).to_string());
                severity = Some(severity.map_or(tier, |s: CrisisSeverity| s.max(tier)));
            }
        }
    }

    CrisisScan {
        has_crisis_terms: !terms.is_empty(),
        terms,
        severity,
    }
}

/// Whether a message contains any burst keyword.
pub fn is_burst_message(text: &str) -> bool {
    let normalized = normalize(text);
    BURST_KEYWORDS.iter().any(|kw| normalized.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_has_no_terms() {
        let scan = detect_crisis("Mom had a good day at the clinic.");
        assert!(!scan.has_crisis_terms);
        assert!(scan.terms.is_empty());
        assert_eq!(scan.severity, None);
    }

    #[test]
    fn test_empty_input_is_not_a_crisis() {
        assert_eq!(detect_crisis(""), CrisisScan::default());
        assert_eq!(detect_crisis("   \n"), CrisisScan::default());
    }

    #[test]
    fn test_case_insensitive_match() {
        let scan = detect_crisis("Sometimes I think I WANT TO DIE");
        assert!(scan.has_crisis_terms);
        assert_eq!(scan.terms, vec!["want to die"]);
        assert_eq!(scan.severity, Some(CrisisSeverity::High));
    }

    #[test]
    fn test_medium_tier_phrase() {
        let scan = detect_crisis("I want to give up");
        assert_eq!(scan.terms, vec!["give up"]);
        assert_eq!(scan.severity, Some(CrisisSeverity::Medium));
    }

    #[test]
    fn test_highest_tier_wins() {
        let scan = detect_crisis("I give up, I might hurt myself");
        assert_eq!(scan.terms, vec!["hurt myself", "give up"]);
        assert_eq!(scan.severity, Some(CrisisSeverity::High));
    }

    #[test]
    fn test_typographic_apostrophe() {
        let scan = detect_crisis("I can\u{2019}t go on like this");
        assert_eq!(scan.terms, vec!["can't go on"]);
    }

    #[test]
    fn test_burst_keywords() {
        assert!(is_burst_message("I need HELP"));
        assert!(is_burst_message("so overwhelmed today"));
        assert!(is_burst_message("I can't do this anymore"));
        assert!(!is_burst_message("Dinner went fine"));
    }
}
