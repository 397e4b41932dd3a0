//! Case-insensitive exact-match User-Agent classifier.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UaClass {
    Whitelist,
    Blacklist,
    NotListed,
}

/// One lowercased pattern map. The whitelist is inserted after the
/// blacklist, so a pattern on both lists classifies as whitelisted.
#[derive(Clone, Debug, Default)]
pub struct UserAgentMatcher {
    patterns: HashMap<String, UaClass>,
}

impl UserAgentMatcher {
    pub fn from_lists(whitelist: &[String], blacklist: &[String]) -> Self {
        let mut patterns = HashMap::with_capacity(whitelist.len() + blacklist.len());
        for pattern in blacklist {
            patterns.insert(pattern.to_lowercase(), UaClass::Blacklist);
        }
        for pattern in whitelist {
            patterns.insert(pattern.to_lowercase(), UaClass::Whitelist);
        }
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Lowercase once, O(1) lookup.
    pub fn classify(&self, user_agent: &str) -> UaClass {
        if self.patterns.is_empty() {
            return UaClass::NotListed;
        }
        self.patterns
            .get(&user_agent.to_lowercase())
            .copied()
            .unwrap_or(UaClass::NotListed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classifies_both_lists() {
        let matcher =
            UserAgentMatcher::from_lists(&strings(&["Googlebot"]), &strings(&["BadBot"]));
        assert_eq!(matcher.classify("Googlebot"), UaClass::Whitelist);
        assert_eq!(matcher.classify("BadBot"), UaClass::Blacklist);
        assert_eq!(matcher.classify("Mozilla"), UaClass::NotListed);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let matcher = UserAgentMatcher::from_lists(&strings(&["GoogleBot"]), &[]);
        assert_eq!(matcher.classify("googlebot"), UaClass::Whitelist);
        assert_eq!(matcher.classify("GOOGLEBOT"), UaClass::Whitelist);
    }

    #[test]
    fn whitelist_wins_on_conflict() {
        let matcher =
            UserAgentMatcher::from_lists(&strings(&["SharedBot"]), &strings(&["sharedbot"]));
        assert_eq!(matcher.classify("sharedbot"), UaClass::Whitelist);
    }

    #[test]
    fn empty_matcher_lists_nothing() {
        let matcher = UserAgentMatcher::default();
        assert!(matcher.is_empty());
        assert_eq!(matcher.classify("anything"), UaClass::NotListed);
    }
}
