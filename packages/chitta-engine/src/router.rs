//! Query intent routing: a lightweight classifier that short-circuits
//! tag lookups and exact matches before any vector work happens.

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryIntent {
    /// `tag:foo` or a bare known-tag form; answered from the tag index.
    TagFilter(String),
    /// A quoted phrase; answered by exact payload match over the tag
    /// index and lexical index.
    ExactMatch(String),
    /// Natural-language conceptual query; dense retrieval.
    Semantic,
    /// Keyword-ish query that benefits from dense + sparse fusion.
    Hybrid,
}

pub struct QueryRouter {
    tag_pattern: Regex,
    identifier_pattern: Regex,
}

impl QueryRouter {
    pub fn new() -> Self {
        Self {
            // tag:name, #name
            tag_pattern: Regex::new(r"^(?:tag:|#)([\w:/\-\.]+)$").expect("static pattern"),
            identifier_pattern: Regex::new(r"^[A-Za-z_][A-Za-z0-9_:\.\-]*$").expect("static pattern"),
        }
    }

    pub fn classify(&self, query: &str) -> QueryIntent {
        let trimmed = query.trim();

        if let Some(captures) = self.tag_pattern.captures(trimmed) {
            return QueryIntent::TagFilter(captures[1].to_string());
        }

        if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            let inner = trimmed[1..trimmed.len() - 1].trim();
            if !inner.is_empty() {
                return QueryIntent::ExactMatch(inner.to_string());
            }
        }

        let words = trimmed.split_whitespace().count();
        let is_question = trimmed.ends_with('?')
            || ["what ", "how ", "why ", "when ", "where ", "who "]
                .iter()
                .any(|prefix| trimmed.to_lowercase().starts_with(prefix));

        if is_question || words >= 4 {
            return QueryIntent::Semantic;
        }

        // Short identifier-like queries lean on keywords.
        if words <= 2
            && trimmed
                .split_whitespace()
                .all(|w| self.identifier_pattern.is_match(w))
        {
            return QueryIntent::Hybrid;
        }

        QueryIntent::Semantic
    }
}

impl Default for QueryRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_forms() {
        let router = QueryRouter::new();
        assert_eq!(
            router.classify("tag:ledger"),
            QueryIntent::TagFilter("ledger".into())
        );
        assert_eq!(
            router.classify("#session:abc-123"),
            QueryIntent::TagFilter("session:abc-123".into())
        );
    }

    #[test]
    fn test_exact_match() {
        let router = QueryRouter::new();
        assert_eq!(
            router.classify("\"the exact phrase\""),
            QueryIntent::ExactMatch("the exact phrase".into())
        );
    }

    #[test]
    fn test_questions_are_semantic() {
        let router = QueryRouter::new();
        assert_eq!(
            router.classify("how does spreading activation work?"),
            QueryIntent::Semantic
        );
        assert_eq!(router.classify("what is a basin"), QueryIntent::Semantic);
    }

    #[test]
    fn test_identifiers_are_hybrid() {
        let router = QueryRouter::new();
        assert_eq!(router.classify("connection_pool"), QueryIntent::Hybrid);
        assert_eq!(router.classify("wal replay"), QueryIntent::Hybrid);
    }

    #[test]
    fn test_long_prose_is_semantic() {
        let router = QueryRouter::new();
        assert_eq!(
            router.classify("memories about simplicity in design decisions"),
            QueryIntent::Semantic
        );
    }
}
