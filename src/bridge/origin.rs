//! Origin trust gate for inbound cross-frame messages.
//!
//! Matching is plain substring containment: configured patterns are
//! often partial hosts (`"stackblitz"`, `".example.com"`, `"localhost"`).

/// Opaque origins reported by sandboxed or `file://` documents.
pub const OPAQUE_ORIGINS: [&str; 2] = ["null", "file://"];

/// Returns true if a message from `candidate` may be acted upon.
pub fn is_trusted(candidate: &str, self_origin: &str, patterns: &[String]) -> bool {
    if candidate == self_origin {
        return false;
    }
    if OPAQUE_ORIGINS.contains(&candidate) {
        return true;
    }
    patterns
        .iter()
        .any(|pattern| candidate.contains(pattern.as_str()))
}

/// The configured allow-set, fixed for the lifetime of the bridge.
#[derive(Debug, Clone)]
pub struct OriginGuard {
    self_origin: String,
    patterns: Vec<String>,
}

impl OriginGuard {
    pub fn new(self_origin: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            self_origin: self_origin.into(),
            patterns,
        }
    }

    pub fn is_trusted(&self, candidate: &str) -> bool {
        is_trusted(candidate, &self.self_origin, &self.patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(patterns: &[&str]) -> OriginGuard {
        OriginGuard::new(
            "https://bridge.example.com",
            patterns.iter().map(|p| p.to_string()).collect(),
        )
    }

    #[test]
    fn test_exact_origin_trusted() {
        let g = guard(&["https://app.example.org"]);
        assert!(g.is_trusted("https://app.example.org"));
    }

    #[test]
    fn test_partial_fragment_trusted() {
        let g = guard(&["stackblitz", ".example.org"]);
        assert!(g.is_trusted("https://abc.stackblitz.io"));
        assert!(g.is_trusted("https://preview.example.org"));
    }

    #[test]
    fn test_containment_is_not_suffix_matching() {
        // "example.org" appears mid-string, which containment accepts
        let g = guard(&["example.org"]);
        assert!(g.is_trusted("https://example.org.attacker.test"));
    }

    #[test]
    fn test_unmatched_origin_rejected() {
        let g = guard(&["example.org", "localhost"]);
        assert!(!g.is_trusted("https://evil.test"));
        assert!(!g.is_trusted(""));
    }

    #[test]
    fn test_self_origin_never_trusted() {
        // The self origin matches a pattern but is still refused
        let g = guard(&["example.com"]);
        assert!(!g.is_trusted("https://bridge.example.com"));
        assert!(g.is_trusted("https://parent.example.com"));
    }

    #[test]
    fn test_opaque_origins_always_trusted() {
        let g = guard(&[]);
        assert!(g.is_trusted("null"));
        assert!(g.is_trusted("file://"));
        assert!(!g.is_trusted("file:///etc/passwd"));
    }

    #[test]
    fn test_self_origin_beats_opaque_sentinel() {
        assert!(!is_trusted("null", "null", &[]));
    }

    #[test]
    fn test_empty_pattern_set_rejects_everything_but_sentinels() {
        let candidates = ["https://a.test", "http://localhost:3000", "https://x.y.z"];
        for candidate in candidates {
            assert!(!is_trusted(candidate, "https://self.test", &[]));
        }
    }

    #[test]
    fn test_any_origin_containing_a_pattern_is_trusted() {
        let patterns = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        let candidates = [
            "http://localhost",
            "http://localhost:5173",
            "https://localhost.internal",
            "http://127.0.0.1:8080",
        ];
        for candidate in candidates {
            assert!(is_trusted(candidate, "https://self.test", &patterns));
        }
    }
}
