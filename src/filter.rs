//! Event filtering: an immutable predicate with a substring fast path.

use crate::config::FilterConfig;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::HashSet;

/// One matched archive event, held in the serialized form the archive
/// published. Lines are passed through to the sink byte-for-byte; the
/// structured fields are only decoded transiently for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    raw: String,
}

impl Record {
    pub fn new(raw: String) -> Self {
        Self { raw }
    }

    /// The original JSON line.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }
}

/// The two fields of an event the filter can address.
#[derive(Debug, Default)]
pub struct EventFields<'a> {
    pub repo_name: Option<Cow<'a, str>>,
    pub event_type: Option<Cow<'a, str>>,
}

#[derive(Deserialize)]
struct RawEvent<'a> {
    #[serde(default, borrow)]
    repo: Option<RawRepo<'a>>,
    #[serde(default, borrow, rename = "type")]
    event_type: Option<Cow<'a, str>>,
}

#[derive(Deserialize)]
struct RawRepo<'a> {
    #[serde(default, borrow)]
    name: Option<Cow<'a, str>>,
}

/// Decode the addressable fields of one serialized event.
///
/// Every line the pipeline parses goes through this one seam, so the
/// decoder behind it can change without touching the stream scan. Borrows
/// from the line where the input allows it.
pub fn decode_line(line: &str) -> Result<EventFields<'_>, serde_json::Error> {
    let event: RawEvent<'_> = serde_json::from_str(line)?;
    Ok(EventFields {
        repo_name: event.repo.and_then(|r| r.name),
        event_type: event.event_type,
    })
}

/// Immutable match predicate over repository names and event types.
///
/// A dimension left unset (or set to an empty list) is unconstrained and
/// passes everything; it never means "match nothing". Built once per run
/// and shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    repos: Option<HashSet<String>>,
    event_types: Option<HashSet<String>>,
    /// Constraint values in input order, used for the substring pre-check.
    tokens: Vec<String>,
}

impl FilterSpec {
    pub fn new(repos: Option<Vec<String>>, event_types: Option<Vec<String>>) -> Self {
        let mut tokens = Vec::new();
        if let Some(repos) = &repos {
            tokens.extend(repos.iter().cloned());
        }
        if let Some(event_types) = &event_types {
            tokens.extend(event_types.iter().cloned());
        }
        Self {
            repos: normalize(repos),
            event_types: normalize(event_types),
            tokens,
        }
    }

    pub fn from_config(filter: Option<&FilterConfig>) -> Self {
        match filter {
            Some(f) => Self::new(f.repos.clone(), f.event_types.clone()),
            None => Self::new(None, None),
        }
    }

    /// True when neither dimension constrains anything.
    pub fn is_unconstrained(&self) -> bool {
        self.repos.is_none() && self.event_types.is_none()
    }

    /// Cheap pre-check: can this raw line possibly match?
    ///
    /// Both addressable fields appear verbatim as JSON string values, so a
    /// line containing none of the constraint values as a substring cannot
    /// pass the structured match and is discarded without parsing. With no
    /// constraints every line survives the pre-check.
    pub fn fast_check(&self, line: &str) -> bool {
        self.tokens.is_empty() || self.tokens.iter().any(|t| line.contains(t.as_str()))
    }

    /// Structured match: each constrained dimension must hold, and within a
    /// dimension any set member satisfies it.
    pub fn passes(&self, repo_name: Option<&str>, event_type: Option<&str>) -> bool {
        if let Some(repos) = &self.repos {
            match repo_name {
                Some(name) if repos.contains(name) => {}
                _ => return false,
            }
        }
        if let Some(types) = &self.event_types {
            match event_type {
                Some(t) if types.contains(t) => {}
                _ => return false,
            }
        }
        true
    }

    /// Structured match over freshly decoded fields.
    pub fn passes_fields(&self, fields: &EventFields<'_>) -> bool {
        self.passes(fields.repo_name.as_deref(), fields.event_type.as_deref())
    }
}

fn normalize(values: Option<Vec<String>>) -> Option<HashSet<String>> {
    match values {
        Some(v) if !v.is_empty() => Some(v.into_iter().collect()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repos(names: &[&str]) -> Option<Vec<String>> {
        Some(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_unconstrained_passes_everything() {
        let spec = FilterSpec::new(None, None);
        assert!(spec.is_unconstrained());
        assert!(spec.passes(Some("apache/spark"), Some("PushEvent")));
        assert!(spec.passes(None, None));
    }

    #[test]
    fn test_empty_lists_normalize_to_unconstrained() {
        let spec = FilterSpec::new(Some(vec![]), Some(vec![]));
        assert!(spec.is_unconstrained());
        assert!(spec.passes(Some("anything/else"), Some("ForkEvent")));
        assert!(spec.fast_check(r#"{"type":"ForkEvent"}"#));
    }

    #[test]
    fn test_repo_dimension_is_set_membership() {
        let spec = FilterSpec::new(repos(&["apache/spark", "rust-lang/rust"]), None);
        assert!(spec.passes(Some("apache/spark"), Some("PushEvent")));
        assert!(spec.passes(Some("rust-lang/rust"), None));
        assert!(!spec.passes(Some("kubernetes/kubernetes"), Some("PushEvent")));
        assert!(!spec.passes(None, Some("PushEvent")));
    }

    #[test]
    fn test_type_dimension_is_set_membership() {
        let spec = FilterSpec::new(None, repos(&["PushEvent", "IssuesEvent"]));
        assert!(spec.passes(None, Some("PushEvent")));
        assert!(spec.passes(Some("any/repo"), Some("IssuesEvent")));
        assert!(!spec.passes(Some("any/repo"), Some("ForkEvent")));
        assert!(!spec.passes(Some("any/repo"), None));
    }

    #[test]
    fn test_dimensions_combine_conjunctively() {
        let spec = FilterSpec::new(repos(&["apache/spark"]), repos(&["PushEvent"]));
        assert!(spec.passes(Some("apache/spark"), Some("PushEvent")));
        // One matching dimension is not enough
        assert!(!spec.passes(Some("apache/spark"), Some("ForkEvent")));
        assert!(!spec.passes(Some("other/repo"), Some("PushEvent")));
        assert!(!spec.passes(Some("other/repo"), Some("ForkEvent")));
    }

    #[test]
    fn test_fast_check_requires_some_token() {
        let spec = FilterSpec::new(repos(&["apache/spark"]), repos(&["PushEvent"]));
        assert!(spec.fast_check(r#"{"repo":{"name":"apache/spark"},"type":"WatchEvent"}"#));
        assert!(spec.fast_check(r#"{"repo":{"name":"x/y"},"type":"PushEvent"}"#));
        assert!(!spec.fast_check(r#"{"repo":{"name":"x/y"},"type":"WatchEvent"}"#));
    }

    #[test]
    fn test_fast_check_empty_tokens_always_true() {
        let spec = FilterSpec::new(None, None);
        assert!(spec.fast_check("not even json"));
        assert!(spec.fast_check(""));
    }

    #[test]
    fn test_fast_check_is_necessary_but_not_sufficient() {
        // The repo name appearing anywhere in the line survives the
        // pre-check even though the structured match will reject it.
        let spec = FilterSpec::new(repos(&["apache/spark"]), None);
        let line = r#"{"repo":{"name":"x/y"},"payload":{"comment":"see apache/spark"}}"#;
        assert!(spec.fast_check(line));
        let fields = decode_line(line).unwrap();
        assert!(!spec.passes_fields(&fields));
    }

    #[test]
    fn test_decode_line_extracts_fields() {
        let fields =
            decode_line(r#"{"repo":{"name":"apache/spark"},"type":"PushEvent","id":"1"}"#).unwrap();
        assert_eq!(fields.repo_name.as_deref(), Some("apache/spark"));
        assert_eq!(fields.event_type.as_deref(), Some("PushEvent"));
    }

    #[test]
    fn test_decode_line_tolerates_missing_fields() {
        let fields = decode_line(r#"{"id":"1","payload":{}}"#).unwrap();
        assert!(fields.repo_name.is_none());
        assert!(fields.event_type.is_none());
    }

    #[test]
    fn test_decode_line_handles_escapes() {
        let fields = decode_line(r#"{"repo":{"name":"a\/b"},"type":"PushEvent"}"#).unwrap();
        assert_eq!(fields.repo_name.as_deref(), Some("a/b"));
    }

    #[test]
    fn test_decode_line_rejects_malformed() {
        assert!(decode_line("{not json").is_err());
        assert!(decode_line("").is_err());
    }

    #[test]
    fn test_from_config() {
        let cfg = FilterConfig {
            repos: Some(vec!["apache/spark".to_string()]),
            event_types: None,
        };
        let spec = FilterSpec::from_config(Some(&cfg));
        assert!(spec.passes(Some("apache/spark"), Some("anything")));
        assert!(!spec.passes(Some("other/repo"), Some("anything")));

        let spec = FilterSpec::from_config(None);
        assert!(spec.is_unconstrained());
    }
}
