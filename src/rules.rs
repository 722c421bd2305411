// src/rules.rs
use crate::event::{RuleMatch, TrackerEvent};

/// Keyword matcher over event title + summary. Case-insensitive substring
/// tests, OR-combined across keywords; an optional source allowlist is
/// AND-combined on top.
///
/// Fail-closed: with no keywords configured nothing ever matches. "No
/// keywords" means "alert on nothing", not "alert on everything".
#[derive(Debug, Clone, Default)]
pub struct RuleMatcher {
    keywords: Vec<String>,
    source_allowlist: Option<Vec<String>>,
}

impl RuleMatcher {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords,
            source_allowlist: None,
        }
    }

    pub fn with_source_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.source_allowlist = Some(allowlist);
        self
    }

    /// Evaluate one event. Empty vec means "no match". Never errors;
    /// absent/empty text fields simply never match.
    pub fn matches(&self, event: &TrackerEvent) -> Vec<RuleMatch> {
        if let Some(allow) = &self.source_allowlist {
            let allowed = allow.iter().any(|a| {
                a.eq_ignore_ascii_case(&event.source) || a.eq_ignore_ascii_case(&event.resource_id)
            });
            if !allowed {
                return Vec::new();
            }
        }

        let haystack = format!("{}\n{}", event.title, event.summary).to_lowercase();
        let mut out = Vec::new();
        for kw in &self.keywords {
            let k = kw.trim().to_lowercase();
            if k.is_empty() {
                continue;
            }
            if haystack.contains(&k) {
                out.push(RuleMatch {
                    rule_id: format!("keyword:{k}"),
                    reason: format!("matched keyword '{k}'"),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(title: &str, summary: &str) -> TrackerEvent {
        TrackerEvent {
            source: "github".into(),
            resource_type: "repo_pr".into(),
            resource_id: "vllm-project/vllm".into(),
            event_type: "pr_opened".into(),
            event_id: Some("123".into()),
            title: title.into(),
            summary: summary.into(),
            url: String::new(),
            occurred_at: None,
            observed_at: Utc::now(),
            raw: None,
        }
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let m = RuleMatcher::new(vec!["deepseek".into()]);
        let hits = m.matches(&event("Add DeepSeek-V3 support", ""));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, "keyword:deepseek");
    }

    #[test]
    fn keyword_matches_in_summary_too() {
        let m = RuleMatcher::new(vec!["qwen".into()]);
        assert_eq!(m.matches(&event("some title", "bumps Qwen3 weights")).len(), 1);
    }

    #[test]
    fn no_keywords_never_matches() {
        let m = RuleMatcher::new(vec![]);
        assert!(m.matches(&event("anything at all", "really anything")).is_empty());
    }

    #[test]
    fn blank_keywords_are_ignored() {
        let m = RuleMatcher::new(vec!["  ".into(), String::new()]);
        assert!(m.matches(&event("whitespace", "only")).is_empty());
    }

    #[test]
    fn allowlist_excludes_other_sources() {
        let m = RuleMatcher::new(vec!["deepseek".into()])
            .with_source_allowlist(vec!["huggingface".into()]);
        assert!(m.matches(&event("DeepSeek", "")).is_empty());
    }

    #[test]
    fn allowlist_accepts_resource_id() {
        let m = RuleMatcher::new(vec!["deepseek".into()])
            .with_source_allowlist(vec!["vllm-project/vllm".into()]);
        assert_eq!(m.matches(&event("DeepSeek", "")).len(), 1);
    }

    #[test]
    fn multiple_keywords_yield_multiple_reasons() {
        let m = RuleMatcher::new(vec!["deepseek".into(), "v3".into()]);
        let hits = m.matches(&event("Add DeepSeek-V3 support", ""));
        assert_eq!(hits.len(), 2);
    }
}
