//! Model-name routing.
//!
//! Each `RouteEntry` matches a glob pattern against the requested model name
//! and names the provider that should serve it. Entries are sorted by
//! priority (ties keep declaration order); the dispatch loop walks the
//! resulting candidate list in order until one call succeeds.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "passthrough".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Glob pattern matched against the request's `model` field. `*` matches
    /// any substring, including the empty string.
    pub pattern: String,
    pub provider: String,
    /// The model name to send upstream. `"passthrough"` forwards the
    /// client's requested model name unchanged.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RouteEntry {
    fn resolve_model(&self, requested: &str) -> String {
        if self.model == "passthrough" {
            requested.to_string()
        } else {
            self.model.clone()
        }
    }
}

/// A route match resolved against a specific request: which provider to
/// call and which model name to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub provider: String,
    pub upstream_model: String,
}

/// Matches `*` as a wildcard for any substring; no other glob metacharacters
/// are recognized.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star_p: Option<usize> = None;
    let mut star_t = 0usize;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star_p = Some(p);
            star_t = t;
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some(sp) = star_p {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}

pub struct Router {
    routes: Vec<RouteEntry>,
}

impl Router {
    pub fn new(mut routes: Vec<RouteEntry>) -> Self {
        routes.sort_by(|a, b| a.priority.cmp(&b.priority));
        Self { routes }
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Routes whose pattern matches `model`, in priority order, each
    /// resolved to the provider and upstream model name it names.
    pub fn candidates(&self, model: &str) -> Vec<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.enabled && glob_match(&route.pattern, model))
            .map(|route| RouteMatch {
                provider: route.provider.clone(),
                upstream_model: route.resolve_model(model),
            })
            .collect()
    }

    /// Same as [`Router::candidates`], stable-partitioned so every unhealthy
    /// provider sorts after every healthy one. Candidates are reordered,
    /// never dropped, so if *every* candidate is unhealthy at least one is
    /// still returned and gets probed. `sticky` is then promoted to the very
    /// front when present among the matches regardless of its own health, so
    /// a joiner that remembers a prior provider prefers it without losing
    /// the failover order behind it.
    pub fn ordered_candidates(
        &self,
        model: &str,
        sticky: Option<&str>,
        is_healthy: impl Fn(&str) -> bool,
    ) -> Vec<RouteMatch> {
        let mut candidates = self.candidates(model);
        candidates.sort_by_key(|m| !is_healthy(&m.provider));
        if let Some(sticky) = sticky
            && let Some(pos) = candidates.iter().position(|m| m.provider == sticky)
        {
            let matched = candidates.remove(pos);
            candidates.insert(0, matched);
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pattern: &str, provider: &str, priority: i32) -> RouteEntry {
        RouteEntry {
            pattern: pattern.to_string(),
            provider: provider.to_string(),
            model: "passthrough".to_string(),
            priority,
            enabled: true,
        }
    }

    fn providers(matches: &[RouteMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.provider.as_str()).collect()
    }

    #[test]
    fn glob_matches_prefix_suffix_and_middle_star() {
        assert!(glob_match("claude-*", "claude-sonnet"));
        assert!(glob_match("*-haiku", "claude-3-haiku"));
        assert!(glob_match("gpt-*-mini", "gpt-4o-mini"));
        assert!(!glob_match("gpt-*-mini", "gpt-4o"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn candidates_sorted_by_ascending_priority_then_declaration_order() {
        let router = Router::new(vec![
            entry("claude-*", "low-priority", 10),
            entry("claude-*", "high-priority", 0),
            entry("claude-*", "same-priority-second", 5),
            entry("claude-*", "same-priority-first", 5),
        ]);
        assert_eq!(
            providers(&router.candidates("claude-sonnet")),
            vec![
                "high-priority",
                "same-priority-second",
                "same-priority-first",
                "low-priority"
            ]
        );
    }

    #[test]
    fn sticky_provider_is_promoted_but_others_keep_order() {
        let router = Router::new(vec![
            entry("claude-*", "a", 0),
            entry("claude-*", "b", 5),
            entry("claude-*", "c", 10),
        ]);
        assert_eq!(
            providers(&router.ordered_candidates("claude-sonnet", Some("c"), |_| true)),
            vec!["c", "a", "b"]
        );
        assert_eq!(
            providers(&router.ordered_candidates("claude-sonnet", Some("missing"), |_| true)),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn unhealthy_candidates_are_reordered_after_healthy_ones_not_dropped() {
        let router = Router::new(vec![
            entry("claude-*", "a", 0),
            entry("claude-*", "b", 5),
            entry("claude-*", "c", 10),
        ]);
        let healthy = |name: &str| name != "a";
        assert_eq!(
            providers(&router.ordered_candidates("claude-sonnet", None, healthy)),
            vec!["b", "c", "a"]
        );
    }

    #[test]
    fn all_unhealthy_candidates_still_all_returned() {
        let router = Router::new(vec![entry("claude-*", "a", 0), entry("claude-*", "b", 5)]);
        assert_eq!(
            providers(&router.ordered_candidates("claude-sonnet", None, |_| false)),
            vec!["a", "b"]
        );
    }

    #[test]
    fn sticky_promoted_to_front_even_if_unhealthy() {
        let router = Router::new(vec![
            entry("claude-*", "a", 0),
            entry("claude-*", "b", 5),
        ]);
        let healthy = |name: &str| name != "b";
        assert_eq!(
            providers(&router.ordered_candidates("claude-sonnet", Some("b"), healthy)),
            vec!["b", "a"]
        );
    }

    #[test]
    fn disabled_routes_are_excluded() {
        let mut disabled = entry("claude-*", "a", 0);
        disabled.enabled = false;
        let router = Router::new(vec![disabled, entry("claude-*", "b", 10)]);
        assert_eq!(providers(&router.candidates("claude-sonnet")), vec!["b"]);
    }

    #[test]
    fn passthrough_model_keeps_requested_name_but_explicit_model_overrides() {
        let router = Router::new(vec![
            entry("claude-*", "a", 0),
            RouteEntry {
                pattern: "gpt-*".to_string(),
                provider: "b".to_string(),
                model: "gpt-4o-mini".to_string(),
                priority: 0,
                enabled: true,
            },
        ]);
        let claude = router.candidates("claude-sonnet");
        assert_eq!(claude[0].upstream_model, "claude-sonnet");

        let gpt = router.candidates("gpt-4o");
        assert_eq!(gpt[0].upstream_model, "gpt-4o-mini");
    }
}
