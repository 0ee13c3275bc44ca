//! Free-text filter over a resource list.
//!
//! Tokens are OR-ed: a resource is kept when any positive token matches. The name is
//! checked first; auxiliary fields are only built when the name did not decide.

use std::time::Instant;

use pipedash_core::Resource;
use tracing::debug;

use crate::fields::FieldBag;
use crate::tokenize::NameIndex;

/// Prefix marking a token that must not match.
pub const NEGATION_MARKER: char = '-';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

impl TokenSet {
    /// Split the lower-cased, trimmed query on whitespace. A bare `-` is ignored.
    pub fn parse(query: &str) -> Self {
        let mut set = Self::default();
        for tok in query.trim().to_lowercase().split_whitespace() {
            match tok.strip_prefix(NEGATION_MARKER) {
                Some("") => {}
                Some(rest) => set.negative.push(rest.to_string()),
                None => set.positive.push(tok.to_string()),
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    pub fn matches(&self, r: &Resource) -> bool {
        let name = NameIndex::new(r.metadata.name.as_deref());
        if self.negative.iter().any(|t| name.contains(t)) {
            return false;
        }
        if self.positive.is_empty() || self.positive.iter().any(|t| name.contains(t)) {
            return true;
        }
        let bag = FieldBag::build(r);
        if self.negative.iter().any(|t| bag.contains(t)) {
            return false;
        }
        self.positive.iter().any(|t| bag.contains(t))
    }
}

/// Positions of the resources matching `query`, in input order. Blank queries match all.
pub fn matching_indices(items: &[Resource], query: &str) -> Vec<usize> {
    let tokens = TokenSet::parse(query);
    if tokens.is_empty() {
        return (0..items.len()).collect();
    }
    let started = Instant::now();
    let out: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, r)| tokens.matches(r))
        .map(|(i, _)| i)
        .collect();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
    metrics::histogram!("filter_eval_ms", elapsed_ms);
    metrics::gauge!("filter_input", items.len() as f64);
    metrics::gauge!("filter_matched", out.len() as f64);
    debug!(
        total = items.len(),
        matched = out.len(),
        positive = tokens.positive.len(),
        negative = tokens.negative.len(),
        elapsed_ms,
        "text filter"
    );
    out
}

pub fn filter_refs<'a>(items: &'a [Resource], query: &str) -> Vec<&'a Resource> {
    matching_indices(items, query).into_iter().map(|i| &items[i]).collect()
}

/// Order-preserving filtered copy of `items`. A blank query returns the input unchanged.
pub fn filter_resources(items: &[Resource], query: &str) -> Vec<Resource> {
    if query.trim().is_empty() {
        return items.to_vec();
    }
    filter_refs(items, query).into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedash_core::ObjectMeta;
    use std::collections::BTreeMap;

    fn res(name: Option<&str>, labels: &[(&str, &str)]) -> Resource {
        Resource {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                labels: if labels.is_empty() {
                    None
                } else {
                    Some(labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect::<BTreeMap<_, _>>())
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn names(items: &[Resource]) -> Vec<&str> {
        items.iter().map(|r| r.name()).collect()
    }

    fn sample() -> Vec<Resource> {
        vec![res(Some("build-pr-1"), &[]), res(Some("deploy-main"), &[("env", "prod")])]
    }

    #[test]
    fn token_parsing_splits_negations() {
        let t = TokenSet::parse("  Build -PR  -  main ");
        assert_eq!(t.positive, vec!["build", "main"]);
        assert_eq!(t.negative, vec!["pr"]);
        assert!(TokenSet::parse("   ").is_empty());
    }

    #[test]
    fn blank_query_is_identity() {
        let items = sample();
        assert_eq!(filter_resources(&items, ""), items);
        assert_eq!(filter_resources(&items, " \t "), items);
        assert_eq!(matching_indices(&items, ""), vec![0, 1]);
    }

    #[test]
    fn scenarios_from_the_dashboard() {
        let items = sample();
        assert_eq!(names(&filter_resources(&items, "pr")), vec!["build-pr-1"]);
        assert_eq!(names(&filter_resources(&items, "-pr")), vec!["deploy-main"]);
        assert_eq!(names(&filter_resources(&items, "env=prod")), vec!["deploy-main"]);
    }

    #[test]
    fn positive_tokens_are_or_ed() {
        let items = sample();
        assert_eq!(names(&filter_resources(&items, "build main")), vec!["build-pr-1", "deploy-main"]);
        assert_eq!(names(&filter_resources(&items, "BUILD")), vec!["build-pr-1"]);
        assert!(filter_resources(&items, "zzz").is_empty());
    }

    #[test]
    fn name_negation_beats_auxiliary_match() {
        let items = vec![res(Some("deploy-main"), &[("env", "prod")]), res(Some("other"), &[("env", "prod")])];
        assert_eq!(names(&filter_resources(&items, "env=prod -main")), vec!["other"]);
    }

    #[test]
    fn auxiliary_negation_applies_after_name_miss() {
        let items = vec![res(Some("a"), &[("env", "prod"), ("team", "x")]), res(Some("b"), &[("env", "prod")])];
        assert_eq!(names(&filter_resources(&items, "env=prod -x")), vec!["b"]);
    }

    #[test]
    fn label_pair_forms_all_match() {
        let items = vec![res(Some("deploy"), &[("env", "prod")])];
        for q in ["env", "prod", "env=prod", "env:prod"] {
            assert_eq!(filter_resources(&items, q).len(), 1, "query {q}");
        }
    }

    #[test]
    fn nameless_resource_falls_through_to_fields() {
        let items = vec![res(None, &[("env", "prod")]), res(None, &[])];
        assert_eq!(filter_resources(&items, "prod").len(), 1);
        assert_eq!(filter_resources(&items, "-x").len(), 2);
    }

    #[test]
    fn joined_form_matches_across_delimiters() {
        let items = vec![res(Some("sample-dev.deploy/pr"), &[]), res(Some("dev"), &[])];
        assert_eq!(names(&filter_resources(&items, "devdeploy")), vec!["sample-dev.deploy/pr"]);
    }

    #[test]
    fn filtering_is_idempotent() {
        let items = sample();
        for q in ["pr", "-pr", "env=prod", "main -x", "deploy build"] {
            let once = filter_resources(&items, q);
            assert_eq!(filter_resources(&once, q), once, "query {q}");
        }
    }
}
