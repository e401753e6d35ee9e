// Trigger -> invalidation rule catalog and front-door path routes

use crate::cache::invalidation::InvalidationBatch;
use crate::cache::placeholders::substitute_placeholders;
use crate::core::errors::CoordinationError;
use crate::core::models::{InvalidationRule, InvalidationType};
use serde::{Deserialize, Serialize};

/// Front-door paths to purge when a trigger or pattern mentions `keyword`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRoute {
    pub keyword: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Internal path prefix and its externally routed spelling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRewrite {
    pub internal_prefix: String,
    pub external_prefix: String,
}

/// Invalidation configuration built once at startup and passed to the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationCatalog {
    rules: Vec<InvalidationRule>,
    edge_routes: Vec<EdgeRoute>,
    rewrites: Vec<EdgeRewrite>,
}

impl InvalidationCatalog {
    pub fn new(rules: Vec<InvalidationRule>, edge_routes: Vec<EdgeRoute>, rewrites: Vec<EdgeRewrite>) -> Self {
        Self {
            rules,
            edge_routes,
            rewrites,
        }
    }

    pub fn with_rule(mut self, rule: InvalidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_edge_route(mut self, keyword: impl Into<String>, paths: &[&str]) -> Self {
        self.edge_routes.push(EdgeRoute {
            keyword: keyword.into(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    pub fn with_rewrite(mut self, internal_prefix: impl Into<String>, external_prefix: impl Into<String>) -> Self {
        self.rewrites.push(EdgeRewrite {
            internal_prefix: internal_prefix.into(),
            external_prefix: external_prefix.into(),
        });
        self
    }

    pub fn rules(&self) -> &[InvalidationRule] {
        &self.rules
    }

    pub fn edge_routes(&self) -> &[EdgeRoute] {
        &self.edge_routes
    }

    pub fn rewrites(&self) -> &[EdgeRewrite] {
        &self.rewrites
    }

    pub fn validate(&self) -> Result<(), CoordinationError> {
        for rule in &self.rules {
            if rule.trigger.trim().is_empty() {
                return Err(CoordinationError::ConfigurationError(
                    "Invalidation rule has an empty trigger".to_string(),
                ));
            }
            let incomplete = match rule.invalidation_type {
                InvalidationType::Key | InvalidationType::Pattern => rule.key_pattern.trim().is_empty(),
                InvalidationType::Tag => rule.tags.is_empty(),
            };
            if incomplete {
                return Err(CoordinationError::ConfigurationError(format!(
                    "Invalidation rule for '{}' has nothing to invalidate",
                    rule.trigger
                )));
            }
        }
        if let Some(route) = self.edge_routes.iter().find(|r| r.keyword.trim().is_empty()) {
            return Err(CoordinationError::ConfigurationError(format!(
                "Edge route {:?} has an empty keyword",
                route.paths
            )));
        }
        Ok(())
    }

    /// Rules registered for a trigger (case-insensitive)
    pub fn rules_for(&self, trigger: &str) -> Vec<&InvalidationRule> {
        self.rules
            .iter()
            .filter(|rule| rule.trigger.eq_ignore_ascii_case(trigger))
            .collect()
    }

    /// Resolve a trigger's rules into one batch, substituting `{Field}` placeholders
    pub fn batch_for_trigger<F>(&self, trigger: &str, resolve: F) -> InvalidationBatch
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut batch = InvalidationBatch::default();
        for rule in self.rules_for(trigger) {
            let target = substitute_placeholders(&rule.key_pattern, &resolve);
            match rule.invalidation_type {
                InvalidationType::Key => batch.keys.push(target),
                InvalidationType::Pattern => batch.patterns.push(target),
                InvalidationType::Tag => {}
            }
            batch
                .tags
                .extend(rule.tags.iter().map(|tag| substitute_placeholders(tag, &resolve)));
        }
        batch.dedup();
        batch
    }

    /// Front-door paths selected by keywords in the trigger or the patterns,
    /// each in its internal and externally rewritten spelling, deduplicated
    /// in first-seen order.
    pub fn edge_paths(&self, trigger: &str, patterns: &[String]) -> Vec<String> {
        let haystacks: Vec<String> = std::iter::once(trigger)
            .chain(patterns.iter().map(String::as_str))
            .map(str::to_lowercase)
            .collect();

        let mut paths: Vec<String> = Vec::new();
        let mut push = |path: String| {
            if !paths.contains(&path) {
                paths.push(path);
            }
        };

        for route in &self.edge_routes {
            let keyword = route.keyword.to_lowercase();
            if !haystacks.iter().any(|h| h.contains(&keyword)) {
                continue;
            }
            for path in &route.paths {
                push(path.clone());
                for rewrite in &self.rewrites {
                    if let Some(rest) = path.strip_prefix(rewrite.internal_prefix.as_str()) {
                        push(format!("{}{}", rewrite.external_prefix, rest));
                    } else if let Some(rest) = path.strip_prefix(rewrite.external_prefix.as_str()) {
                        push(format!("{}{}", rewrite.internal_prefix, rest));
                    }
                }
            }
        }
        paths
    }
}
