//! Quota rule configuration and matching.
//!
//! This module loads hierarchical per-route quota rules from configuration
//! and matches request attributes against them. Two rule trees can be
//! compared for equality so a reload that parsed to an identical tree is
//! treated as a no-op.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, TollgateError};

/// A complete quota configuration containing multiple routes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    /// Map of route name to route configuration
    #[serde(default)]
    pub routes: HashMap<String, RouteRules>,
}

/// Quota rules for a single route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRules {
    /// The route name
    pub route: String,
    /// Top-level rules for this route
    #[serde(default)]
    pub rules: Vec<RuleNode>,
}

/// One node in a route's rule tree.
///
/// Rules form a tree where each node can have:
/// - An attribute key to match against
/// - An optional value to match (if not present, matches any value)
/// - An optional quota to apply at this level
/// - Child rules for more specific matching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleNode {
    /// The attribute key to match
    pub key: String,
    /// Optional value to match (if not set, matches any value for this key)
    #[serde(default)]
    pub value: Option<String>,
    /// Quota to apply at this level
    #[serde(default)]
    pub quota: Option<QuotaRule>,
    /// Child rules for more specific matching
    #[serde(default)]
    pub rules: Vec<RuleNode>,
}

/// A quota specifying admissions per time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRule {
    /// Admissions allowed per window
    pub requests_per_window: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Optional name/description for this quota
    #[serde(default)]
    pub name: Option<String>,
}

/// One step of a deterministic rule tree walk, used for tree comparison.
#[derive(Debug, PartialEq, Eq)]
enum WalkStep<'a> {
    Route(&'a str),
    Node {
        depth: usize,
        key: &'a str,
        value: Option<&'a str>,
        quota: Option<&'a QuotaRule>,
    },
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading quota rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // First, try to parse as a single route document.
        if let Ok(route_rules) = serde_yaml::from_str::<RouteRules>(yaml) {
            let mut rules = RuleSet::new();
            rules.routes.insert(route_rules.route.clone(), route_rules);
            return Ok(rules);
        }

        // Otherwise, try to parse as a full set with multiple routes.
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse quota rules: {}", e)))
    }

    /// Get the rules for a specific route.
    pub fn get_route(&self, route: &str) -> Option<&RouteRules> {
        self.routes.get(route)
    }

    /// Find the matching quota for a set of request attributes on a route.
    ///
    /// Performs hierarchical matching, where more specific matches take
    /// precedence.
    pub fn find_quota(&self, route: &str, attributes: &[(&str, &str)]) -> Option<&QuotaRule> {
        let route_rules = self.get_route(route)?;
        route_rules.find_quota(attributes)
    }

    /// Whether this rule set describes the same rules as `other`.
    ///
    /// Both trees are walked depth-first in a deterministic order and the
    /// walks compared step by step; the sets are equal only when every
    /// step matches and both walks finish together.
    pub fn same_as(&self, other: &RuleSet) -> bool {
        let ours = self.walk();
        let theirs = other.walk();
        ours.len() == theirs.len() && ours.iter().zip(theirs.iter()).all(|(a, b)| a == b)
    }

    /// Flatten the rule trees into one deterministic depth-first sequence.
    fn walk(&self) -> Vec<WalkStep<'_>> {
        let mut steps = Vec::new();

        let mut route_names: Vec<&String> = self.routes.keys().collect();
        route_names.sort();

        for name in route_names {
            steps.push(WalkStep::Route(name));
            let route_rules = &self.routes[name];
            for node in &route_rules.rules {
                Self::walk_node(node, 1, &mut steps);
            }
        }
        steps
    }

    fn walk_node<'a>(node: &'a RuleNode, depth: usize, steps: &mut Vec<WalkStep<'a>>) {
        steps.push(WalkStep::Node {
            depth,
            key: &node.key,
            value: node.value.as_deref(),
            quota: node.quota.as_ref(),
        });
        for child in &node.rules {
            Self::walk_node(child, depth + 1, steps);
        }
    }
}

impl RouteRules {
    /// Find the matching quota for a set of request attributes.
    pub fn find_quota(&self, attributes: &[(&str, &str)]) -> Option<&QuotaRule> {
        Self::find_quota_in_rules(&self.rules, attributes, 0)
    }

    /// Recursively find a matching quota in the rule tree.
    fn find_quota_in_rules<'a>(
        rules: &'a [RuleNode],
        attributes: &[(&str, &str)],
        attribute_index: usize,
    ) -> Option<&'a QuotaRule> {
        if attribute_index >= attributes.len() {
            return None;
        }

        let (attr_key, attr_value) = attributes[attribute_index];
        let mut best_match: Option<&QuotaRule> = None;

        for rule in rules {
            if rule.key != attr_key {
                continue;
            }

            // No value in the rule means match any value for this key.
            let value_matches = match &rule.value {
                Some(v) => v == attr_value,
                None => true,
            };

            if !value_matches {
                continue;
            }

            // This rule matches; check for more specific matches in children.
            if attribute_index + 1 < attributes.len() && !rule.rules.is_empty() {
                if let Some(child_quota) =
                    Self::find_quota_in_rules(&rule.rules, attributes, attribute_index + 1)
                {
                    return Some(child_quota);
                }
            }

            // Use this level's quota if no more specific one was found.
            if let Some(ref quota) = rule.quota {
                best_match = Some(quota);
            }
        }

        best_match
    }
}

/// Shared holder for the active rule set.
///
/// Reloads swap the inner set only when the loaded tree actually differs
/// from the current one, so a swap can be treated as a real change.
#[derive(Debug, Default)]
pub struct SharedRules {
    current: RwLock<Arc<RuleSet>>,
}

impl SharedRules {
    /// Create a holder around an initial rule set.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    /// The currently active rule set.
    pub fn get(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }

    /// Install `rules` if it differs from the active set.
    ///
    /// Returns whether a swap happened.
    pub fn replace_if_changed(&self, rules: RuleSet) -> bool {
        {
            let current = self.current.read();
            if current.same_as(&rules) {
                debug!("Quota rules unchanged, keeping active set");
                return false;
            }
        }

        *self.current.write() = Arc::new(rules);
        info!("Quota rules updated");
        true
    }

    /// Reload rules from a file, swapping only on change.
    ///
    /// Returns whether a swap happened.
    pub fn reload_from_file<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        let rules = RuleSet::from_file(path)?;
        Ok(self.replace_if_changed(rules))
    }
}
