//! Resource declarations: named, typed records with input values and options.

use crate::value::{Reference, Value};
use std::collections::BTreeMap;

/// Behavior when an immutable attribute change requires replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacePolicy {
    /// Provision the replacement before tearing down the old object.
    /// Default, avoids an availability gap.
    #[default]
    CreateBeforeDestroy,
    /// Tear down the old object first. Only for resources whose provider
    /// rejects duplicates (fixed identifiers, globally unique names).
    DestroyBeforeCreate,
}

/// Options bag recognized on every resource declaration.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    /// Explicit predecessors, in addition to implicit input references
    pub depends_on: Vec<String>,
    pub replace_policy: ReplacePolicy,
    /// Refuse deletion of this resource
    pub protect: bool,
}

/// A single declared resource.
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    /// Logical name, unique within the declaration set
    pub name: String,
    /// Provider type, e.g. `aws:ec2/vpc`
    pub resource_type: String,
    pub inputs: BTreeMap<String, Value>,
    pub options: ResourceOptions,
}

impl ResourceDecl {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            inputs: BTreeMap::new(),
            options: ResourceOptions::default(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.options.depends_on.push(name.into());
        self
    }

    pub fn protected(mut self) -> Self {
        self.options.protect = true;
        self
    }

    pub fn replace_policy(mut self, policy: ReplacePolicy) -> Self {
        self.options.replace_policy = policy;
        self
    }

    /// Every reference embedded in this resource's inputs.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for value in self.inputs.values() {
            out.extend(value.references());
        }
        out
    }

    /// Names of all predecessors: referenced resources plus explicit
    /// `depends_on`, deduplicated, in deterministic order.
    pub fn predecessors(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .references()
            .into_iter()
            .map(|r| r.resource.clone())
            .chain(self.options.depends_on.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Provider key: the type segment before `:`, or the whole type.
    pub fn provider_prefix(&self) -> &str {
        provider_prefix(&self.resource_type)
    }
}

/// Provider key for a resource type string.
pub fn provider_prefix(resource_type: &str) -> &str {
    resource_type
        .split_once(':')
        .map_or(resource_type, |(prefix, _)| prefix)
}

/// A full declaration set: resources plus named exports.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    pub name: String,
    pub resources: Vec<ResourceDecl>,
    /// Named values surfaced after apply (endpoints, role ARNs, ...)
    pub exports: BTreeMap<String, Value>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predecessors_merge_refs_and_depends_on() {
        let decl = ResourceDecl::new("rule", "aws:ec2/security-group-rule")
            .with_input("security_group_id", Value::reference("sg", "id"))
            .with_input("description", Value::string("ingress"))
            .depends_on("vpc")
            .depends_on("sg");

        assert_eq!(decl.predecessors(), vec!["sg".to_string(), "vpc".to_string()]);
    }

    #[test]
    fn provider_prefix_splits_on_colon() {
        assert_eq!(provider_prefix("aws:rds/instance"), "aws");
        assert_eq!(provider_prefix("kubernetes:helm/release"), "kubernetes");
        assert_eq!(provider_prefix("bare"), "bare");
    }
}
