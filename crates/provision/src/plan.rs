//! Plan computation: classify declared resources against last-known state.
//!
//! Each resource lands in exactly one of create / update / replace /
//! delete / no-op. Attribute changes flagged by the provider schema as
//! forcing replacement always win over update-in-place, and deletion
//! candidates are ordered after every surviving resource, dependents
//! first, so nothing is torn down while still referenced.
//!
//! Changes cascade: a reference into a resource that is itself being
//! created or replaced earlier in the plan (or whose referenced attribute
//! is being updated) diffs as "(known after apply)", so the dependent is
//! planned as a change too and re-resolves the fresh value at dispatch.

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::provider::ProviderRegistry;
use crate::resource::Stack;
use crate::state::StateFile;
use crate::value::{Reference, Value};
use serde_json::Value as Json;
use std::collections::{BTreeSet, HashMap};

/// Operation classification for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Update,
    Replace,
    Delete,
    NoOp,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(text)
    }
}

/// One changed input attribute.
#[derive(Debug, Clone)]
pub struct AttrChange {
    pub key: String,
    pub old: Option<Json>,
    pub new: Option<Json>,
    pub forces_replacement: bool,
    /// Redact values when displaying
    pub secret: bool,
}

/// A classified operation on one resource.
#[derive(Debug, Clone)]
pub struct PlannedOp {
    pub name: String,
    pub resource_type: String,
    pub kind: OpKind,
    pub changes: Vec<AttrChange>,
}

/// The ordered operation list for a run.
///
/// Surviving resources appear in topological order; deletes follow,
/// dependents first.
#[derive(Debug, Default)]
pub struct Plan {
    pub ops: Vec<PlannedOp>,
}

impl Plan {
    pub fn count(&self, kind: OpKind) -> usize {
        self.ops.iter().filter(|op| op.kind == kind).count()
    }

    pub fn has_changes(&self) -> bool {
        self.ops.iter().any(|op| op.kind != OpKind::NoOp)
    }

    pub fn get(&self, name: &str) -> Option<&PlannedOp> {
        self.ops.iter().find(|op| op.name == name)
    }
}

/// Reference lookup against recorded state.
pub fn state_lookup(state: &StateFile) -> impl Fn(&Reference) -> Option<Json> + '_ {
    |reference: &Reference| {
        state
            .get(&reference.resource)
            .and_then(|record| record.attribute(&reference.attribute).cloned())
    }
}

/// Validate declarations before planning.
///
/// Malformed logical names or attribute keys can neither provision nor be
/// referenced cleanly, so they fail here, before any provider is called.
pub fn validate(stack: &Stack) -> Result<()> {
    let name_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    for decl in &stack.resources {
        let fail = |message: String| Error::Validation {
            resource: decl.name.clone(),
            message,
        };
        if decl.name.is_empty() || !decl.name.chars().all(name_char) {
            return Err(fail(
                "logical names may only contain letters, digits, '_' and '-'".to_string(),
            ));
        }
        if decl.resource_type.is_empty() {
            return Err(fail("missing resource type".to_string()));
        }
        if decl.inputs.keys().any(String::is_empty) {
            return Err(fail("empty input attribute name".to_string()));
        }
        if let Some(reference) = decl.references().iter().find(|r| r.attribute.is_empty()) {
            return Err(fail(format!(
                "reference to {} names no attribute",
                reference.resource
            )));
        }
    }
    Ok(())
}

/// Compute the plan for a declaration set against prior state.
pub fn compute(
    stack: &Stack,
    graph: &DependencyGraph,
    state: &StateFile,
    registry: &ProviderRegistry,
) -> Result<Plan> {
    validate(stack)?;

    let mut ops = Vec::with_capacity(stack.resources.len());
    let base = state_lookup(state);

    // Resources already planned to change earlier in topological order.
    // References into them resolve as unknown, so dependents diff dirty
    // instead of keeping a stale identity from prior state.
    let mut replaced: BTreeSet<&str> = BTreeSet::new();
    let mut updated: HashMap<&str, BTreeSet<String>> = HashMap::new();

    for node in graph.topo_order() {
        let decl = &stack.resources[node];
        let schema = registry.schema(&decl.resource_type)?;

        let lookup = |reference: &Reference| {
            if replaced.contains(reference.resource.as_str()) {
                return None;
            }
            let stale = updated
                .get(reference.resource.as_str())
                .is_some_and(|keys| keys.contains(&reference.attribute));
            if stale { None } else { base(reference) }
        };

        let mut changes = Vec::new();
        let record = state.get(&decl.name);

        // Union of declared keys and previously stored keys.
        let mut keys: BTreeSet<&str> = decl.inputs.keys().map(String::as_str).collect();
        if let Some(record) = record {
            keys.extend(record.inputs.keys().map(String::as_str));
        }

        for key in keys {
            let declared = decl.inputs.get(key);
            let (new, resolved) = match declared {
                Some(value) => {
                    let (json, complete) = value.resolve_lossy(&lookup);
                    (Some(json), complete)
                }
                None => (None, true),
            };
            let old = record.and_then(|r| r.inputs.get(key).cloned());

            if record.is_none() || old != new || !resolved {
                changes.push(AttrChange {
                    key: key.to_string(),
                    old,
                    new,
                    forces_replacement: schema.forces(key),
                    secret: declared.is_some_and(Value::contains_secret),
                });
            }
        }

        let kind = match record {
            None => OpKind::Create,
            Some(_) if changes.is_empty() => OpKind::NoOp,
            // Forces-replacement beats update-safe, regardless of the
            // other changed attributes.
            Some(_) if changes.iter().any(|c| c.forces_replacement) => OpKind::Replace,
            Some(_) => OpKind::Update,
        };

        match kind {
            // Create and replace mint a new identity; every reference into
            // these resources must re-resolve.
            OpKind::Create | OpKind::Replace => {
                replaced.insert(decl.name.as_str());
            }
            OpKind::Update => {
                updated.insert(
                    decl.name.as_str(),
                    changes.iter().map(|c| c.key.clone()).collect(),
                );
            }
            OpKind::Delete | OpKind::NoOp => {}
        }

        ops.push(PlannedOp {
            name: decl.name.clone(),
            resource_type: decl.resource_type.clone(),
            kind,
            changes,
        });
    }

    // Resources in state but no longer declared.
    let removed: BTreeSet<String> = state
        .resources
        .keys()
        .filter(|name| stack.resource(name).is_none())
        .cloned()
        .collect();
    ops.extend(delete_ops(&removed, state)?);

    Ok(Plan { ops })
}

/// Plan the teardown of every recorded resource.
pub fn compute_destroy(state: &StateFile) -> Result<Plan> {
    let all: BTreeSet<String> = state.resources.keys().cloned().collect();
    Ok(Plan {
        ops: delete_ops(&all, state)?,
    })
}

fn delete_ops(names: &BTreeSet<String>, state: &StateFile) -> Result<Vec<PlannedOp>> {
    for name in names {
        if state.get(name).is_some_and(|r| r.protect) {
            return Err(Error::Protected { name: name.clone() });
        }
    }

    Ok(order_deletes(names, state)
        .into_iter()
        .map(|name| {
            let resource_type = state
                .get(&name)
                .map(|r| r.resource_type.clone())
                .unwrap_or_default();
            PlannedOp {
                name,
                resource_type,
                kind: OpKind::Delete,
                changes: Vec::new(),
            }
        })
        .collect())
}

/// Order deletions dependents-first, using dependency edges recorded in
/// state (the declarations no longer mention these resources).
fn order_deletes(names: &BTreeSet<String>, state: &StateFile) -> Vec<String> {
    let mut remaining = names.clone();
    let mut ordered = Vec::with_capacity(names.len());

    while !remaining.is_empty() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|name| {
                state
                    .dependents_of(name)
                    .iter()
                    .all(|dependent| !remaining.contains(dependent))
            })
            .cloned()
            .collect();

        if ready.is_empty() {
            // Recorded edges should never cycle; fall back to a stable order.
            log::warn!("delete ordering found interdependent records: {remaining:?}");
            ordered.extend(remaining.iter().cloned());
            break;
        }
        for name in ready {
            remaining.remove(&name);
            ordered.push(name);
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AttrMap;
    use crate::resource::ResourceDecl;
    use crate::sim::SimProvider;
    use crate::state::{ResourceRecord, input_hash};
    use chrono::Utc;
    use serde_json::json;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register("aws", Box::new(SimProvider::new()));
        registry.register("test", Box::new(SimProvider::new()));
        registry
    }

    fn record(resource_type: &str, id: &str, inputs: AttrMap, deps: &[&str]) -> ResourceRecord {
        let hash = input_hash(&inputs);
        let mut outputs = inputs.clone();
        outputs.insert("id".into(), json!(id));
        ResourceRecord {
            resource_type: resource_type.into(),
            id: id.into(),
            inputs,
            input_hash: hash,
            outputs,
            dependencies: deps.iter().map(ToString::to_string).collect(),
            protect: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn attrs(pairs: &[(&str, Json)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn two_resource_stack() -> Stack {
        let mut stack = Stack::new("demo");
        stack.resources.push(
            ResourceDecl::new("a", "test:thing").with_input("label", Value::string("root")),
        );
        stack.resources.push(
            ResourceDecl::new("b", "test:thing").with_input("upstream", Value::reference("a", "id")),
        );
        stack
    }

    #[test]
    fn empty_state_plans_creates_in_dependency_order() {
        let stack = two_resource_stack();
        let graph = DependencyGraph::build(&stack.resources).unwrap();
        let plan = compute(&stack, &graph, &StateFile::default(), &registry()).unwrap();

        assert_eq!(plan.count(OpKind::Create), 2);
        let a_pos = plan.ops.iter().position(|op| op.name == "a").unwrap();
        let b_pos = plan.ops.iter().position(|op| op.name == "b").unwrap();
        assert!(a_pos < b_pos);

        // b's reference is unknown before a exists
        let b = plan.get("b").unwrap();
        let upstream = b.changes.iter().find(|c| c.key == "upstream").unwrap();
        assert_eq!(upstream.new, Some(json!(crate::value::KNOWN_AFTER_APPLY)));
    }

    #[test]
    fn unchanged_declarations_plan_all_noop() {
        let stack = two_resource_stack();
        let graph = DependencyGraph::build(&stack.resources).unwrap();

        let mut state = StateFile::default();
        state.resources.insert(
            "a".into(),
            record("test:thing", "thing-1", attrs(&[("label", json!("root"))]), &[]),
        );
        state.resources.insert(
            "b".into(),
            record(
                "test:thing",
                "thing-2",
                attrs(&[("upstream", json!("thing-1"))]),
                &["a"],
            ),
        );

        let plan = compute(&stack, &graph, &state, &registry()).unwrap();
        assert!(!plan.has_changes());
        assert_eq!(plan.count(OpKind::NoOp), 2);

        // Planning twice is idempotent
        let again = compute(&stack, &graph, &state, &registry()).unwrap();
        assert!(!again.has_changes());
    }

    #[test]
    fn update_safe_change_never_replaces() {
        let mut stack = Stack::new("demo");
        stack.resources.push(
            ResourceDecl::new("vpc", "aws:ec2/vpc")
                .with_input("cidr_block", Value::string("10.200.0.0/16"))
                .with_input(
                    "tags",
                    Value::Map(
                        [("Name".to_string(), Value::string("renamed"))]
                            .into_iter()
                            .collect(),
                    ),
                ),
        );
        let graph = DependencyGraph::build(&stack.resources).unwrap();

        let mut state = StateFile::default();
        state.resources.insert(
            "vpc".into(),
            record(
                "aws:ec2/vpc",
                "vpc-1",
                attrs(&[
                    ("cidr_block", json!("10.200.0.0/16")),
                    ("tags", json!({"Name": "old"})),
                ]),
                &[],
            ),
        );

        let plan = compute(&stack, &graph, &state, &registry()).unwrap();
        assert_eq!(plan.get("vpc").unwrap().kind, OpKind::Update);
    }

    #[test]
    fn forcing_change_always_replaces_even_with_safe_changes() {
        let mut stack = Stack::new("demo");
        stack.resources.push(
            ResourceDecl::new("vpc", "aws:ec2/vpc")
                .with_input("cidr_block", Value::string("10.201.0.0/16"))
                .with_input(
                    "tags",
                    Value::Map(
                        [("Name".to_string(), Value::string("renamed"))]
                            .into_iter()
                            .collect(),
                    ),
                ),
        );
        let graph = DependencyGraph::build(&stack.resources).unwrap();

        let mut state = StateFile::default();
        state.resources.insert(
            "vpc".into(),
            record(
                "aws:ec2/vpc",
                "vpc-1",
                attrs(&[
                    ("cidr_block", json!("10.200.0.0/16")),
                    ("tags", json!({"Name": "old"})),
                ]),
                &[],
            ),
        );

        let plan = compute(&stack, &graph, &state, &registry()).unwrap();
        let op = plan.get("vpc").unwrap();
        assert_eq!(op.kind, OpKind::Replace);
        assert!(op.changes.iter().any(|c| c.key == "tags"));
    }

    #[test]
    fn removed_resource_deletes_after_surviving_updates() {
        // Previously a <- b <- c; now c references a directly, b removed.
        let mut stack = Stack::new("demo");
        stack
            .resources
            .push(ResourceDecl::new("a", "test:thing").with_input("label", Value::string("root")));
        stack.resources.push(
            ResourceDecl::new("c", "test:thing").with_input("upstream", Value::reference("a", "id")),
        );
        let graph = DependencyGraph::build(&stack.resources).unwrap();

        let mut state = StateFile::default();
        state.resources.insert(
            "a".into(),
            record("test:thing", "thing-1", attrs(&[("label", json!("root"))]), &[]),
        );
        state.resources.insert(
            "b".into(),
            record(
                "test:thing",
                "thing-2",
                attrs(&[("upstream", json!("thing-1"))]),
                &["a"],
            ),
        );
        state.resources.insert(
            "c".into(),
            record(
                "test:thing",
                "thing-3",
                attrs(&[("upstream", json!("thing-2"))]),
                &["b"],
            ),
        );

        let plan = compute(&stack, &graph, &state, &registry()).unwrap();
        assert_eq!(plan.get("a").unwrap().kind, OpKind::NoOp);
        assert_eq!(plan.get("c").unwrap().kind, OpKind::Update);
        assert_eq!(plan.get("b").unwrap().kind, OpKind::Delete);

        let c_pos = plan.ops.iter().position(|op| op.name == "c").unwrap();
        let b_pos = plan.ops.iter().position(|op| op.name == "b").unwrap();
        assert!(c_pos < b_pos, "delete of b must follow update of c");
    }

    #[test]
    fn deletes_are_ordered_dependents_first() {
        let mut state = StateFile::default();
        state
            .resources
            .insert("a".into(), record("test:thing", "t-1", AttrMap::new(), &[]));
        state.resources.insert(
            "b".into(),
            record("test:thing", "t-2", AttrMap::new(), &["a"]),
        );
        state.resources.insert(
            "c".into(),
            record("test:thing", "t-3", AttrMap::new(), &["b"]),
        );

        let plan = compute_destroy(&state).unwrap();
        let order: Vec<&str> = plan.ops.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn protected_resources_refuse_deletion() {
        let mut state = StateFile::default();
        let mut rec = record("test:thing", "t-1", AttrMap::new(), &[]);
        rec.protect = true;
        state.resources.insert("keeper".into(), rec);

        match compute_destroy(&state) {
            Err(Error::Protected { name }) => assert_eq!(name, "keeper"),
            other => panic!("expected protected error, got {other:?}"),
        }
    }

    #[test]
    fn replacing_an_upstream_cascades_to_dependents() {
        let mut stack = Stack::new("demo");
        stack.resources.push(
            ResourceDecl::new("net", "aws:ec2/vpc")
                .with_input("cidr_block", Value::string("10.201.0.0/16")),
        );
        stack.resources.push(
            ResourceDecl::new("sub", "aws:ec2/subnet")
                .with_input("vpc_id", Value::reference("net", "id"))
                .with_input("cidr_block", Value::string("10.201.1.0/24")),
        );
        let graph = DependencyGraph::build(&stack.resources).unwrap();

        let mut state = StateFile::default();
        state.resources.insert(
            "net".into(),
            record(
                "aws:ec2/vpc",
                "vpc-1",
                attrs(&[("cidr_block", json!("10.200.0.0/16"))]),
                &[],
            ),
        );
        state.resources.insert(
            "sub".into(),
            record(
                "aws:ec2/subnet",
                "subnet-1",
                attrs(&[
                    ("vpc_id", json!("vpc-1")),
                    ("cidr_block", json!("10.201.1.0/24")),
                ]),
                &["net"],
            ),
        );

        let plan = compute(&stack, &graph, &state, &registry()).unwrap();
        assert_eq!(plan.get("net").unwrap().kind, OpKind::Replace);

        // The subnet cannot keep pointing at the old vpc identity.
        let sub = plan.get("sub").unwrap();
        assert_eq!(sub.kind, OpKind::Replace);
        let vpc_id = sub.changes.iter().find(|c| c.key == "vpc_id").unwrap();
        assert_eq!(
            vpc_id.new,
            Some(json!(crate::value::KNOWN_AFTER_APPLY))
        );
    }

    #[test]
    fn update_safe_upstream_change_does_not_cascade() {
        let mut stack = Stack::new("demo");
        stack.resources.push(
            ResourceDecl::new("net", "aws:ec2/vpc")
                .with_input("cidr_block", Value::string("10.200.0.0/16"))
                .with_input(
                    "tags",
                    Value::Map(
                        [("Name".to_string(), Value::string("renamed"))]
                            .into_iter()
                            .collect(),
                    ),
                ),
        );
        stack.resources.push(
            ResourceDecl::new("sub", "aws:ec2/subnet")
                .with_input("vpc_id", Value::reference("net", "id"))
                .with_input("cidr_block", Value::string("10.200.1.0/24")),
        );
        let graph = DependencyGraph::build(&stack.resources).unwrap();

        let mut state = StateFile::default();
        state.resources.insert(
            "net".into(),
            record(
                "aws:ec2/vpc",
                "vpc-1",
                attrs(&[
                    ("cidr_block", json!("10.200.0.0/16")),
                    ("tags", json!({"Name": "old"})),
                ]),
                &[],
            ),
        );
        state.resources.insert(
            "sub".into(),
            record(
                "aws:ec2/subnet",
                "subnet-1",
                attrs(&[
                    ("vpc_id", json!("vpc-1")),
                    ("cidr_block", json!("10.200.1.0/24")),
                ]),
                &["net"],
            ),
        );

        let plan = compute(&stack, &graph, &state, &registry()).unwrap();
        // Tags change in place; the vpc id the subnet references is stable.
        assert_eq!(plan.get("net").unwrap().kind, OpKind::Update);
        assert_eq!(plan.get("sub").unwrap().kind, OpKind::NoOp);
    }

    #[test]
    fn malformed_declarations_fail_before_any_provider_call() {
        let mut stack = Stack::new("demo");
        stack
            .resources
            .push(ResourceDecl::new("bad name", "test:thing"));
        let graph = DependencyGraph::build(&stack.resources).unwrap();

        match compute(&stack, &graph, &StateFile::default(), &registry()) {
            Err(Error::Validation { resource, .. }) => assert_eq!(resource, "bad name"),
            other => panic!("expected validation error, got {other:?}"),
        }

        let mut stack = Stack::new("demo");
        let mut decl = ResourceDecl::new("param", "test:thing");
        decl.inputs.insert(String::new(), Value::string("x"));
        stack.resources.push(decl);
        assert!(matches!(
            validate(&stack),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn secret_changes_are_flagged_for_redaction() {
        let mut stack = Stack::new("demo");
        stack.resources.push(
            ResourceDecl::new("param", "aws:ssm/parameter")
                .with_input("value", Value::Secret(Box::new(Value::string("hunter2")))),
        );
        let graph = DependencyGraph::build(&stack.resources).unwrap();
        let plan = compute(&stack, &graph, &StateFile::default(), &registry()).unwrap();

        let change = &plan.get("param").unwrap().changes[0];
        assert!(change.secret);
    }
}
