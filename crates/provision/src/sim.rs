//! Deterministic simulated provider.
//!
//! Stands in for real cloud APIs in the demo stack and in tests: remote
//! objects live in an in-process map, identifiers and endpoints are
//! synthesized deterministically, and the schema table knows which
//! attributes of the demo resource types force replacement. With a
//! backing file, objects survive across process runs so repeated applies
//! behave like a real remote.

use crate::error::ProviderError;
use crate::provider::{AttrMap, Created, Provider, ResourceSchema, UpdateOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimObject {
    resource_type: String,
    inputs: AttrMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SimState {
    sequence: u64,
    objects: HashMap<String, SimObject>,
}

/// Simulated provider for `aws:*` and `kubernetes:*` demo types.
pub struct SimProvider {
    state: Mutex<SimState>,
    schemas: HashMap<&'static str, ResourceSchema>,
    store: Option<PathBuf>,
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            schemas: schema_table(),
            store: None,
        }
    }

    /// A provider whose objects persist to `path` between runs.
    ///
    /// An unreadable backing file starts the simulation empty; this is a
    /// simulator, not durable state.
    pub fn with_store(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("sim store {} is corrupt, starting empty: {e}", path.display());
                SimState::default()
            }),
            Err(_) => SimState::default(),
        };
        Self {
            state: Mutex::new(state),
            schemas: schema_table(),
            store: Some(path),
        }
    }

    fn persist(&self, state: &SimState) {
        let Some(path) = &self.store else { return };
        let write = serde_json::to_string_pretty(state)
            .map_err(std::io::Error::other)
            .and_then(|content| std::fs::write(path, content));
        if let Err(e) = write {
            log::warn!("cannot persist sim store {}: {e}", path.display());
        }
    }
}

/// Last path segment of a type, e.g. `aws:rds/instance` -> `instance`.
fn short_type(resource_type: &str) -> &str {
    resource_type
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(resource_type)
}

fn schema_table() -> HashMap<&'static str, ResourceSchema> {
    let mut table = HashMap::new();
    let mut add = |t: &'static str, attrs: &[&str]| {
        table.insert(t, ResourceSchema::forcing(attrs));
    };

    add("aws:ec2/vpc", &["cidr_block"]);
    add("aws:ec2/subnet", &["cidr_block", "vpc_id", "availability_zone"]);
    add("aws:ec2/security-group", &["vpc_id"]);
    // Security group rules are immutable wholesale
    add(
        "aws:ec2/security-group-rule",
        &[
            "type",
            "from_port",
            "to_port",
            "protocol",
            "cidr_blocks",
            "security_group_id",
        ],
    );
    add("aws:rds/subnet-group", &["subnet_ids"]);
    add(
        "aws:rds/instance",
        &["identifier", "engine", "db_subnet_group_name"],
    );
    add("aws:elasticache/subnet-group", &["subnet_ids"]);
    add(
        "aws:elasticache/replication-group",
        &["engine", "subnet_group_name", "port"],
    );
    add("aws:s3/bucket", &["bucket"]);
    add("aws:s3/bucket-ownership-controls", &["bucket"]);
    add("aws:ssm/parameter", &["name"]);
    add("aws:cloudwatch/log-group", &["name"]);
    add("aws:iam/role", &["name"]);
    add("aws:iam/policy", &["name"]);
    add("aws:iam/role-policy-attachment", &["role", "policy_arn"]);
    add("aws:eks/cluster", &["name", "role_arn"]);
    add("aws:eks/node-group", &["cluster_name", "node_group_name"]);
    add("aws:eks/addon", &["cluster_name", "addon_name"]);
    add("kubernetes:helm/release", &["name", "namespace"]);
    add("kubernetes:core/service-account", &["name", "namespace"]);
    add("kubernetes:rbac/cluster-role-binding", &["name"]);
    add("kubernetes:batch/job", &["name", "namespace"]);

    table
}

/// Outputs for a simulated object: echoed inputs plus id, arn and
/// type-specific computed attributes.
fn synthesize_outputs(resource_type: &str, id: &str, inputs: &AttrMap) -> AttrMap {
    let mut outputs = inputs.clone();
    outputs.insert("id".to_string(), json!(id));
    outputs.insert("arn".to_string(), json!(format!("arn:aws:sim:::{id}")));

    let port = |default: u64| {
        inputs
            .get("port")
            .and_then(Json::as_u64)
            .unwrap_or(default)
    };

    match resource_type {
        "aws:rds/instance" => {
            let endpoint = format!("{id}.db.sim.internal:{}", port(5432));
            outputs.insert("address".to_string(), json!(format!("{id}.db.sim.internal")));
            outputs.insert("endpoint".to_string(), json!(endpoint));
        }
        "aws:elasticache/replication-group" => {
            outputs.insert(
                "primary_endpoint_address".to_string(),
                json!(format!("master.{id}.cache.sim.internal")),
            );
            outputs.insert(
                "reader_endpoint_address".to_string(),
                json!(format!("replica.{id}.cache.sim.internal")),
            );
        }
        "aws:eks/cluster" => {
            outputs.insert(
                "endpoint".to_string(),
                json!(format!("https://{id}.eks.sim.internal")),
            );
            outputs.insert(
                "oidc_provider_arn".to_string(),
                json!(format!("arn:aws:iam:::oidc-provider/{id}")),
            );
            outputs.insert(
                "oidc_provider_url".to_string(),
                json!(format!("oidc.sim.internal/{id}")),
            );
        }
        "aws:s3/bucket" => {
            let name = inputs
                .get("bucket")
                .and_then(Json::as_str)
                .unwrap_or(id)
                .to_string();
            outputs.insert(
                "bucket_domain_name".to_string(),
                json!(format!("{name}.s3.sim.internal")),
            );
        }
        "aws:iam/role" | "aws:iam/policy" => {
            let name = inputs.get("name").and_then(Json::as_str).unwrap_or(id);
            outputs.insert("arn".to_string(), json!(format!("arn:aws:iam:::{name}")));
        }
        _ => {}
    }

    outputs
}

impl Provider for SimProvider {
    fn schema(&self, resource_type: &str) -> Result<ResourceSchema, ProviderError> {
        Ok(self
            .schemas
            .get(resource_type)
            .cloned()
            .unwrap_or_default())
    }

    fn create(&self, resource_type: &str, inputs: &AttrMap) -> Result<Created, ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.sequence += 1;
        let id = format!("{}-{:04x}", short_type(resource_type), state.sequence);
        state.objects.insert(
            id.clone(),
            SimObject {
                resource_type: resource_type.to_string(),
                inputs: inputs.clone(),
            },
        );
        self.persist(&state);
        let outputs = synthesize_outputs(resource_type, &id, inputs);
        log::debug!("sim: created {resource_type} {id}");
        Ok(Created { id, outputs })
    }

    fn read(&self, resource_type: &str, id: &str) -> Result<Option<AttrMap>, ProviderError> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Ok(state
            .objects
            .get(id)
            .filter(|o| o.resource_type == resource_type)
            .map(|o| synthesize_outputs(resource_type, id, &o.inputs)))
    }

    fn update(
        &self,
        resource_type: &str,
        id: &str,
        inputs: &AttrMap,
    ) -> Result<UpdateOutcome, ProviderError> {
        let schema = self.schema(resource_type)?;
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let Some(object) = state.objects.get_mut(id) else {
            return Err(ProviderError::NotFound { id: id.to_string() });
        };

        // Forcing attributes cannot change in place.
        let forced = inputs
            .iter()
            .any(|(key, value)| schema.forces(key) && object.inputs.get(key) != Some(value));
        if forced {
            return Ok(UpdateOutcome::RequiresReplace);
        }

        object.inputs = inputs.clone();
        self.persist(&state);
        log::debug!("sim: updated {resource_type} {id}");
        Ok(UpdateOutcome::Updated(synthesize_outputs(
            resource_type,
            id,
            inputs,
        )))
    }

    fn delete(&self, resource_type: &str, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.objects.remove(id).is_none() {
            return Err(ProviderError::NotFound { id: id.to_string() });
        }
        self.persist(&state);
        log::debug!("sim: deleted {resource_type} {id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, Json)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn create_synthesizes_computed_outputs() {
        let sim = SimProvider::new();
        let created = sim
            .create("aws:rds/instance", &inputs(&[("port", json!(5432))]))
            .unwrap();

        assert!(created.outputs.contains_key("endpoint"));
        assert_eq!(created.outputs["id"], json!(created.id));
        assert!(created.id.starts_with("instance-"));
    }

    #[test]
    fn read_after_delete_returns_none() {
        let sim = SimProvider::new();
        let created = sim.create("aws:ec2/vpc", &AttrMap::new()).unwrap();

        assert!(sim.read("aws:ec2/vpc", &created.id).unwrap().is_some());
        sim.delete("aws:ec2/vpc", &created.id).unwrap();
        assert!(sim.read("aws:ec2/vpc", &created.id).unwrap().is_none());
        assert!(matches!(
            sim.delete("aws:ec2/vpc", &created.id),
            Err(ProviderError::NotFound { .. })
        ));
    }

    #[test]
    fn update_of_forcing_attribute_requires_replace() {
        let sim = SimProvider::new();
        let created = sim
            .create(
                "aws:ec2/vpc",
                &inputs(&[("cidr_block", json!("10.0.0.0/16"))]),
            )
            .unwrap();

        let outcome = sim
            .update(
                "aws:ec2/vpc",
                &created.id,
                &inputs(&[("cidr_block", json!("10.1.0.0/16"))]),
            )
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::RequiresReplace));

        let outcome = sim
            .update(
                "aws:ec2/vpc",
                &created.id,
                &inputs(&[
                    ("cidr_block", json!("10.0.0.0/16")),
                    ("tags", json!({"Name": "demo"})),
                ]),
            )
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::Updated(_)));
    }

    #[test]
    fn backing_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");

        let sim = SimProvider::with_store(&path);
        let created = sim
            .create("aws:ec2/vpc", &inputs(&[("cidr_block", json!("10.0.0.0/16"))]))
            .unwrap();
        drop(sim);

        let reopened = SimProvider::with_store(&path);
        assert!(reopened.read("aws:ec2/vpc", &created.id).unwrap().is_some());

        // Sequence continues, so identifiers never collide
        let next = reopened.create("aws:ec2/vpc", &AttrMap::new()).unwrap();
        assert_ne!(next.id, created.id);
    }

    #[test]
    fn unknown_type_gets_default_schema() {
        let sim = SimProvider::new();
        let schema = sim.schema("aws:route53/record").unwrap();
        assert!(schema.forces_replacement.is_empty());
    }
}
