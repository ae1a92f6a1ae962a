//! Provider adapter interface.
//!
//! Providers translate generic create/read/update/delete operations into
//! concrete API calls. The engine never knows what a resource type means;
//! it only routes by type prefix and consults the provider's schema for
//! which attributes force replacement.

use crate::error::ProviderError;
use crate::resource::provider_prefix;
use serde_json::Value as Json;
use std::collections::HashMap;

/// Resolved input/output attribute maps exchanged with providers.
pub type AttrMap = serde_json::Map<String, Json>;

/// Per-type schema information the plan engine needs.
#[derive(Debug, Clone, Default)]
pub struct ResourceSchema {
    /// Input attributes whose change cannot be applied in place
    pub forces_replacement: Vec<String>,
}

impl ResourceSchema {
    pub fn forcing(attrs: &[&str]) -> Self {
        Self {
            forces_replacement: attrs.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn forces(&self, attribute: &str) -> bool {
        self.forces_replacement.iter().any(|a| a == attribute)
    }
}

/// Result of a successful create call.
#[derive(Debug, Clone)]
pub struct Created {
    /// Provider-assigned identifier
    pub id: String,
    /// Computed output attributes (includes echoed inputs)
    pub outputs: AttrMap,
}

/// Result of an update call.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Updated(AttrMap),
    /// The provider determined the change cannot be applied in place
    RequiresReplace,
}

/// A provider adapter for one family of resource types.
pub trait Provider: Send + Sync {
    /// Schema for a resource type this provider owns.
    fn schema(&self, resource_type: &str) -> Result<ResourceSchema, ProviderError>;

    /// Provision a new remote object.
    fn create(&self, resource_type: &str, inputs: &AttrMap) -> Result<Created, ProviderError>;

    /// Read current outputs, or None if the object no longer exists.
    fn read(&self, resource_type: &str, id: &str) -> Result<Option<AttrMap>, ProviderError>;

    /// Apply an in-place change to an existing object.
    fn update(
        &self,
        resource_type: &str,
        id: &str,
        inputs: &AttrMap,
    ) -> Result<UpdateOutcome, ProviderError>;

    /// Tear down a remote object.
    fn delete(&self, resource_type: &str, id: &str) -> Result<(), ProviderError>;
}

/// Routes resource types to registered providers by type prefix
/// (`aws:ec2/vpc` -> the provider registered as `aws`).
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prefix: impl Into<String>, provider: Box<dyn Provider>) {
        self.providers.insert(prefix.into(), provider);
    }

    pub fn for_type(&self, resource_type: &str) -> Result<&dyn Provider, ProviderError> {
        self.providers
            .get(provider_prefix(resource_type))
            .map(Box::as_ref)
            .ok_or_else(|| ProviderError::UnknownType {
                resource_type: resource_type.to_string(),
            })
    }

    pub fn schema(&self, resource_type: &str) -> Result<ResourceSchema, ProviderError> {
        self.for_type(resource_type)?.schema(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimProvider;

    #[test]
    fn registry_routes_by_prefix() {
        let mut registry = ProviderRegistry::new();
        registry.register("aws", Box::new(SimProvider::new()));

        assert!(registry.for_type("aws:ec2/vpc").is_ok());
        assert!(matches!(
            registry.for_type("gcp:compute/network"),
            Err(ProviderError::UnknownType { .. })
        ));
    }

    #[test]
    fn schema_lookup_flags_forcing_attributes() {
        let schema = ResourceSchema::forcing(&["cidr_block"]);
        assert!(schema.forces("cidr_block"));
        assert!(!schema.forces("tags"));
    }
}
