//! Path conventions and provider wiring.

use provision::{ProviderRegistry, SimProvider};
use std::path::{Path, PathBuf};

/// State file location: explicit path, or the stack file with its
/// extension swapped for `.state.json`.
pub fn state_path(stack_file: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(|| stack_file.with_extension("state.json"), Path::to_path_buf)
}

/// Provider namespaces the simulated backend answers for.
const SIM_PREFIXES: &[&str] = &["aws", "kubernetes", "test"];

/// Build the provider registry.
///
/// Every namespace routes to a simulated provider backed by a file next
/// to the state file, so remote objects survive between invocations.
pub fn registry(state_path: &Path) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for prefix in SIM_PREFIXES {
        let store = state_path.with_extension(format!("sim-{prefix}.json"));
        registry.register(*prefix, Box::new(SimProvider::with_store(store)));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_path_derives_from_stack_file() {
        assert_eq!(
            state_path(Path::new("stacks/demo.toml"), None),
            PathBuf::from("stacks/demo.state.json")
        );
        assert_eq!(
            state_path(Path::new("stacks/demo.toml"), Some(Path::new("/tmp/s.json"))),
            PathBuf::from("/tmp/s.json")
        );
    }

    #[test]
    fn registry_covers_demo_namespaces() {
        let registry = registry(Path::new("demo.state.json"));
        assert!(registry.for_type("aws:ec2/vpc").is_ok());
        assert!(registry.for_type("kubernetes:helm/release").is_ok());
        assert!(registry.for_type("gcp:compute/network").is_err());
    }
}
