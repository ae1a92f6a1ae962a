//! # Provision
//!
//! A declarative provisioning engine: declare resources and their
//! relationships, and the engine computes and executes the operations
//! that converge real infrastructure to the declaration.
//!
//! ## Core Concepts
//!
//! - **Stack**: A named set of resource declarations plus exported outputs
//! - **Value**: A declared attribute value, possibly referencing another
//!   resource's output (`${vpc.id}`) or marked secret
//! - **DependencyGraph**: Validated reference/`depends_on` edges, cycle-free
//! - **Plan**: The diff between declaration and recorded state, as
//!   create/update/replace/delete operations
//! - **Executor**: Applies a plan concurrently in graph order, with retry
//!   and per-resource failure isolation
//! - **Provider**: Adapter translating generic operations into concrete
//!   API calls, registered by resource type prefix
//!
//! ## Example
//!
//! ```ignore
//! use provision::{
//!     DependencyGraph, ExecuteOptions, NoProgress, ProviderRegistry,
//!     ResourceDecl, SimProvider, Stack, StateStore, Value, plan,
//! };
//! use std::sync::atomic::AtomicBool;
//!
//! let mut stack = Stack::new("demo");
//! stack.resources.push(
//!     ResourceDecl::new("vpc", "aws:ec2/vpc")
//!         .with_input("cidr_block", Value::string("10.0.0.0/16")),
//! );
//! stack.resources.push(
//!     ResourceDecl::new("subnet", "aws:ec2/subnet")
//!         .with_input("vpc_id", Value::reference("vpc", "id"))
//!         .with_input("cidr_block", Value::string("10.0.1.0/24")),
//! );
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register("aws", Box::new(SimProvider::new()));
//!
//! let graph = DependencyGraph::build(&stack.resources)?;
//! let store = StateStore::new("state.json");
//! let _lock = store.lock()?;
//! let mut state = store.load()?;
//!
//! let planned = plan::compute(&stack, &graph, &state, &registry)?;
//! let summary = provision::execute(
//!     &stack, &graph, &planned, &registry, &store, &mut state,
//!     &ExecuteOptions::default(), &mut NoProgress, &AtomicBool::new(false),
//! )?;
//! ```
//!
//! ## Failure Model
//!
//! Transient provider errors (throttling, timeouts) retry with bounded
//! exponential backoff. A permanent failure marks the resource failed and
//! its transitive dependents skipped; independent branches still complete.
//! The run returns a [`RunSummary`] either way, so state always reflects
//! what actually happened.

pub mod error;
pub mod executor;
pub mod graph;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod sim;
pub mod state;
pub mod value;

// Re-export main types at crate root
pub use error::{DeclarationError, Error, ProviderError, Result, StateError};
pub use executor::{
    ExecuteOptions, NoProgress, ProgressCallback, ResourceOutcome, RunSummary, Tally, execute,
    refresh, resolve_exports,
};
pub use graph::DependencyGraph;
pub use plan::{AttrChange, OpKind, Plan, PlannedOp};
pub use provider::{AttrMap, Created, Provider, ProviderRegistry, ResourceSchema, UpdateOutcome};
pub use resource::{ReplacePolicy, ResourceDecl, ResourceOptions, Stack, provider_prefix};
pub use retry::{RetryCallback, RetryConfig, with_retry};
pub use sim::SimProvider;
pub use state::{ResourceRecord, StateFile, StateLock, StateStore, input_hash};
pub use value::{KNOWN_AFTER_APPLY, Reference, Value};
