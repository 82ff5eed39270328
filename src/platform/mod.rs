//! Platform adapters: the trait boundary to the hosting platform's repair registry,
//! health bus, node directory, and the external update engine (§1, §2, §9).
//!
//! Only the trait boundary and an in-memory reference implementation of each live here;
//! the real platform bindings are out of scope (§1). Coordinator and agent code depend
//! only on these traits, never on a concrete backend, so the same logic runs unmodified
//! against the fakes in tests and (eventually) against the real platform.

pub mod clock;
pub mod deployment;
pub mod health_bus;
pub mod node_directory;
pub mod os_policy;
pub mod repair_registry;
pub mod update_engine;

pub use clock::{Clock, SystemClock};
pub use deployment::DeploymentDirectory;
pub use health_bus::{HealthBus, HealthFact, HealthState};
pub use node_directory::NodeDirectory;
pub use os_policy::OsPolicy;
pub use repair_registry::RepairRegistry;
pub use update_engine::{UpdateCandidate, UpdateEngine};
