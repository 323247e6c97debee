// Service layer: the redirection engines, the instance coordinator, and the
// runtime-dependency helpers the orchestrator sequences.

pub mod instance;
pub mod java;
pub mod redirect;
pub mod redist;
pub mod registry;

pub use instance::{InstanceCoordinator, SecondaryOutcome};
pub use java::JavaLocator;
pub use redirect::ResourceRedirector;
pub use redist::RedistHandler;
pub use registry::{DeferredRemoval, OverrideMap, RegistryRedirector};
