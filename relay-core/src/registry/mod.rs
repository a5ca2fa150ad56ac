mod handle;
mod messages;
mod runner;

pub use handle::RegistryHandle;
pub use messages::{RegistryMessage, RegistrySnapshot};
pub use runner::{spawn_registry, RegistryActor};
