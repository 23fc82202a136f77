mod docker_registry;
mod gateway;

pub use docker_registry::*;
pub use gateway::*;
