//! Design-to-artifact compilers.
//!
//! Two independent lowerings of one checked design graph:
//! 1. [`sim`] — the physical side (models, objects, adapters, plinks) becomes
//!    an executable simulation description.
//! 2. [`topo`] — the cyber side (hosts, switches, links) becomes a network
//!    topology tree ready for testbed provisioning.
//!
//! Both are deterministic: output depends only on design content, never on
//! incidental iteration order.

pub mod sim;
pub mod topo;

pub use sim::generate_sim_source;
pub use topo::{generate_topology, Topology, TopologyError};
