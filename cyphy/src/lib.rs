//! Cyphy — compile cyber-physical experiment designs into simulation source
//! and testbed network topologies.
//!
//! A design is a graph of cyber elements (computers, switches, routers,
//! links), physical elements (equation-model instances and physical links)
//! and sense/actuate adapters bridging the two. The pipeline is:
//! reconcile updates into the graph, check it, then lower it twice.
//!
//! # Modules
//!
//! - [`model`] — the design graph: elements, identities, models, settings
//! - [`expr`] — nom-based extraction of sense/actuate variable declarations
//! - [`protocol`] — update/delete wire messages and per-item decoding
//! - [`store`] — the persistence mirror trait and an in-memory implementation
//! - [`reconcile`] — applying update/delete batches in dependency order
//! - [`sema`] — semantic checking, producing leveled diagnostics
//! - [`compiler`] — simulation source and topology generation
//! - [`service`] — one instance per (user, design): load, update, compile

pub mod compiler;
pub mod expr;
pub mod model;
pub mod protocol;
pub mod reconcile;
pub mod sema;
pub mod service;
pub mod store;

pub use model::{Design, DesignView, Element, Id};
pub use sema::{Diagnostic, Diagnostics, Level};
pub use service::{CompileOutcome, DesignService};
