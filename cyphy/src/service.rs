//! Per-design service instance.
//!
//! One [`DesignService`] owns the in-memory state for a single (user, design)
//! pair: it loads the state from the store at startup, funnels every update
//! and delete batch through the reconciler, and runs compile requests. All
//! mutation goes through one mutex, so a compile always sees a batch fully
//! applied or not at all.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::compiler::{generate_sim_source, generate_topology, Topology};
use crate::model::{DesignView, Id};
use crate::protocol::{self, Decoded, Delete, Update};
use crate::reconcile::{self, ApplyReport, DesignState};
use crate::sema::{self, Diagnostics};
use crate::store::{Store, StoreError};

/// The products of a successful compile run.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub sim_source: String,
    pub topology: Topology,
}

/// What a compile request returns: the full diagnostic set, plus artifacts
/// when checking did not fail.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub diagnostics: Diagnostics,
    pub artifacts: Option<Artifacts>,
}

/// Owns one design on behalf of one user.
pub struct DesignService {
    user: String,
    store: Arc<dyn Store>,
    state: Mutex<DesignState>,
}

impl DesignService {
    /// Load a design, its owner's models and its run settings from the store.
    pub fn load(store: Arc<dyn Store>, design: &str, user: &str) -> Result<Self, StoreError> {
        let graph = store.read_design(design, user)?;
        let models = store
            .read_user_models(user)?
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        let key = store.read_design_key(design, user)?;
        let sim_settings = store.read_sim_settings(key)?;

        info!(design, user, "design loaded");
        Ok(DesignService {
            user: user.to_string(),
            store,
            state: Mutex::new(DesignState { design: graph, models, sim_settings }),
        })
    }

    /// Apply an update batch. Entries that fail to decode are logged and
    /// dropped; the rest of the batch still applies.
    pub fn apply_update(&self, update: Update) -> ApplyReport {
        let batch = decode_batch(&update.elements);
        let mut state = self.state.lock();
        reconcile::apply(&mut state, self.store.as_ref(), &self.user, batch)
    }

    /// Apply a delete batch. Only graph elements are deletable; models and
    /// settings entries in a delete batch are dropped with a warning.
    pub fn apply_delete(&self, delete: Delete) -> ApplyReport {
        let mut elements = Vec::new();
        for (oid, item) in decode_batch(&delete.elements) {
            match item {
                Decoded::Element(e) => elements.push(e),
                Decoded::Model(_) | Decoded::SimSettings(_) => {
                    warn!(id = %oid, "non-element in delete batch, dropped");
                }
            }
        }
        let mut state = self.state.lock();
        reconcile::apply_delete(&mut state, self.store.as_ref(), &self.user, elements)
    }

    /// Check the design and, if checking is not fatal, run both compilers.
    pub fn compile(&self) -> CompileOutcome {
        let state = self.state.lock();
        let mut diagnostics = sema::check(&state.design);
        if diagnostics.fatal() {
            info!(design = %state.design.name, "compile aborted: design check failed");
            return CompileOutcome { diagnostics, artifacts: None };
        }

        let (sim_source, ds) = generate_sim_source(&state.design, &state.models);
        diagnostics.merge(ds);

        let topology = match generate_topology(&state.design) {
            Ok(t) => t,
            Err(e) => {
                diagnostics.error(e.to_string());
                return CompileOutcome { diagnostics, artifacts: None };
            }
        };

        if diagnostics.fatal() {
            return CompileOutcome { diagnostics, artifacts: None };
        }

        info!(design = %state.design.name, "compile succeeded");
        CompileOutcome {
            diagnostics,
            artifacts: Some(Artifacts { sim_source, topology }),
        }
    }

    /// A serializable snapshot of the whole design: graph, models, settings.
    pub fn snapshot(&self) -> DesignView {
        let state = self.state.lock();
        DesignView {
            name: state.design.name.clone(),
            elements: state.design.elements.values().cloned().collect(),
            models: state.models.values().cloned().collect(),
            sim_settings: state.sim_settings,
        }
    }
}

fn decode_batch(entries: &[protocol::ElementUpdate]) -> Vec<(Id, Decoded)> {
    let mut batch = Vec::with_capacity(entries.len());
    for u in entries {
        match protocol::decode(u) {
            Ok(d) => batch.push((u.oid.clone(), d)),
            Err(e) => warn!(oid = %u.oid, kind = %u.kind, %e, "undecodable entry dropped"),
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, Id, Model, Phyo, Plink, Position, SimSettings};
    use crate::store::{MemStore, Store};

    fn seeded_store() -> Arc<MemStore> {
        let store = Arc::new(MemStore::new());
        store.add_design("chinook", "murphy");

        let rtr = Element::Phyo(Phyo {
            id: Id::new("rtr", "root", "chinook"),
            position: Position::default(),
            model: "Rotor".to_string(),
            args: "H=2.5".to_string(),
            init: String::new(),
        });
        store.create_element(&rtr, "murphy").unwrap();
        store
            .create_model(
                &Model {
                    name: "Rotor".to_string(),
                    equations: "w' = tau - H*w^2\ntheta' = w".to_string(),
                    params: "H,".to_string(),
                    icon: String::new(),
                },
                "murphy",
            )
            .unwrap();
        store
    }

    #[test]
    fn load_pulls_graph_models_and_settings() {
        let store = seeded_store();
        let svc = DesignService::load(store, "chinook", "murphy").unwrap();
        let view = svc.snapshot();
        assert_eq!(view.name, "chinook");
        assert_eq!(view.elements.len(), 1);
        assert_eq!(view.models[0].name, "Rotor");
        assert_eq!(view.sim_settings, SimSettings::default());
    }

    #[test]
    fn undecodable_entry_does_not_poison_batch() {
        let store = seeded_store();
        let svc = DesignService::load(store, "chinook", "murphy").unwrap();

        let update: Update = serde_json::from_str(
            r#"{"elements": [
                {"oid": {"name": "x", "sys": "root", "design": "chinook"},
                 "type": "Muffin", "element": {}},
                {"oid": {"name": "sw0", "sys": "root", "design": "chinook"},
                 "type": "Switch",
                 "element": {"name": "sw0", "sys": "root", "design": "chinook",
                             "capacity": 1000, "latency": 0,
                             "position": {"x": 0, "y": 0, "z": 0}}}
            ]}"#,
        )
        .unwrap();

        let report = svc.apply_update(update);
        assert_eq!(report, ApplyReport { applied: 1, skipped: 0 });
        assert_eq!(svc.snapshot().elements.len(), 2);
    }

    #[test]
    fn compile_produces_both_artifacts() {
        let store = seeded_store();
        let svc = DesignService::load(store, "chinook", "murphy").unwrap();

        let outcome = svc.compile();
        assert!(!outcome.diagnostics.fatal());
        let artifacts = outcome.artifacts.expect("artifacts");
        assert!(artifacts.sim_source.starts_with("Object Rotor(H)\n"));
        assert_eq!(artifacts.topology.substrates[0].name, "simnet");
    }

    #[test]
    fn fatal_check_blocks_compilation() {
        let store = seeded_store();
        let dangling = Element::Plink(Plink {
            id: Id::new("pl0", "root", "chinook"),
            endpoints: [
                Id::new("ghost", "root", "chinook"),
                Id::new("rtr", "root", "chinook"),
            ],
            bindings: ["w".to_string(), "w".to_string()],
        });
        store.create_element(&dangling, "murphy").unwrap();

        let svc = DesignService::load(store, "chinook", "murphy").unwrap();
        let outcome = svc.compile();
        assert!(outcome.diagnostics.fatal());
        assert!(outcome.artifacts.is_none());
    }
}
