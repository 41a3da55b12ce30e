//! Persistence collaborator interface.
//!
//! The reconciler mirrors every create/update/delete through a [`Store`]
//! before touching the in-memory graph. The store is strictly a key-value
//! mirror: it never interprets the design, and the core never depends on any
//! particular query language behind it. The SQL-backed production store lives
//! outside this crate; [`MemStore`] is the in-process implementation used by
//! tests and the CLI.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use thiserror::Error;

use crate::model::{Design, Element, Id, Model, NetIfRef, SimSettings};

/// Opaque row key handed back by update operations.
pub type StoreKey = i64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no design named '{0}'")]
    NoSuchDesign(String),
    #[error("no element with id '{0}'")]
    NoSuchElement(Id),
    #[error("no model named '{0}'")]
    NoSuchModel(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// The operations the core requires of a persistence backend.
///
/// `user` scopes every call: designs and models are owned per user. Element
/// updates receive both the old and new value because a backend that stores
/// interfaces relationally must diff the interface sets of host elements.
pub trait Store: Send + Sync {
    fn create_element(&self, e: &Element, user: &str) -> Result<(), StoreError>;
    fn update_element(
        &self,
        oid: &Id,
        old: &Element,
        new: &Element,
        user: &str,
    ) -> Result<StoreKey, StoreError>;
    fn delete_id(&self, id: &Id, user: &str) -> Result<(), StoreError>;
    fn delete_interface(&self, endpoint: &NetIfRef, user: &str) -> Result<(), StoreError>;

    fn create_model(&self, m: &Model, user: &str) -> Result<(), StoreError>;
    fn update_model(&self, oname: &str, m: &Model, user: &str) -> Result<(), StoreError>;

    fn read_design(&self, name: &str, user: &str) -> Result<Design, StoreError>;
    fn read_user_models(&self, user: &str) -> Result<Vec<Model>, StoreError>;

    fn read_design_key(&self, name: &str, user: &str) -> Result<StoreKey, StoreError>;
    fn read_sim_settings(&self, design_key: StoreKey) -> Result<SimSettings, StoreError>;
    fn update_sim_settings(&self, s: &SimSettings, design_key: StoreKey)
        -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemState {
    /// (user, design name) → elements.
    designs: HashMap<(String, String), BTreeMap<Id, Element>>,
    /// (user, model name) → model.
    models: HashMap<(String, String), Model>,
    /// (user, design name) → synthetic design key.
    design_keys: HashMap<(String, String), StoreKey>,
    settings: HashMap<StoreKey, SimSettings>,
    next_key: StoreKey,
}

/// In-memory [`Store`]. Designs must be registered with
/// [`MemStore::add_design`] before elements can be mirrored into them.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Register an empty design for `user`, returning its key.
    pub fn add_design(&self, name: &str, user: &str) -> StoreKey {
        let mut st = self.state.lock();
        let slot = (user.to_string(), name.to_string());
        st.designs.entry(slot.clone()).or_default();
        if let Some(&k) = st.design_keys.get(&slot) {
            return k;
        }
        st.next_key += 1;
        let key = st.next_key;
        st.design_keys.insert(slot, key);
        st.settings.insert(key, SimSettings::default());
        key
    }

    fn design_slot(id: &Id, user: &str) -> (String, String) {
        (user.to_string(), id.design.clone())
    }
}

impl Store for MemStore {
    fn create_element(&self, e: &Element, user: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let slot = Self::design_slot(e.id(), user);
        let design = st
            .designs
            .get_mut(&slot)
            .ok_or_else(|| StoreError::NoSuchDesign(slot.1.clone()))?;
        design.insert(e.id().clone(), e.clone());
        Ok(())
    }

    fn update_element(
        &self,
        oid: &Id,
        _old: &Element,
        new: &Element,
        user: &str,
    ) -> Result<StoreKey, StoreError> {
        let mut st = self.state.lock();
        let slot = Self::design_slot(oid, user);
        let design = st
            .designs
            .get_mut(&slot)
            .ok_or_else(|| StoreError::NoSuchDesign(slot.1.clone()))?;
        if design.remove(oid).is_none() {
            return Err(StoreError::NoSuchElement(oid.clone()));
        }
        design.insert(new.id().clone(), new.clone());
        Ok(0)
    }

    fn delete_id(&self, id: &Id, user: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let slot = Self::design_slot(id, user);
        let design = st
            .designs
            .get_mut(&slot)
            .ok_or_else(|| StoreError::NoSuchDesign(slot.1.clone()))?;
        design
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchElement(id.clone()))
    }

    fn delete_interface(&self, endpoint: &NetIfRef, user: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let slot = Self::design_slot(&endpoint.id, user);
        let design = st
            .designs
            .get_mut(&slot)
            .ok_or_else(|| StoreError::NoSuchDesign(slot.1.clone()))?;
        // Deleting a link frees the interfaces it used. A host that is gone
        // already (same delete batch) is not an error.
        if let Some(e) = design.get_mut(&endpoint.id) {
            match e {
                Element::Computer(c) => {
                    c.host.interfaces.remove(&endpoint.ifname);
                }
                Element::Router(r) => {
                    r.host.interfaces.remove(&endpoint.ifname);
                }
                Element::Sax(s) => {
                    s.host.interfaces.remove(&endpoint.ifname);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn create_model(&self, m: &Model, user: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        st.models
            .insert((user.to_string(), m.name.clone()), m.clone());
        Ok(())
    }

    fn update_model(&self, oname: &str, m: &Model, user: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let old_slot = (user.to_string(), oname.to_string());
        if st.models.remove(&old_slot).is_none() {
            return Err(StoreError::NoSuchModel(oname.to_string()));
        }
        st.models
            .insert((user.to_string(), m.name.clone()), m.clone());
        Ok(())
    }

    fn read_design(&self, name: &str, user: &str) -> Result<Design, StoreError> {
        let st = self.state.lock();
        let slot = (user.to_string(), name.to_string());
        let elements = st
            .designs
            .get(&slot)
            .ok_or_else(|| StoreError::NoSuchDesign(name.to_string()))?;
        Ok(Design {
            name: name.to_string(),
            elements: elements.clone(),
        })
    }

    fn read_user_models(&self, user: &str) -> Result<Vec<Model>, StoreError> {
        let st = self.state.lock();
        let mut models: Vec<Model> = st
            .models
            .iter()
            .filter(|((u, _), _)| u == user)
            .map(|(_, m)| m.clone())
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    fn read_design_key(&self, name: &str, user: &str) -> Result<StoreKey, StoreError> {
        let st = self.state.lock();
        st.design_keys
            .get(&(user.to_string(), name.to_string()))
            .copied()
            .ok_or_else(|| StoreError::NoSuchDesign(name.to_string()))
    }

    fn read_sim_settings(&self, design_key: StoreKey) -> Result<SimSettings, StoreError> {
        let st = self.state.lock();
        st.settings
            .get(&design_key)
            .copied()
            .ok_or_else(|| StoreError::Backend(format!("no settings for key {design_key}")))
    }

    fn update_sim_settings(
        &self,
        s: &SimSettings,
        design_key: StoreKey,
    ) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        st.settings.insert(design_key, *s);
        Ok(())
    }
}
