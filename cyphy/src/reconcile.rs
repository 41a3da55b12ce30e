//! Reconciliation: applying update and delete batches to the design graph.
//!
//! A batch is an unordered set of proposed element states. Each item is
//! classified against the current graph — create, update, or rename (modeled
//! as delete-then-insert) — and then applied in dependency order, because
//! later groups reference earlier ones by name or id:
//!
//! 1. models (referenced by physical objects, by name)
//! 2. non-link nodes
//! 3. links (Link / Plink, referencing nodes by id)
//!
//! Within each group, changed items run before new items: an update that
//! renames an element frees its name for a subsequent insert. Renamed ids are
//! removed from the graph only after every create/update has been applied, so
//! dangling references never appear transiently within a batch.
//!
//! Every mutation is mirrored through the [`Store`] first. If the mirror call
//! fails, that item's in-memory effect is skipped and logged; the rest of the
//! batch continues. There is no cross-item rollback.

use std::collections::{BTreeMap, HashSet};

use tracing::{error, info, warn};

use crate::model::{Design, Element, Id, Link, Model, Plink, SimSettings};
use crate::protocol::Decoded;
use crate::store::Store;

/// The mutable state one service instance owns for a (user, design) pair.
#[derive(Debug, Clone, Default)]
pub struct DesignState {
    pub design: Design,
    pub models: BTreeMap<String, Model>,
    pub sim_settings: SimSettings,
}

/// What happened to a batch: items that took effect vs. items skipped because
/// their store mirror call failed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
}

impl ApplyReport {
    fn applied(&mut self) {
        self.applied += 1;
    }
    fn skipped(&mut self) {
        self.skipped += 1;
    }
}

// ---------------------------------------------------------------------------
// Update batches
// ---------------------------------------------------------------------------

/// Apply an update batch: `(prior identity, proposed state)` pairs.
pub fn apply(
    state: &mut DesignState,
    store: &dyn Store,
    user: &str,
    batch: Vec<(Id, Decoded)>,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    // Classification buckets. Every item carries its prior identity; the old
    // value itself is looked up at apply time, when earlier phases have
    // already run.
    let mut new_models: Vec<(String, Model)> = Vec::new();
    let mut changed_models: Vec<(String, Model)> = Vec::new();

    let mut new_nodes: Vec<(Id, Element)> = Vec::new();
    let mut changed_nodes: Vec<(Id, Element)> = Vec::new();
    let mut new_links: Vec<(Id, Element)> = Vec::new();
    let mut changed_links: Vec<(Id, Element)> = Vec::new();

    let mut settings: Option<SimSettings> = None;

    for (oid, item) in batch {
        match item {
            Decoded::Element(e) => {
                let (changed, new) = if e.is_link() {
                    (&mut changed_links, &mut new_links)
                } else {
                    (&mut changed_nodes, &mut new_nodes)
                };
                if state.design.elements.contains_key(&oid) {
                    changed.push((oid, e));
                } else {
                    new.push((oid, e));
                }
            }
            Decoded::Model(m) => {
                if state.models.contains_key(&oid.name) {
                    changed_models.push((oid.name, m));
                } else {
                    new_models.push((oid.name, m));
                }
            }
            // Settings bypass the graph entirely.
            Decoded::SimSettings(s) => settings = Some(s),
        }
    }

    // Kill lists record rename-freed identities, and only once the rename's
    // mirror call succeeded: a failed mirror skips the whole item, prior
    // identity included. `inserted` guards a name a later create claimed.
    let mut kill: Vec<Id> = Vec::new();
    let mut model_kill: Vec<String> = Vec::new();
    let mut inserted: HashSet<Id> = HashSet::new();
    let mut inserted_models: HashSet<String> = HashSet::new();

    for (oname, m) in changed_models {
        info!(model = %m.name, prior = %oname, "update model");
        match store.update_model(&oname, &m, user) {
            Ok(()) => {
                if m.name != oname {
                    model_kill.push(oname);
                }
                inserted_models.insert(m.name.clone());
                state.models.insert(m.name.clone(), m);
                report.applied();
            }
            Err(e) => {
                error!(model = %oname, %e, "model update not mirrored, skipping");
                report.skipped();
            }
        }
    }
    for (oname, m) in new_models {
        info!(model = %m.name, "create model");
        match store.create_model(&m, user) {
            Ok(()) => {
                if m.name != oname {
                    model_kill.push(oname);
                }
                inserted_models.insert(m.name.clone());
                state.models.insert(m.name.clone(), m);
                report.applied();
            }
            Err(e) => {
                error!(model = %m.name, %e, "model create not mirrored, skipping");
                report.skipped();
            }
        }
    }

    // Nodes strictly before links: a link's mirror call references its
    // endpoints, which must already exist in the store.
    for (oid, e) in changed_nodes {
        apply_changed(state, store, user, oid, e, &mut inserted, &mut kill, &mut report);
    }
    for (oid, e) in new_nodes {
        apply_new(state, store, user, oid, e, &mut inserted, &mut kill, &mut report);
    }
    for (oid, e) in changed_links {
        apply_changed(state, store, user, oid, e, &mut inserted, &mut kill, &mut report);
    }
    for (oid, e) in new_links {
        apply_new(state, store, user, oid, e, &mut inserted, &mut kill, &mut report);
    }

    for k in kill {
        if !inserted.contains(&k) {
            state.design.elements.remove(&k);
        }
    }
    for k in model_kill {
        if !inserted_models.contains(&k) {
            state.models.remove(&k);
        }
    }

    if let Some(s) = settings {
        apply_sim_settings(state, store, user, s, &mut report);
    }

    report
}

#[allow(clippy::too_many_arguments)]
fn apply_changed(
    state: &mut DesignState,
    store: &dyn Store,
    user: &str,
    oid: Id,
    e: Element,
    inserted: &mut HashSet<Id>,
    kill: &mut Vec<Id>,
    report: &mut ApplyReport,
) {
    info!(kind = e.kind(), id = %e.id(), prior = %oid, "update element");

    let Some(old) = state.design.elements.get(&oid).cloned() else {
        // Classified as changed against a graph this same call owns; only a
        // kill from an earlier phase could remove it, and kills run last.
        warn!(prior = %oid, "changed element vanished before apply, skipping");
        report.skipped();
        return;
    };

    match store.update_element(&oid, &old, &e, user) {
        Ok(_key) => {
            if *e.id() != oid {
                kill.push(oid);
            }
            inserted.insert(e.id().clone());
            state.design.elements.insert(e.id().clone(), e);
            report.applied();
        }
        Err(err) => {
            error!(kind = e.kind(), id = %e.id(), %err, "update not mirrored, skipping");
            report.skipped();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_new(
    state: &mut DesignState,
    store: &dyn Store,
    user: &str,
    oid: Id,
    e: Element,
    inserted: &mut HashSet<Id>,
    kill: &mut Vec<Id>,
    report: &mut ApplyReport,
) {
    info!(kind = e.kind(), id = %e.id(), "create element");

    match store.create_element(&e, user) {
        Ok(()) => {
            if *e.id() != oid {
                kill.push(oid);
            }
            inserted.insert(e.id().clone());
            state.design.elements.insert(e.id().clone(), e);
            report.applied();
        }
        Err(err) => {
            error!(kind = e.kind(), id = %e.id(), %err, "create not mirrored, skipping");
            report.skipped();
        }
    }
}

fn apply_sim_settings(
    state: &mut DesignState,
    store: &dyn Store,
    user: &str,
    s: SimSettings,
    report: &mut ApplyReport,
) {
    let key = match store.read_design_key(&state.design.name, user) {
        Ok(k) => k,
        Err(e) => {
            error!(design = %state.design.name, %e, "cannot read design key, settings skipped");
            report.skipped();
            return;
        }
    };
    match store.update_sim_settings(&s, key) {
        Ok(()) => {
            state.sim_settings = s;
            report.applied();
        }
        Err(e) => {
            error!(design = %state.design.name, %e, "settings update not mirrored, skipping");
            report.skipped();
        }
    }
}

// ---------------------------------------------------------------------------
// Delete batches
// ---------------------------------------------------------------------------

/// Apply a delete batch. Nodes go first, then links (freeing their endpoint
/// interfaces), then plinks.
///
/// The batch is trusted to be consistent: deleting a host while keeping its
/// links leaves dangling references that only the semantic checker will
/// catch, later.
pub fn apply_delete(
    state: &mut DesignState,
    store: &dyn Store,
    user: &str,
    batch: Vec<Element>,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    let mut nodes: Vec<Element> = Vec::new();
    let mut links: Vec<Link> = Vec::new();
    let mut plinks: Vec<Plink> = Vec::new();

    for e in batch {
        match e {
            Element::Link(l) => links.push(l),
            Element::Plink(p) => plinks.push(p),
            other => nodes.push(other),
        }
    }

    for n in nodes {
        info!(kind = n.kind(), id = %n.id(), "delete element");
        match store.delete_id(n.id(), user) {
            Ok(()) => {
                state.design.elements.remove(n.id());
                report.applied();
            }
            Err(e) => {
                error!(id = %n.id(), %e, "delete not mirrored, skipping");
                report.skipped();
            }
        }
    }

    for l in links {
        info!(id = %l.id, "delete link");
        match store.delete_id(&l.id, user) {
            Ok(()) => {
                for endpoint in &l.endpoints {
                    if let Err(e) = store.delete_interface(endpoint, user) {
                        warn!(id = %endpoint.id, ifname = %endpoint.ifname, %e,
                              "endpoint interface not deleted");
                    }
                    remove_interface(&mut state.design, endpoint.id.clone(), &endpoint.ifname);
                }
                state.design.elements.remove(&l.id);
                report.applied();
            }
            Err(e) => {
                error!(id = %l.id, %e, "delete not mirrored, skipping");
                report.skipped();
            }
        }
    }

    for p in plinks {
        info!(id = %p.id, "delete plink");
        match store.delete_id(&p.id, user) {
            Ok(()) => {
                state.design.elements.remove(&p.id);
                report.applied();
            }
            Err(e) => {
                error!(id = %p.id, %e, "delete not mirrored, skipping");
                report.skipped();
            }
        }
    }

    report
}

/// Drop an interface from the in-memory element that owns it.
fn remove_interface(design: &mut Design, host: Id, ifname: &str) {
    match design.elements.get_mut(&host) {
        Some(Element::Computer(c)) => {
            c.host.interfaces.remove(ifname);
        }
        Some(Element::Router(r)) => {
            r.host.interfaces.remove(ifname);
        }
        Some(Element::Sax(s)) => {
            s.host.interfaces.remove(ifname);
        }
        // Host already deleted in this batch, or not a host at all.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::{MemStore, Store, StoreError, StoreKey};
    use parking_lot::Mutex;
    use std::collections::HashSet as StdHashSet;

    fn computer(name: &str) -> Element {
        let mut interfaces = BTreeMap::new();
        interfaces.insert(
            "eth0".to_string(),
            Interface {
                name: "eth0".to_string(),
                conductor: PacketConductor { capacity: 100, latency: 1 },
            },
        );
        Element::Computer(Computer {
            host: NetHost { id: Id::new(name, "root", "test"), interfaces },
            position: Position::default(),
            os: "Ubuntu".to_string(),
            start_script: String::new(),
        })
    }

    fn link(name: &str, a: &str, b: &str) -> Element {
        Element::Link(Link {
            id: Id::new(name, "root", "test"),
            conductor: PacketConductor { capacity: 100, latency: 1 },
            path: Vec::new(),
            endpoints: [
                NetIfRef { id: Id::new(a, "root", "test"), ifname: "eth0".to_string() },
                NetIfRef { id: Id::new(b, "root", "test"), ifname: "eth0".to_string() },
            ],
        })
    }

    fn setup() -> (DesignState, MemStore) {
        let store = MemStore::new();
        store.add_design("test", "murphy");
        let state = DesignState {
            design: Design::new("test"),
            ..Default::default()
        };
        (state, store)
    }

    fn element_batch(items: Vec<Element>) -> Vec<(Id, Decoded)> {
        items
            .into_iter()
            .map(|e| (e.id().clone(), Decoded::Element(e)))
            .collect()
    }

    #[test]
    fn create_then_read_back() {
        let (mut state, store) = setup();
        let report = apply(
            &mut state,
            &store,
            "murphy",
            element_batch(vec![computer("a"), computer("b"), link("l0", "a", "b")]),
        );
        assert_eq!(report, ApplyReport { applied: 3, skipped: 0 });
        assert_eq!(state.design.elements.len(), 3);
        // Store saw the same picture.
        let mirrored = store.read_design("test", "murphy").unwrap();
        assert_eq!(mirrored.elements, state.design.elements);
    }

    #[test]
    fn rename_removes_prior_id() {
        let (mut state, store) = setup();
        apply(&mut state, &store, "murphy", element_batch(vec![computer("a")]));

        let prior = Id::new("a", "root", "test");
        let renamed = computer("a2");
        apply(
            &mut state,
            &store,
            "murphy",
            vec![(prior.clone(), Decoded::Element(renamed.clone()))],
        );

        assert!(!state.design.elements.contains_key(&prior));
        assert_eq!(state.design.elements[renamed.id()], renamed);
        let mirrored = store.read_design("test", "murphy").unwrap();
        assert!(!mirrored.elements.contains_key(&prior));
        assert!(mirrored.elements.contains_key(renamed.id()));
    }

    #[test]
    fn rename_frees_name_for_insert_in_same_batch() {
        let (mut state, store) = setup();
        apply(&mut state, &store, "murphy", element_batch(vec![computer("a")]));

        // One batch: rename a -> c, and a brand-new element claiming the
        // freed name a. The kill for the rename must not clobber it.
        let prior = Id::new("a", "root", "test");
        let absent = Id::new("pending", "root", "test");
        let batch = vec![
            (prior.clone(), Decoded::Element(computer("c"))),
            (absent, Decoded::Element(computer("a"))),
        ];
        apply(&mut state, &store, "murphy", batch);

        assert!(state.design.elements.contains_key(&Id::new("c", "root", "test")));
        assert!(state.design.elements.contains_key(&prior), "new 'a' must survive the kill");
    }

    #[test]
    fn model_updates_are_keyed_by_name() {
        let (mut state, store) = setup();
        let m = Model { name: "Rotor".to_string(), params: "H,".to_string(), ..Default::default() };
        let batch = vec![(Id::new("Rotor", "", ""), Decoded::Model(m.clone()))];
        apply(&mut state, &store, "murphy", batch);
        assert_eq!(state.models["Rotor"], m);

        // Rename Rotor -> Rotor2.
        let m2 = Model { name: "Rotor2".to_string(), ..m };
        let batch = vec![(Id::new("Rotor", "", ""), Decoded::Model(m2.clone()))];
        apply(&mut state, &store, "murphy", batch);
        assert!(!state.models.contains_key("Rotor"));
        assert_eq!(state.models["Rotor2"], m2);
        let mirrored = store.read_user_models("murphy").unwrap();
        assert_eq!(mirrored, vec![m2]);
    }

    #[test]
    fn sim_settings_bypass_the_graph() {
        let (mut state, store) = setup();
        let s = SimSettings { begin: 0.0, end: 20.0, max_step: 0.05 };
        let batch = vec![(Id::new("", "", ""), Decoded::SimSettings(s))];
        apply(&mut state, &store, "murphy", batch);
        assert_eq!(state.sim_settings, s);
        assert!(state.design.elements.is_empty());
        let key = store.read_design_key("test", "murphy").unwrap();
        assert_eq!(store.read_sim_settings(key).unwrap(), s);
    }

    #[test]
    fn delete_link_frees_endpoint_interfaces() {
        let (mut state, store) = setup();
        apply(
            &mut state,
            &store,
            "murphy",
            element_batch(vec![computer("a"), computer("b"), link("l0", "a", "b")]),
        );

        let l = match &state.design.elements[&Id::new("l0", "root", "test")] {
            Element::Link(l) => l.clone(),
            _ => unreachable!(),
        };
        apply_delete(&mut state, &store, "murphy", vec![Element::Link(l)]);

        assert!(!state.design.elements.contains_key(&Id::new("l0", "root", "test")));
        for host in ["a", "b"] {
            match &state.design.elements[&Id::new(host, "root", "test")] {
                Element::Computer(c) => assert!(c.host.interfaces.is_empty()),
                _ => unreachable!(),
            }
        }
    }

    // Store wrapper that records element mirror calls in order and can fail
    // chosen creates/updates by element name.
    struct RecordingStore {
        inner: MemStore,
        fail_creates: Mutex<StdHashSet<String>>,
        fail_updates: Mutex<StdHashSet<String>>,
        ops: Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            let store = MemStore::new();
            store.add_design("test", "murphy");
            RecordingStore {
                inner: store,
                fail_creates: Mutex::new(StdHashSet::new()),
                fail_updates: Mutex::new(StdHashSet::new()),
                ops: Mutex::new(Vec::new()),
            }
        }

        fn fail_create(self, name: &str) -> Self {
            self.fail_creates.lock().insert(name.to_string());
            self
        }

        fn fail_update(self, name: &str) -> Self {
            self.fail_updates.lock().insert(name.to_string());
            self
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().clone()
        }
    }

    impl Store for RecordingStore {
        fn create_element(&self, e: &Element, user: &str) -> Result<(), StoreError> {
            self.ops.lock().push(format!("create {}", e.id().name));
            if self.fail_creates.lock().contains(&e.id().name) {
                return Err(StoreError::Backend("injected failure".to_string()));
            }
            self.inner.create_element(e, user)
        }
        fn update_element(
            &self,
            oid: &Id,
            old: &Element,
            new: &Element,
            user: &str,
        ) -> Result<StoreKey, StoreError> {
            self.ops.lock().push(format!("update {}", oid.name));
            if self.fail_updates.lock().contains(&new.id().name) {
                return Err(StoreError::Backend("injected failure".to_string()));
            }
            self.inner.update_element(oid, old, new, user)
        }
        fn delete_id(&self, id: &Id, user: &str) -> Result<(), StoreError> {
            self.inner.delete_id(id, user)
        }
        fn delete_interface(&self, ep: &NetIfRef, user: &str) -> Result<(), StoreError> {
            self.inner.delete_interface(ep, user)
        }
        fn create_model(&self, m: &Model, user: &str) -> Result<(), StoreError> {
            self.inner.create_model(m, user)
        }
        fn update_model(&self, oname: &str, m: &Model, user: &str) -> Result<(), StoreError> {
            self.inner.update_model(oname, m, user)
        }
        fn read_design(&self, name: &str, user: &str) -> Result<Design, StoreError> {
            self.inner.read_design(name, user)
        }
        fn read_user_models(&self, user: &str) -> Result<Vec<Model>, StoreError> {
            self.inner.read_user_models(user)
        }
        fn read_design_key(&self, name: &str, user: &str) -> Result<StoreKey, StoreError> {
            self.inner.read_design_key(name, user)
        }
        fn read_sim_settings(&self, key: StoreKey) -> Result<SimSettings, StoreError> {
            self.inner.read_sim_settings(key)
        }
        fn update_sim_settings(&self, s: &SimSettings, key: StoreKey) -> Result<(), StoreError> {
            self.inner.update_sim_settings(s, key)
        }
    }

    #[test]
    fn mirror_failure_skips_only_that_item() {
        let store = RecordingStore::new().fail_create("b");
        let mut state = DesignState {
            design: Design::new("test"),
            ..Default::default()
        };

        let report = apply(
            &mut state,
            &store,
            "murphy",
            element_batch(vec![computer("a"), computer("b")]),
        );

        assert_eq!(report, ApplyReport { applied: 1, skipped: 1 });
        assert!(state.design.elements.contains_key(&Id::new("a", "root", "test")));
        assert!(!state.design.elements.contains_key(&Id::new("b", "root", "test")));
    }

    #[test]
    fn rename_mirror_failure_keeps_prior_element() {
        let store = RecordingStore::new().fail_update("b");
        let mut state = DesignState {
            design: Design::new("test"),
            ..Default::default()
        };
        apply(&mut state, &store, "murphy", element_batch(vec![computer("a")]));

        // Rename a -> b with the mirror refusing the update: neither half of
        // the rename may take effect in memory.
        let prior = Id::new("a", "root", "test");
        let report = apply(
            &mut state,
            &store,
            "murphy",
            vec![(prior.clone(), Decoded::Element(computer("b")))],
        );

        assert_eq!(report, ApplyReport { applied: 0, skipped: 1 });
        assert!(state.design.elements.contains_key(&prior));
        assert!(!state.design.elements.contains_key(&Id::new("b", "root", "test")));
    }

    #[test]
    fn nodes_mirror_before_links() {
        let store = RecordingStore::new();
        let mut state = DesignState {
            design: Design::new("test"),
            ..Default::default()
        };
        apply(
            &mut state,
            &store,
            "murphy",
            element_batch(vec![computer("a"), computer("b"), link("l0", "a", "b")]),
        );

        // One batch: a changed link and the brand-new node it now references.
        // The node's mirror call must land before the link's.
        let batch = vec![
            (
                Id::new("l0", "root", "test"),
                Decoded::Element(link("l0", "a", "c")),
            ),
            (
                Id::new("c", "root", "test"),
                Decoded::Element(computer("c")),
            ),
        ];
        let report = apply(&mut state, &store, "murphy", batch);
        assert_eq!(report, ApplyReport { applied: 2, skipped: 0 });

        let ops = store.ops();
        let create_c = ops.iter().position(|o| o == "create c").unwrap();
        let update_l0 = ops.iter().position(|o| o == "update l0").unwrap();
        assert!(create_c < update_l0, "ops: {ops:?}");
    }
}
