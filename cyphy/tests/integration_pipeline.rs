//! End-to-end pipeline: decode an update batch, reconcile it into a fresh
//! design, compile, and write both artifacts to disk.

use std::fs;
use std::sync::Arc;

use cyphy::model::SimSettings;
use cyphy::protocol::Update;
use cyphy::service::DesignService;
use cyphy::store::{MemStore, Store};

fn rotor_update() -> Update {
    serde_json::from_str(
        r#"{"elements": [
            {"oid": {"name": "Rotor", "sys": "", "design": ""},
             "type": "Model",
             "element": {"name": "Rotor",
                         "equations": "w' = tau - H*w^2\ntheta' = w",
                         "params": "H,"}},
            {"oid": {"name": "rtr", "sys": "root", "design": "chinook"},
             "type": "Phyo",
             "element": {"name": "rtr", "sys": "root", "design": "chinook",
                         "position": {"x": 0, "y": 0, "z": 0},
                         "model": "Rotor", "args": "H=2.5", "init": ""}},
            {"oid": {"name": "sax0", "sys": "root", "design": "chinook"},
             "type": "Sax",
             "element": {"name": "sax0", "sys": "root", "design": "chinook",
                         "position": {"x": 0, "y": 0, "z": 0},
                         "sense": "w(30)", "actuate": "tau(10,0.4)"}},
            {"oid": {"name": "pl0", "sys": "root", "design": "chinook"},
             "type": "Plink",
             "element": {"name": "pl0", "sys": "root", "design": "chinook",
                         "endpoints": [
                            {"name": "rtr", "sys": "root", "design": "chinook"},
                            {"name": "sax0", "sys": "root", "design": "chinook"}],
                         "bindings": ["w,tau", "w,tau"]}},
            {"oid": {"name": "", "sys": "", "design": ""},
             "type": "SimSettings",
             "element": {"begin": 0, "end": 20, "maxStep": 0.01}}
        ]}"#,
    )
    .unwrap()
}

#[test]
fn update_reconcile_compile_write() {
    let store = Arc::new(MemStore::new());
    store.add_design("chinook", "murphy");

    let svc = DesignService::load(store.clone(), "chinook", "murphy").unwrap();
    let report = svc.apply_update(rotor_update());
    assert_eq!(report.applied, 5);
    assert_eq!(report.skipped, 0);

    // The store mirrors what the service holds.
    let mirrored = store.read_design("chinook", "murphy").unwrap();
    assert_eq!(mirrored.elements.len(), 3);
    let key = store.read_design_key("chinook", "murphy").unwrap();
    assert_eq!(
        store.read_sim_settings(key).unwrap(),
        SimSettings { begin: 0.0, end: 20.0, max_step: 0.01 }
    );

    let outcome = svc.compile();
    assert!(!outcome.diagnostics.fatal(), "diagnostics: {:?}", outcome.diagnostics);
    let artifacts = outcome.artifacts.expect("artifacts");

    assert_eq!(
        artifacts.sim_source,
        "Object Rotor(H)\n\
         \x20 w' = tau - H*w^2\n\
         \x20 theta' = w\n\
         \n\
         Simulation chinook\n\
         \x20 Rotor rtr(H:2.5)\n\
         \x20 Sensor sax0_S_w(Rate:30, Destination:localhost)\n\
         \x20 Actuator sax0_A_tau(Min:-10, Max:10, DMin:-0.4, DMax:0.4)\n\
         \n\
         \x20 rtr.w ~ sax0_S_w.y\n\
         \x20 rtr.tau ~ sax0_A_tau.u\n"
    );

    // Write both artifacts to per-user, per-design scoped paths.
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("murphy").join("chinook");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("sim.src"), &artifacts.sim_source).unwrap();
    let topo_json = serde_json::to_string_pretty(&artifacts.topology).unwrap();
    fs::write(dir.join("topology.json"), &topo_json).unwrap();

    assert_eq!(fs::read_to_string(dir.join("sim.src")).unwrap(), artifacts.sim_source);
    assert!(fs::read_to_string(dir.join("topology.json"))
        .unwrap()
        .contains("\"simnet\""));
}

#[test]
fn reloading_from_the_store_reproduces_the_compile() {
    let store = Arc::new(MemStore::new());
    store.add_design("chinook", "murphy");

    let svc = DesignService::load(store.clone(), "chinook", "murphy").unwrap();
    svc.apply_update(rotor_update());
    let first = svc.compile().artifacts.expect("artifacts");

    // A second service instance built purely from the mirror.
    let reloaded = DesignService::load(store, "chinook", "murphy").unwrap();
    let second = reloaded.compile().artifacts.expect("artifacts");

    assert_eq!(first.sim_source, second.sim_source);
    assert_eq!(first.topology, second.topology);
}
