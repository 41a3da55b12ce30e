use std::fs;
use std::path::Path;
use std::process;

use cyphy::compiler::{generate_sim_source, generate_topology};
use cyphy::sema;

use super::{load_view, print_diagnostics};

pub fn run(design_path: &Path, user: &str, out_root: &Path) {
    let (design, models, _) = load_view(design_path).into_parts();

    let mut ds = sema::check(&design);
    if ds.fatal() {
        print_diagnostics(&ds);
        process::exit(1);
    }

    let (sim_source, sim_ds) = generate_sim_source(&design, &models);
    ds.merge(sim_ds);

    let topology = match generate_topology(&design) {
        Ok(t) => t,
        Err(e) => {
            ds.error(e.to_string());
            print_diagnostics(&ds);
            process::exit(1);
        }
    };

    print_diagnostics(&ds);
    if ds.fatal() {
        process::exit(1);
    }

    // Artifacts are scoped per user, per design.
    let dir = out_root.join(user).join(&design.name);
    fs::create_dir_all(&dir).unwrap_or_else(|e| {
        eprintln!("Error creating {}: {e}", dir.display());
        process::exit(1);
    });

    let sim_path = dir.join("sim.src");
    fs::write(&sim_path, &sim_source).unwrap_or_else(|e| {
        eprintln!("Error writing {}: {e}", sim_path.display());
        process::exit(1);
    });

    let topo_path = dir.join("topology.json");
    let topo_json = serde_json::to_string_pretty(&topology).unwrap_or_else(|e| {
        eprintln!("Error serializing topology: {e}");
        process::exit(1);
    });
    fs::write(&topo_path, topo_json).unwrap_or_else(|e| {
        eprintln!("Error writing {}: {e}", topo_path.display());
        process::exit(1);
    });

    eprintln!("Wrote {}", sim_path.display());
    eprintln!("Wrote {}", topo_path.display());
}
