use std::path::Path;
use std::process;

use cyphy::sema;

use super::{load_view, print_diagnostics};

pub fn run(design_path: &Path) {
    let (design, _, _) = load_view(design_path).into_parts();

    let ds = sema::check(&design);
    print_diagnostics(&ds);
    if ds.fatal() {
        process::exit(1);
    }
}
