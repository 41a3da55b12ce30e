//! Simulation source generation.
//!
//! Lowers the physical side of a design to textual simulation source: one
//! `Object` block per model, then one `Simulation` block instantiating every
//! physical object, expanding every Sax adapter into `Sensor`/`Actuator`
//! declarations, and wiring every plink binding pair with `~`.
//!
//! Input is assumed to have passed the semantic checker; anything malformed
//! that slips through is reported as an error diagnostic and skipped, never
//! a panic, and everything that did parse is still emitted.

use std::collections::BTreeMap;

use crate::expr;
use crate::model::{Design, Element, Model, Phyo, Plink, Sax};
use crate::sema::Diagnostics;

/// Generate simulation source for a design and the model set it references.
///
/// Deterministic: models in name order, elements in `Id` order, Sax
/// declarations in token order.
pub fn generate_sim_source(
    dsg: &Design,
    models: &BTreeMap<String, Model>,
) -> (String, Diagnostics) {
    let mut src = String::new();
    let mut ds = Diagnostics::new();

    for m in models.values() {
        src.push_str(&model_src(m));
    }

    src.push_str(&design_src(dsg, &mut ds));

    (src, ds)
}

fn model_src(m: &Model) -> String {
    let params = m.params.strip_suffix(',').unwrap_or(&m.params);
    let mut src = format!("Object {}({})\n", m.name, params);

    for line in m.equations.split('\n') {
        src.push_str("  ");
        src.push_str(line);
        src.push('\n');
    }

    src.push('\n');
    src
}

fn design_src(dsg: &Design, ds: &mut Diagnostics) -> String {
    let mut src = format!("Simulation {}\n", dsg.name);

    // Plinks are emitted last, after every instance they wire.
    let mut plinks: Vec<&Plink> = Vec::new();

    for e in dsg.elements.values() {
        match e {
            Element::Phyo(p) => src.push_str(&phyo_src(p)),
            Element::Sax(s) => src.push_str(&sax_src(s, ds)),
            Element::Plink(p) => plinks.push(p),
            Element::Computer(_)
            | Element::Switch(_)
            | Element::Router(_)
            | Element::Link(_)
            | Element::Sensor(_)
            | Element::Actuator(_) => {}
        }
    }

    src.push('\n');

    for p in plinks {
        src.push_str(&plink_src(p, dsg, ds));
    }

    src
}

/// `  <Model> <name>(<args>[,<inits>])` with `=` rewritten to `:` in args
/// and to `|` in inits.
fn phyo_src(p: &Phyo) -> String {
    let args = p.args.strip_suffix(',').unwrap_or(&p.args);
    let mut src = format!("  {} {}({}", p.model, p.id.name, args.replace('=', ":"));

    let init: String = p.init.chars().filter(|c| !c.is_whitespace()).collect();
    if !init.is_empty() {
        let init = init.strip_suffix(',').unwrap_or(&init);
        src.push(',');
        src.push_str(&init.replace('=', "|"));
    }

    src.push_str(")\n");
    src
}

fn sax_src(sax: &Sax, ds: &mut Diagnostics) -> String {
    let mut src = String::new();

    for token in expr::split_tokens(&sax.sense) {
        match expr::parse_sensor_token(&token) {
            Ok(t) => src.push_str(&format!(
                "  Sensor {}_S_{}(Rate:{}, Destination:localhost)\n",
                sax.host.id.name, t.name, t.rate_text
            )),
            Err(e) => ds.error(format!("sax [{}]: {}", sax.host.id, e)),
        }
    }

    for token in expr::split_tokens(&sax.actuate) {
        match expr::parse_actuator_token(&token) {
            Ok(t) => src.push_str(&format!(
                "  Actuator {}_A_{}(Min:-{}, Max:{}, DMin:-{}, DMax:{})\n",
                sax.host.id.name, t.name, t.static_text, t.static_text, t.dynamic_text, t.dynamic_text
            )),
            Err(e) => ds.error(format!("sax [{}]: {}", sax.host.id, e)),
        }
    }

    src
}

/// One `lhs ~ rhs` line per positional binding pair.
fn plink_src(plink: &Plink, dsg: &Design, ds: &mut Diagnostics) -> String {
    let a_vars = expr::split_bindings(&plink.bindings[0]);
    let b_vars = expr::split_bindings(&plink.bindings[1]);

    let (Some(ae), Some(be)) = (
        dsg.elements.get(&plink.endpoints[0]),
        dsg.elements.get(&plink.endpoints[1]),
    ) else {
        ds.error(format!(
            "[Plink][{}] references a non-existent endpoint, bindings not generated",
            plink.id
        ));
        return String::new();
    };

    if a_vars.len() != b_vars.len() {
        ds.error(format!(
            "[Plink][{}] binding lists have different lengths ({} vs {})",
            plink.id,
            a_vars.len(),
            b_vars.len()
        ));
    }

    let mut src = String::new();
    for (a, b) in a_vars.iter().zip(b_vars.iter()) {
        src.push_str("  ");
        src.push_str(&binding_ref(ae, a, ds));
        src.push_str(" ~ ");
        src.push_str(&binding_ref(be, b, ds));
        src.push('\n');
    }

    src
}

/// `<element>.<var>`, except Sax endpoints resolve to the generated sensor
/// (`_S_<var>.y`) or actuator (`_A_<var>.u`) instance.
fn binding_ref(e: &Element, var: &str, ds: &mut Diagnostics) -> String {
    match e {
        Element::Sax(s) => sax_binding_ref(s, var, ds),
        other => format!("{}.{}", other.id().name, var),
    }
}

fn sax_binding_ref(sax: &Sax, var: &str, ds: &mut Diagnostics) -> String {
    let (sensed, _) = expr::sensor_vars(&sax.sense);
    if sensed.contains_key(var) {
        return format!("{}_S_{}.y", sax.host.id.name, var);
    }

    let (actuated, _) = expr::actuator_vars(&sax.actuate);
    if actuated.contains_key(var) {
        return format!("{}_A_{}.u", sax.host.id.name, var);
    }

    ds.error(format!(
        "The binding [{}] does not exist in Sax [{}]",
        var, sax.host.id
    ));
    format!("{}_?_{}.?", sax.host.id.name, var)
}
