//! Semantic checking for experiment designs.
//!
//! A read-only pass over the design graph that produces leveled diagnostics.
//! Compilation is gated on the result: a fatal diagnostic set means neither
//! compiler runs. Diagnostics accumulate — a single check call surfaces every
//! independent problem in the design, it never stops at the first error.
//!
//! # Checks
//!
//! - **Plink endpoints**: both endpoint ids must resolve to existing
//!   elements. A missing endpoint is fatal for that plink and skips its
//!   binding validation entirely (there is nothing to validate against).
//! - **Plink bindings**: every binding name on a Sax endpoint must be one of
//!   the adapter's declared sensed or actuated variables.
//! - **Sax declarations**: malformed tokens and non-numeric rates/limits in
//!   sense/actuate expressions.
//! - **Switch-to-switch links**: rejected. A switch is a substrate, not an
//!   addressable host, so a link between two switches has no lowering in the
//!   topology compiler.

use serde::{Deserialize, Serialize};

use crate::expr;
use crate::model::{Design, Element, Link, Plink, Sax};

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
    Success,
}

/// A single leveled finding about a design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
}

/// An accumulating diagnostic set. `fatal()` gates compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub elements: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn push(&mut self, level: Level, message: impl Into<String>) {
        self.elements.push(Diagnostic { level, message: message.into() });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Level::Error, message);
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.elements.extend(other.elements);
    }

    /// True iff any diagnostic is an error.
    pub fn fatal(&self) -> bool {
        self.elements.iter().any(|d| d.level == Level::Error)
    }

    /// Substitute the `$source` placeholder in every message. Lets shared
    /// checks report findings without knowing which element asked.
    pub fn apply_source(&mut self, source: &str) {
        for d in &mut self.elements {
            d.message = d.message.replace("$source", source);
        }
    }
}

// ---------------------------------------------------------------------------
// Checking
// ---------------------------------------------------------------------------

/// Check a whole design. Pure: the graph is never mutated.
pub fn check(dsg: &Design) -> Diagnostics {
    let mut ds = Diagnostics::new();

    ds.merge(check_links(dsg));
    ds.merge(check_plinks(dsg));

    if !ds.fatal() {
        ds.push(Level::Success, "Design check succeeded");
    }

    ds
}

fn check_links(dsg: &Design) -> Diagnostics {
    let mut ds = Diagnostics::new();

    for e in dsg.elements.values() {
        if let Element::Link(l) = e {
            ds.merge(check_link(l, dsg));
        }
    }

    ds
}

/// A link joining two switches has no defined lowering; flag it here so the
/// topology compiler can treat it as unreachable input.
fn check_link(l: &Link, dsg: &Design) -> Diagnostics {
    let mut ds = Diagnostics::new();

    let a = dsg.elements.get(&l.endpoints[0].id);
    let b = dsg.elements.get(&l.endpoints[1].id);

    if let (Some(Element::Switch(_)), Some(Element::Switch(_))) = (a, b) {
        ds.error(format!(
            "[Link][{}] joins two switches, which is not supported; \
             route switch fabrics through a router instead",
            l.id
        ));
    }

    ds
}

fn check_plinks(dsg: &Design) -> Diagnostics {
    let mut ds = Diagnostics::new();

    for e in dsg.elements.values() {
        if let Element::Plink(p) = e {
            ds.merge(check_plink(p, dsg));
        }
    }

    ds
}

fn check_plink(p: &Plink, dsg: &Design) -> Diagnostics {
    let mut ds = Diagnostics::new();

    let endpoints: Vec<Option<&Element>> = p
        .endpoints
        .iter()
        .map(|id| {
            let e = dsg.elements.get(id);
            if e.is_none() {
                ds.error(format!(
                    "[Plink][{}] references non-existent id [{}]",
                    p.id, id
                ));
            }
            e
        })
        .collect();

    // Without both endpoints there is nothing to bind against.
    if ds.fatal() {
        return ds;
    }

    for (side, endpoint) in endpoints.into_iter().enumerate() {
        // Presence was just established.
        let Some(endpoint) = endpoint else { continue };
        let mut eds = check_endpoint_bindings(&p.bindings[side], endpoint);
        eds.apply_source(&format!("[Plink][{}]", p.id));
        ds.merge(eds);
    }

    ds
}

fn check_endpoint_bindings(bindings: &str, endpoint: &Element) -> Diagnostics {
    let bs = expr::split_bindings(bindings);

    match endpoint {
        Element::Sax(s) => check_sax_bindings(&bs, s),
        // Non-Sax endpoints declare no variable set to validate against.
        Element::Computer(_)
        | Element::Switch(_)
        | Element::Router(_)
        | Element::Link(_)
        | Element::Phyo(_)
        | Element::Plink(_)
        | Element::Sensor(_)
        | Element::Actuator(_) => Diagnostics::new(),
    }
}

fn check_sax_bindings(bs: &[String], s: &Sax) -> Diagnostics {
    let mut ds = Diagnostics::new();

    let (sensed, errors) = expr::sensor_vars(&s.sense);
    for e in errors {
        ds.error(format!("$source sax [{}]: {}", s.host.id, e));
    }
    if ds.fatal() {
        return ds;
    }

    let (actuated, errors) = expr::actuator_vars(&s.actuate);
    for e in errors {
        ds.error(format!("$source sax [{}]: {}", s.host.id, e));
    }
    if ds.fatal() {
        return ds;
    }

    for b in bs {
        if !sensed.contains_key(b) && !actuated.contains_key(b) {
            ds.error(format!(
                "$source The binding [{}] does not exist in Sax [{}]",
                b, s.host.id
            ));
        }
    }

    ds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::collections::BTreeMap;

    fn sax(name: &str, sense: &str, actuate: &str) -> Sax {
        Sax {
            host: NetHost {
                id: Id::new(name, "root", "test"),
                interfaces: BTreeMap::new(),
            },
            position: Position::default(),
            sense: sense.to_string(),
            actuate: actuate.to_string(),
        }
    }

    fn phyo(name: &str, model: &str, args: &str) -> Phyo {
        Phyo {
            id: Id::new(name, "root", "test"),
            position: Position::default(),
            model: model.to_string(),
            args: args.to_string(),
            init: String::new(),
        }
    }

    fn plink(name: &str, a: &Id, b: &Id, ba: &str, bb: &str) -> Plink {
        Plink {
            id: Id::new(name, "root", "test"),
            endpoints: [a.clone(), b.clone()],
            bindings: [ba.to_string(), bb.to_string()],
        }
    }

    fn design(elements: Vec<Element>) -> Design {
        let mut d = Design::new("test");
        for e in elements {
            d.elements.insert(e.id().clone(), e);
        }
        d
    }

    #[test]
    fn valid_design_gets_success_diagnostic() {
        let p = phyo("rtr", "Rotor", "H=2.5");
        let s = sax("sax0", "w(30)", "tau(10,0.4)");
        let pl = plink("pl0", &p.id.clone(), &s.host.id.clone(), "w,tau", "w,tau");
        let d = design(vec![Element::Phyo(p), Element::Sax(s), Element::Plink(pl)]);

        let ds = check(&d);
        assert!(!ds.fatal());
        assert_eq!(ds.elements.last().unwrap().level, Level::Success);
    }

    #[test]
    fn dangling_endpoint_is_fatal_and_skips_bindings() {
        let s = sax("sax0", "w(30)", "tau(10,0.4)");
        let missing = Id::new("ghost", "root", "test");
        // Both bindings are bogus, but only the missing endpoint may report.
        let pl = plink("pl0", &missing, &s.host.id.clone(), "zzz", "qqq");
        let d = design(vec![Element::Sax(s), Element::Plink(pl)]);

        let ds = check(&d);
        assert!(ds.fatal());
        let errors: Vec<&Diagnostic> = ds
            .elements
            .iter()
            .filter(|d| d.level == Level::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("ghost"));
    }

    #[test]
    fn unmatched_binding_names_the_plink() {
        let p = phyo("rtr", "Rotor", "H=2.5");
        let s = sax("sax0", "w(30)", "tau(10,0.4)");
        let pl = plink("pl0", &p.id.clone(), &s.host.id.clone(), "w", "theta");
        let d = design(vec![Element::Phyo(p), Element::Sax(s), Element::Plink(pl)]);

        let ds = check(&d);
        assert!(ds.fatal());
        let msg = &ds.elements[0].message;
        assert!(msg.contains("[Plink][pl0.root.test]"), "got: {msg}");
        assert!(msg.contains("[theta]"));
    }

    #[test]
    fn independent_errors_all_surface() {
        let p = phyo("rtr", "Rotor", "H=2.5");
        let s = sax("sax0", "w(30)", "tau(10,0.4)");
        let missing = Id::new("ghost", "root", "test");
        let bad_ref = plink("pl0", &missing, &s.host.id.clone(), "w", "w");
        let bad_binding = plink("pl1", &p.id.clone(), &s.host.id.clone(), "w", "theta");
        let d = design(vec![
            Element::Phyo(p),
            Element::Sax(s),
            Element::Plink(bad_ref),
            Element::Plink(bad_binding),
        ]);

        let ds = check(&d);
        let errors = ds
            .elements
            .iter()
            .filter(|d| d.level == Level::Error)
            .count();
        assert_eq!(errors, 2);
    }

    #[test]
    fn invalid_rate_reports_but_membership_check_stops_there() {
        let s = sax("sax0", "w()", "");
        let pl = plink(
            "pl0",
            &Id::new("rtr", "root", "test"),
            &s.host.id.clone(),
            "w",
            "w",
        );
        let p = phyo("rtr", "Rotor", "H=2.5");
        let d = design(vec![Element::Phyo(p), Element::Sax(s), Element::Plink(pl)]);

        let ds = check(&d);
        assert!(ds.fatal());
        assert!(ds.elements[0].message.contains("sensor rate"));
    }

    #[test]
    fn switch_to_switch_link_is_rejected() {
        let sw = |name: &str| Switch {
            id: Id::new(name, "root", "test"),
            conductor: PacketConductor { capacity: 1000, latency: 0 },
            position: Position::default(),
        };
        let a = sw("swa");
        let b = sw("swb");
        let l = Link {
            id: Id::new("l0", "root", "test"),
            conductor: PacketConductor::default(),
            path: Vec::new(),
            endpoints: [
                NetIfRef { id: a.id.clone(), ifname: String::new() },
                NetIfRef { id: b.id.clone(), ifname: String::new() },
            ],
        };
        let d = design(vec![Element::Switch(a), Element::Switch(b), Element::Link(l)]);

        let ds = check(&d);
        assert!(ds.fatal());
        assert!(ds.elements[0].message.contains("two switches"));
    }
}
