//! The cyber-physical design graph.
//!
//! A design is a named collection of elements — computers, switches, routers
//! and links on the cyber side; physical objects and physical links on the
//! physical side; sense/actuate adapters bridging the two. Every element is
//! keyed by a composite [`Id`] and the whole collection lives in a
//! [`BTreeMap`], so every pass over the graph iterates in `Id` order. Both
//! compilers depend on that: generated output must be a pure function of the
//! design's content, never of insertion order.
//!
//! Elements are created, replaced and removed only through
//! [`crate::reconcile`]; models are owned per user and keyed by name, not
//! graph-resident.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Composite element identifier: a name scoped by a subsystem and a design.
///
/// Equality is structural, and the `Ord` impl (name, then sys, then design)
/// is what defines the deterministic iteration order of a [`Design`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id {
    pub name: String,
    pub sys: String,
    pub design: String,
}

impl Id {
    pub fn new(name: &str, sys: &str, design: &str) -> Self {
        Id {
            name: name.to_string(),
            sys: sys.to_string(),
            design: design.to_string(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.name, self.sys, self.design)
    }
}

/// 3D canvas position. Carried through reconciliation for the front end;
/// the compilers never look at it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

// ---------------------------------------------------------------------------
// Cyber elements
// ---------------------------------------------------------------------------

/// A `(capacity, latency)` pair describing a network medium or interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketConductor {
    pub capacity: u32,
    pub latency: u32,
}

/// A named network interface on a host-like element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(flatten)]
    pub conductor: PacketConductor,
}

/// Base shared by every addressable network host: Computer, Router, Sax.
///
/// Interfaces are keyed by name; a link endpoint names the host's `Id` plus
/// one of these interface names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetHost {
    #[serde(flatten)]
    pub id: Id,
    #[serde(default)]
    pub interfaces: BTreeMap<String, Interface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computer {
    #[serde(flatten)]
    pub host: NetHost,
    pub position: Position,
    pub os: String,
    pub start_script: String,
}

/// A switch is a shared medium, not an addressed host: it carries one packet
/// conductor for the whole fabric and has no per-port interfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    #[serde(flatten)]
    pub id: Id,
    #[serde(flatten)]
    pub conductor: PacketConductor,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Router {
    #[serde(flatten)]
    pub host: NetHost,
    #[serde(flatten)]
    pub conductor: PacketConductor,
    pub position: Position,
}

/// One end of a cyber link: an element plus the interface name on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetIfRef {
    #[serde(flatten)]
    pub id: Id,
    pub ifname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(flatten)]
    pub id: Id,
    #[serde(flatten)]
    pub conductor: PacketConductor,
    #[serde(default)]
    pub path: Vec<Position>,
    pub endpoints: [NetIfRef; 2],
}

// ---------------------------------------------------------------------------
// Physical elements
// ---------------------------------------------------------------------------

/// An equation model, owned per user and referenced from physical objects by
/// name. Not graph-resident: models live outside any single design.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub equations: String,
    pub params: String,
    #[serde(default)]
    pub icon: String,
}

/// A physical object: an instance of a [`Model`] with argument and initial
/// value bindings, both kept as raw comma-separated `name=value` text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phyo {
    #[serde(flatten)]
    pub id: Id,
    pub position: Position,
    pub model: String,
    pub args: String,
    #[serde(default)]
    pub init: String,
}

/// A physical link: a positional correspondence between two comma-separated
/// binding lists, one per endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plink {
    #[serde(flatten)]
    pub id: Id,
    pub endpoints: [Id; 2],
    pub bindings: [String; 2],
}

// ---------------------------------------------------------------------------
// Cyber-physical elements
// ---------------------------------------------------------------------------

/// What a standalone sensor or actuator is pointed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(flatten)]
    pub id: Id,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    #[serde(flatten)]
    pub id: Id,
    pub position: Position,
    pub target: Target,
    pub rate: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actuator {
    #[serde(flatten)]
    pub id: Id,
    pub position: Position,
    pub target: Target,
    pub static_limit: Bound,
    pub dynamic_limit: Bound,
}

/// A sense/actuate adapter: a network host whose sensed and actuated
/// variables are declared as `;`-separated tokens — `name(rate)` in `sense`,
/// `name(staticLimit,dynamicLimit)` in `actuate`. See [`crate::expr`] for the
/// token grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sax {
    #[serde(flatten)]
    pub host: NetHost,
    pub position: Position,
    pub sense: String,
    pub actuate: String,
}

// ---------------------------------------------------------------------------
// The element set
// ---------------------------------------------------------------------------

/// Closed set of graph-resident element variants.
///
/// Every pass over the graph matches exhaustively on this enum, so adding a
/// variant is a compile-time-checked change in the reconciler, the checker
/// and both compilers.
///
/// Serialized adjacently tagged as `{"type": ..., "object": ...}` — the shape
/// the front end exchanges designs in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object")]
pub enum Element {
    Computer(Computer),
    Switch(Switch),
    Router(Router),
    Link(Link),
    Phyo(Phyo),
    Plink(Plink),
    Sensor(Sensor),
    Actuator(Actuator),
    Sax(Sax),
}

impl Element {
    /// The element's own identity. The only capability the graph requires.
    pub fn id(&self) -> &Id {
        match self {
            Element::Computer(c) => &c.host.id,
            Element::Switch(s) => &s.id,
            Element::Router(r) => &r.host.id,
            Element::Link(l) => &l.id,
            Element::Phyo(p) => &p.id,
            Element::Plink(p) => &p.id,
            Element::Sensor(s) => &s.id,
            Element::Actuator(a) => &a.id,
            Element::Sax(s) => &s.host.id,
        }
    }

    /// Links are reconciled after everything they can reference.
    pub fn is_link(&self) -> bool {
        matches!(self, Element::Link(_) | Element::Plink(_))
    }

    /// Short variant name for logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Computer(_) => "Computer",
            Element::Switch(_) => "Switch",
            Element::Router(_) => "Router",
            Element::Link(_) => "Link",
            Element::Phyo(_) => "Phyo",
            Element::Plink(_) => "Plink",
            Element::Sensor(_) => "Sensor",
            Element::Actuator(_) => "Actuator",
            Element::Sax(_) => "Sax",
        }
    }
}

// ---------------------------------------------------------------------------
// Design
// ---------------------------------------------------------------------------

/// The in-memory design graph: one experiment design and all its elements.
///
/// Invariant: every key equals its element's own reported identity, except
/// transiently inside a reconciliation batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Design {
    pub name: String,
    pub elements: BTreeMap<Id, Element>,
}

impl Design {
    pub fn new(name: &str) -> Self {
        Design {
            name: name.to_string(),
            elements: BTreeMap::new(),
        }
    }

    /// All routers, in `Id` order. Downstream provisioning fans out over
    /// these independently.
    pub fn routers(&self) -> Vec<&Router> {
        self.elements
            .values()
            .filter_map(|e| match e {
                Element::Router(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

/// Per-design simulation run settings. Updated directly through the update
/// protocol, never graph-resident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimSettings {
    pub begin: f64,
    pub end: f64,
    #[serde(rename = "maxStep")]
    pub max_step: f64,
}

/// A complete serialized view of one design: graph, models and settings.
/// This is what the read endpoint returns and what the CLI consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignView {
    pub name: String,
    pub elements: Vec<Element>,
    pub models: Vec<Model>,
    #[serde(rename = "simSettings")]
    pub sim_settings: SimSettings,
}

impl DesignView {
    /// Rebuild the in-memory graph and model map from a serialized view.
    pub fn into_parts(self) -> (Design, BTreeMap<String, Model>, SimSettings) {
        let mut design = Design::new(&self.name);
        for e in self.elements {
            design.elements.insert(e.id().clone(), e);
        }
        let models = self.models.into_iter().map(|m| (m.name.clone(), m)).collect();
        (design, models, self.sim_settings)
    }
}
