//! Topology generation.
//!
//! Lowers the cyber side of a design to a provisionable topology tree:
//! compute elements (computers, routers, sax adapters) and substrates
//! (switch fabrics, point-to-point links, management network).
//!
//! Two passes. Pass 1 lowers each element in isolation, leaving every
//! interface's substrate unresolved. Pass 2 walks the links and resolves
//! substrates:
//!
//! - host ↔ host: a new point-to-point substrate named after the link, both
//!   interfaces bound to it.
//! - host ↔ switch: the host interface binds to the switch's existing
//!   substrate; no new substrate.
//! - switch ↔ switch: rejected — a switch is a substrate, and substrates
//!   cannot terminate a link.
//!
//! An interface belongs to exactly one compute element, so binding is a
//! local, non-conflicting write. The tree is not serialized here; the
//! testbed-facing XML dialect is the caller's concern.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::model::{Computer, Design, Element, Id, Link, NetHost, NetIfRef, Router, Sax, Switch};

/// Name of the always-present management network and its compute element.
const MGMT_SUBSTRATE: &str = "simnet";
const MGMT_ELEMENT: &str = "sim0";

const CONTAINER_TEMPLATE: (&str, &str) = ("containers:openvz_template", "ubuntu-14.04-x86_64");
const OSID: (&str, &str) = ("osid", "Ubuntu1404-64-STD");
const DEFAULT_OS: &str = "Ubuntu1404-64-STD";

#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("link '{link}' references element '{endpoint}' but no such element exists")]
    UnknownEndpoint { link: String, endpoint: Id },
    #[error("link '{link}' joins two switches, which is not supported")]
    SwitchToSwitch { link: String },
    #[error("link '{link}' references element '{endpoint}' which cannot terminate a link")]
    IllegalEndpoint { link: String, endpoint: Id },
    #[error("link '{link}' binds interface '{ifname}' which does not exist on '{host}'")]
    UnknownInterface { link: String, host: Id, ifname: String },
}

// ---------------------------------------------------------------------------
// Topology tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsSpec {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub attribute: String,
    pub value: String,
}

/// A host interface attached (or to be attached) to a substrate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub name: String,
    /// `None` until link resolution binds the interface.
    pub substrate: Option<String>,
    pub capacity: f64,
    pub latency: f64,
}

/// A provisionable host in the topology.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeElement {
    pub name: String,
    pub os: OsSpec,
    pub attributes: Vec<Attribute>,
    pub interfaces: Vec<Attachment>,
}

/// A shared or point-to-point network medium.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Substrate {
    pub name: String,
    pub capacity: f64,
    pub latency: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Topology {
    pub elements: Vec<ComputeElement>,
    pub substrates: Vec<Substrate>,
}

// ---------------------------------------------------------------------------
// Pass 1: per-element lowering
// ---------------------------------------------------------------------------

fn base_attributes(startup: &str) -> Vec<Attribute> {
    vec![
        Attribute {
            attribute: CONTAINER_TEMPLATE.0.to_string(),
            value: CONTAINER_TEMPLATE.1.to_string(),
        },
        Attribute { attribute: OSID.0.to_string(), value: OSID.1.to_string() },
        Attribute { attribute: "startup".to_string(), value: startup.to_string() },
    ]
}

fn host_attachments(host: &NetHost) -> Vec<Attachment> {
    host.interfaces
        .values()
        .map(|i| Attachment {
            name: i.name.clone(),
            substrate: None,
            capacity: f64::from(i.conductor.capacity),
            latency: f64::from(i.conductor.latency),
        })
        .collect()
}

fn computer_element(c: &Computer) -> ComputeElement {
    ComputeElement {
        name: c.host.id.name.clone(),
        os: OsSpec { name: c.os.clone(), version: String::new() },
        attributes: base_attributes(&c.start_script),
        interfaces: host_attachments(&c.host),
    }
}

fn router_element(r: &Router) -> ComputeElement {
    ComputeElement {
        name: r.host.id.name.clone(),
        os: OsSpec { name: "Ubuntu Click".to_string(), version: "Router".to_string() },
        attributes: base_attributes("router_init"),
        interfaces: host_attachments(&r.host),
    }
}

/// Sax adapters additionally get an `eth0` on the management network: that
/// is how sensor/actuator traffic reaches the simulation host.
fn sax_element(s: &Sax) -> ComputeElement {
    let mut interfaces = vec![Attachment {
        name: "eth0".to_string(),
        substrate: Some(MGMT_SUBSTRATE.to_string()),
        capacity: 1000.0,
        latency: 0.0,
    }];
    interfaces.extend(host_attachments(&s.host));

    ComputeElement {
        name: s.host.id.name.clone(),
        os: OsSpec { name: DEFAULT_OS.to_string(), version: String::new() },
        attributes: base_attributes("sax_init"),
        interfaces,
    }
}

fn switch_substrate(sw: &Switch) -> Substrate {
    Substrate {
        name: sw.id.name.clone(),
        capacity: f64::from(sw.conductor.capacity),
        latency: f64::from(sw.conductor.latency),
    }
}

/// Mandatory infrastructure: the simulation host and its network, appended
/// independent of design content.
fn management_element() -> ComputeElement {
    ComputeElement {
        name: MGMT_ELEMENT.to_string(),
        os: OsSpec { name: DEFAULT_OS.to_string(), version: String::new() },
        attributes: base_attributes("sim_init"),
        interfaces: vec![Attachment {
            name: "eth0".to_string(),
            substrate: Some(MGMT_SUBSTRATE.to_string()),
            capacity: 1000.0,
            latency: 0.0,
        }],
    }
}

fn management_substrate() -> Substrate {
    Substrate { name: MGMT_SUBSTRATE.to_string(), capacity: 10000.0, latency: 0.0 }
}

// ---------------------------------------------------------------------------
// Pass 2: link resolution
// ---------------------------------------------------------------------------

enum EndpointKind<'a> {
    /// Host-like: owns the named interface; index into `Topology::elements`.
    Host(usize),
    /// Switch-like: already lowered to a substrate with this name.
    Fabric(&'a str),
}

/// Generate the topology tree for a design.
///
/// Deterministic: elements and substrates appear in `Id` order (management
/// infrastructure after the design's own hosts and fabrics, point-to-point
/// substrates after that, in link `Id` order).
pub fn generate_topology(dsg: &Design) -> Result<Topology, TopologyError> {
    let mut topo = Topology::default();
    let mut host_index: BTreeMap<Id, usize> = BTreeMap::new();
    let mut fabric_names: BTreeMap<Id, String> = BTreeMap::new();
    let mut links: Vec<&Link> = Vec::new();

    for e in dsg.elements.values() {
        match e {
            Element::Computer(c) => {
                host_index.insert(c.host.id.clone(), topo.elements.len());
                topo.elements.push(computer_element(c));
            }
            Element::Router(r) => {
                host_index.insert(r.host.id.clone(), topo.elements.len());
                topo.elements.push(router_element(r));
            }
            Element::Sax(s) => {
                host_index.insert(s.host.id.clone(), topo.elements.len());
                topo.elements.push(sax_element(s));
            }
            Element::Switch(sw) => {
                fabric_names.insert(sw.id.clone(), sw.id.name.clone());
                topo.substrates.push(switch_substrate(sw));
            }
            Element::Link(l) => links.push(l),
            // Physical elements have no network footprint.
            Element::Phyo(_)
            | Element::Plink(_)
            | Element::Sensor(_)
            | Element::Actuator(_) => {}
        }
    }

    topo.elements.push(management_element());
    topo.substrates.push(management_substrate());

    for l in links {
        resolve_link(l, dsg, &mut topo, &host_index, &fabric_names)?;
    }

    Ok(topo)
}

fn endpoint_kind<'a>(
    link: &Link,
    ep: &NetIfRef,
    dsg: &Design,
    host_index: &BTreeMap<Id, usize>,
    fabric_names: &'a BTreeMap<Id, String>,
) -> Result<EndpointKind<'a>, TopologyError> {
    let unknown = || TopologyError::UnknownEndpoint {
        link: link.id.name.clone(),
        endpoint: ep.id.clone(),
    };
    let e = dsg.elements.get(&ep.id).ok_or_else(unknown)?;

    match e {
        Element::Computer(_) | Element::Router(_) | Element::Sax(_) => host_index
            .get(&ep.id)
            .copied()
            .map(EndpointKind::Host)
            .ok_or_else(unknown),
        Element::Switch(_) => fabric_names
            .get(&ep.id)
            .map(|n| EndpointKind::Fabric(n.as_str()))
            .ok_or_else(unknown),
        Element::Link(_)
        | Element::Phyo(_)
        | Element::Plink(_)
        | Element::Sensor(_)
        | Element::Actuator(_) => Err(TopologyError::IllegalEndpoint {
            link: link.id.name.clone(),
            endpoint: ep.id.clone(),
        }),
    }
}

fn resolve_link(
    link: &Link,
    dsg: &Design,
    topo: &mut Topology,
    host_index: &BTreeMap<Id, usize>,
    fabric_names: &BTreeMap<Id, String>,
) -> Result<(), TopologyError> {
    // Both endpoints resolved symmetrically before any binding happens.
    let a = endpoint_kind(link, &link.endpoints[0], dsg, host_index, fabric_names)?;
    let b = endpoint_kind(link, &link.endpoints[1], dsg, host_index, fabric_names)?;

    match (a, b) {
        (EndpointKind::Host(ia), EndpointKind::Host(ib)) => {
            bind(topo, ia, &link.endpoints[0], &link.id.name, link)?;
            bind(topo, ib, &link.endpoints[1], &link.id.name, link)?;
            topo.substrates.push(Substrate {
                name: link.id.name.clone(),
                capacity: f64::from(link.conductor.capacity),
                latency: f64::from(link.conductor.latency),
            });
        }
        (EndpointKind::Host(ia), EndpointKind::Fabric(ss)) => {
            bind(topo, ia, &link.endpoints[0], ss, link)?;
        }
        (EndpointKind::Fabric(ss), EndpointKind::Host(ib)) => {
            bind(topo, ib, &link.endpoints[1], ss, link)?;
        }
        (EndpointKind::Fabric(_), EndpointKind::Fabric(_)) => {
            return Err(TopologyError::SwitchToSwitch { link: link.id.name.clone() });
        }
    }

    Ok(())
}

/// Bind one named interface of a compute element to a substrate.
fn bind(
    topo: &mut Topology,
    element_idx: usize,
    ep: &NetIfRef,
    substrate: &str,
    link: &Link,
) -> Result<(), TopologyError> {
    let element = &mut topo.elements[element_idx];
    let attachment = element
        .interfaces
        .iter_mut()
        .find(|a| a.name == ep.ifname)
        .ok_or_else(|| TopologyError::UnknownInterface {
            link: link.id.name.clone(),
            host: ep.id.clone(),
            ifname: ep.ifname.clone(),
        })?;
    attachment.substrate = Some(substrate.to_string());
    Ok(())
}
