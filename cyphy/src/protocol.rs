//! Update/delete wire messages.
//!
//! A batch entry carries the element's prior identity, a declared type tag,
//! and the raw JSON payload; the tag selects which element variant to decode
//! the payload into. Decoding is per item: one bad entry never poisons the
//! rest of the batch.

use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::model::{
    Actuator, Computer, Element, Id, Link, Model, Phyo, Plink, Router, Sax, Sensor, SimSettings,
    Switch,
};

/// One proposed element state.
#[derive(Debug, Deserialize)]
pub struct ElementUpdate {
    /// Prior identity: the graph key this state replaces (equal to the new
    /// identity unless the element was renamed).
    pub oid: Id,
    #[serde(rename = "type")]
    pub kind: String,
    pub element: Box<RawValue>,
}

/// An unordered batch of proposed element states.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub elements: Vec<ElementUpdate>,
}

/// A batch of elements to remove. Entries are full payloads, not bare ids:
/// link deletion needs the endpoints to free their interfaces.
#[derive(Debug, Deserialize)]
pub struct Delete {
    pub elements: Vec<ElementUpdate>,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown element type '{0}'")]
    UnknownType(String),
    #[error("unable to decode {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded batch entry, routed by what it targets: the graph, the user's
/// model namespace, or the design's run settings.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Element(Element),
    Model(Model),
    SimSettings(SimSettings),
}

fn payload<T: for<'de> Deserialize<'de>>(u: &ElementUpdate) -> Result<T, ProtocolError> {
    serde_json::from_str(u.element.get()).map_err(|source| ProtocolError::Payload {
        kind: u.kind.clone(),
        source,
    })
}

/// Decode one entry according to its declared type.
pub fn decode(u: &ElementUpdate) -> Result<Decoded, ProtocolError> {
    let decoded = match u.kind.as_str() {
        "Computer" => Decoded::Element(Element::Computer(payload::<Computer>(u)?)),
        "Switch" => Decoded::Element(Element::Switch(payload::<Switch>(u)?)),
        "Router" => Decoded::Element(Element::Router(payload::<Router>(u)?)),
        "Link" => Decoded::Element(Element::Link(payload::<Link>(u)?)),
        "Phyo" => Decoded::Element(Element::Phyo(payload::<Phyo>(u)?)),
        "Plink" => Decoded::Element(Element::Plink(payload::<Plink>(u)?)),
        "Sensor" => Decoded::Element(Element::Sensor(payload::<Sensor>(u)?)),
        "Actuator" => Decoded::Element(Element::Actuator(payload::<Actuator>(u)?)),
        "Sax" => Decoded::Element(Element::Sax(payload::<Sax>(u)?)),
        "Model" => Decoded::Model(payload::<Model>(u)?),
        "SimSettings" => Decoded::SimSettings(payload::<SimSettings>(u)?),
        other => return Err(ProtocolError::UnknownType(other.to_string())),
    };
    Ok(decoded)
}
