//! # Core Type Definitions
//!
//! Identity and value types shared by every layer of the engine:
//! - Store-assigned identifiers (`Uid`)
//! - The closed set of catalog entity kinds (`Kind`)
//! - Scalar attribute values (`Value`)
//! - Identity keys and the `Identity` accessor trait
//! - Error types (`LoshError`)
//!
//! ## Determinism Guarantees
//!
//! Every identifier implements `Ord` so it can key a `BTreeMap`/`BTreeSet`.
//! Nothing in the engine iterates a hash map.

use crate::save::SaveStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Opaque identifier assigned by the backing store on first write.
///
/// Rendered as lower-case hex with a `0x` prefix, the way the catalog
/// store prints them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub u64);

impl Uid {
    /// Get the raw identifier value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl FromStr for Uid {
    type Err = LoshError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        };
        parsed
            .map(Uid)
            .map_err(|e| LoshError::InvalidInput(format!("invalid uid {s:?}: {e}")))
    }
}

// =============================================================================
// ENTITY KINDS
// =============================================================================

/// The catalog's entity kinds.
///
/// Each kind has a fixed set of reference fields, described by
/// [`crate::schema::Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Product,
    Component,
    Repository,
    File,
    Host,
    Tag,
    Category,
    Software,
    TechnicalStandard,
    Tsdc,
    KeyValue,
    StringV,
    FloatV,
    Material,
    ManufacturingProcess,
    BoundingBoxDimensions,
    OpenScadDimensions,
    User,
    Group,
    License,
}

impl Kind {
    /// Every kind, in declaration order.
    pub const ALL: [Kind; 20] = [
        Kind::Product,
        Kind::Component,
        Kind::Repository,
        Kind::File,
        Kind::Host,
        Kind::Tag,
        Kind::Category,
        Kind::Software,
        Kind::TechnicalStandard,
        Kind::Tsdc,
        Kind::KeyValue,
        Kind::StringV,
        Kind::FloatV,
        Kind::Material,
        Kind::ManufacturingProcess,
        Kind::BoundingBoxDimensions,
        Kind::OpenScadDimensions,
        Kind::User,
        Kind::Group,
        Kind::License,
    ];

    /// The kind's name as it appears in serialized trees and store keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Product => "Product",
            Kind::Component => "Component",
            Kind::Repository => "Repository",
            Kind::File => "File",
            Kind::Host => "Host",
            Kind::Tag => "Tag",
            Kind::Category => "Category",
            Kind::Software => "Software",
            Kind::TechnicalStandard => "TechnicalStandard",
            Kind::Tsdc => "Tsdc",
            Kind::KeyValue => "KeyValue",
            Kind::StringV => "StringV",
            Kind::FloatV => "FloatV",
            Kind::Material => "Material",
            Kind::ManufacturingProcess => "ManufacturingProcess",
            Kind::BoundingBoxDimensions => "BoundingBoxDimensions",
            Kind::OpenScadDimensions => "OpenScadDimensions",
            Kind::User => "User",
            Kind::Group => "Group",
            Kind::License => "License",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = LoshError;

    /// Case-insensitive match on the kind name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LoshError::InvalidInput(format!("unknown kind {s:?}")))
    }
}

// =============================================================================
// VALUES
// =============================================================================

/// A scalar attribute value carried by an entity.
///
/// Serialized untagged so trees read as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Get the value as a string slice, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// A key under which an entity is recognised as "the same" entity.
///
/// A store identifier is global across kinds. An alternate key is only
/// unique within its kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentityKey {
    Uid(Uid),
    Alt(Kind, String),
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Uid(uid) => write!(f, "{uid}"),
            IdentityKey::Alt(kind, alt) => write!(f, "{kind}:{alt}"),
        }
    }
}

/// Read access to the identity of an entity, whatever its representation.
pub trait Identity {
    /// The entity kind.
    fn kind(&self) -> Kind;

    /// The store identifier, once persisted.
    fn id(&self) -> Option<Uid>;

    /// The alternate (natural) key, for kinds that carry one.
    fn alt_id(&self) -> Option<&str>;

    /// The preferred identity key: the store id, else the alternate key.
    fn identity_key(&self) -> Option<IdentityKey> {
        self.id()
            .map(IdentityKey::Uid)
            .or_else(|| self.alt_id().map(|a| IdentityKey::Alt(self.kind(), a.to_string())))
    }

    /// Every identity key the entity can be found under.
    fn identity_keys(&self) -> Vec<IdentityKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(uid) = self.id() {
            keys.push(IdentityKey::Uid(uid));
        }
        if let Some(alt) = self.alt_id() {
            keys.push(IdentityKey::Alt(self.kind(), alt.to_string()));
        }
        keys
    }

    /// Short human-readable description used in errors and logs.
    fn describe(&self) -> String {
        match (self.id(), self.alt_id()) {
            (Some(uid), Some(alt)) => format!("{} {uid} ({alt})", self.kind()),
            (Some(uid), None) => format!("{} {uid}", self.kind()),
            (None, Some(alt)) => format!("{} ({alt})", self.kind()),
            (None, None) => format!("{} (new)", self.kind()),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the engine.
///
/// Store failures are wrapped with the entity that was being looked up or
/// written. Use [`LoshError::is_retryable`] to tell temporary failures from
/// persistent ones.
#[derive(Debug, Error)]
pub enum LoshError {
    /// Looking up an entity by its alternate key failed.
    #[error("Identity lookup failed for {entity}: {source}")]
    Lookup {
        entity: String,
        #[source]
        source: Box<LoshError>,
    },

    /// Creating or updating an entity failed.
    #[error("Write failed for {entity} during {stage}: {source}")]
    Write {
        entity: String,
        stage: SaveStage,
        #[source]
        source: Box<LoshError>,
    },

    /// The cancellation token fired or its deadline passed.
    #[error("Operation cancelled")]
    Cancelled,

    /// A mandatory reference has no identity at write time.
    #[error("{entity} requires {field} to be persisted first")]
    MissingDependency { entity: String, field: &'static str },

    /// Mandatory references form a cycle, so no write order exists.
    #[error("Mandatory reference cycle through {entity}")]
    MandatoryCycle { entity: String },

    /// A field name is not a reference field of the kind.
    #[error("{kind} has no reference field named {field:?}")]
    UnknownField { kind: Kind, field: String },

    /// A reference points at a kind the field does not accept.
    #[error("{kind}.{field} cannot reference {target}")]
    TargetKindMismatch {
        kind: Kind,
        field: String,
        target: Kind,
    },

    /// A single-valued field was given a list, or the reverse.
    #[error("{kind}.{field} has the wrong cardinality")]
    CardinalityMismatch { kind: Kind, field: String },

    /// The same identity key names entities of two different kinds.
    #[error("Identity {key} names both {first} and {second}")]
    IdentityConflict {
        key: String,
        first: Kind,
        second: Kind,
    },

    /// Tree nesting exceeds the supported depth.
    #[error("Tree nesting exceeds {0} levels")]
    TooDeep(usize),

    /// The schema is inconsistent.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The store refused a write that would break referential integrity.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Caller-supplied input could not be parsed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O or storage engine error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl LoshError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Cancellation and I/O failures are temporary. Everything else
    /// reflects the data and will fail again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            LoshError::Cancelled | LoshError::IoError(_) => true,
            LoshError::Lookup { source, .. } | LoshError::Write { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_display_and_parse() {
        let uid = Uid(0x1f);
        assert_eq!(uid.to_string(), "0x1f");
        assert_eq!("0x1f".parse::<Uid>().expect("hex"), uid);
        assert_eq!("31".parse::<Uid>().expect("decimal"), uid);
        assert!("0xzz".parse::<Uid>().is_err());
    }

    #[test]
    fn kind_parse_is_case_insensitive() {
        assert_eq!("product".parse::<Kind>().expect("kind"), Kind::Product);
        assert_eq!(
            "TechnicalStandard".parse::<Kind>().expect("kind"),
            Kind::TechnicalStandard
        );
        assert!("Gadget".parse::<Kind>().is_err());
        for kind in Kind::ALL {
            assert_eq!(kind.as_str().parse::<Kind>().expect("round trip"), kind);
        }
    }

    #[test]
    fn value_json_is_untagged() {
        let values: Vec<Value> = serde_json::from_str(r#"[true, 3, 1.5, "x"]"#).expect("parse");
        assert_eq!(
            values,
            vec![
                Value::Bool(true),
                Value::Int(3),
                Value::Float(1.5),
                Value::Text("x".into())
            ]
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(LoshError::Cancelled.is_retryable());
        assert!(LoshError::IoError("disk".into()).is_retryable());
        let wrapped = LoshError::Write {
            entity: "Product (x)".into(),
            stage: SaveStage::FirstPass,
            source: Box::new(LoshError::IoError("timeout".into())),
        };
        assert!(wrapped.is_retryable());
        assert_eq!(
            wrapped.to_string(),
            "Write failed for Product (x) during first-pass: I/O error: timeout"
        );
        let persistent = LoshError::Write {
            entity: "Product (x)".into(),
            stage: SaveStage::SecondPass,
            source: Box::new(LoshError::Integrity("dangling".into())),
        };
        assert!(!persistent.is_retryable());
        assert!(
            !LoshError::MandatoryCycle {
                entity: "A".into()
            }
            .is_retryable()
        );
    }
}
