//! # Schema Registry
//!
//! Per-kind descriptions of reference fields: name, cardinality, whether the
//! reference is mandatory, and which kinds it may point at. Also records
//! which kinds carry an alternate key and which are immutable reference data.
//!
//! The engine never inspects entity types at runtime. Everything it knows
//! about the shape of an entity comes from a [`Schema`] value that is built
//! once and shared behind an `Arc`.

use crate::types::{Kind, LoshError};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// FIELD DESCRIPTORS
// =============================================================================

/// Whether a reference field holds one target or an ordered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Description of one reference field of a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name as it appears in serialized trees.
    pub name: &'static str,
    pub cardinality: Cardinality,
    /// The store refuses the owner unless every target already exists.
    pub mandatory: bool,
    /// Kinds the field may reference. More than one for union fields.
    pub targets: &'static [Kind],
}

impl FieldSpec {
    /// Whether `kind` is an acceptable target of this field.
    #[must_use]
    pub fn accepts(&self, kind: Kind) -> bool {
        self.targets.contains(&kind)
    }
}

/// Description of one kind: its alternate key and reference fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KindSchema {
    /// Name of the alternate key attribute, if the kind has one.
    pub alt_key: Option<&'static str>,
    /// Pre-seeded reference data the engine must never write.
    pub immutable: bool,
    /// Reference fields in declaration order.
    pub fields: Vec<FieldSpec>,
}

static EMPTY_KIND: KindSchema = KindSchema {
    alt_key: None,
    immutable: false,
    fields: Vec::new(),
};

impl KindSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the alternate key attribute.
    #[must_use]
    pub fn alt_key(mut self, name: &'static str) -> Self {
        self.alt_key = Some(name);
        self
    }

    /// Mark the kind as immutable reference data.
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Add a single-valued reference field.
    #[must_use]
    pub fn one(self, name: &'static str, targets: &'static [Kind]) -> Self {
        self.field(name, Cardinality::One, targets)
    }

    /// Add a list-valued reference field.
    #[must_use]
    pub fn many(self, name: &'static str, targets: &'static [Kind]) -> Self {
        self.field(name, Cardinality::Many, targets)
    }

    /// Mark the most recently added field as mandatory.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.mandatory = true;
        }
        self
    }

    fn field(mut self, name: &'static str, cardinality: Cardinality, targets: &'static [Kind]) -> Self {
        self.fields.push(FieldSpec {
            name,
            cardinality,
            mandatory: false,
            targets,
        });
        self
    }

    /// Position of a field in declaration order.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// The registry of kind descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    kinds: BTreeMap<Kind, KindSchema>,
}

/// Incremental construction of a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    kinds: BTreeMap<Kind, KindSchema>,
}

impl SchemaBuilder {
    /// Register (or replace) the description of a kind.
    #[must_use]
    pub fn kind(mut self, kind: Kind, schema: KindSchema) -> Self {
        self.kinds.insert(kind, schema);
        self
    }

    /// Finish without validation.
    #[must_use]
    pub fn finish(self) -> Schema {
        Schema { kinds: self.kinds }
    }

    /// Finish and validate.
    pub fn build(self) -> Result<Schema, LoshError> {
        let schema = self.finish();
        schema.validate()?;
        Ok(schema)
    }
}

impl Schema {
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Description of a kind. Unregistered kinds have no fields and no
    /// alternate key.
    #[must_use]
    pub fn kind(&self, kind: Kind) -> &KindSchema {
        self.kinds.get(&kind).unwrap_or(&EMPTY_KIND)
    }

    /// Whether the kind is registered.
    #[must_use]
    pub fn contains(&self, kind: Kind) -> bool {
        self.kinds.contains_key(&kind)
    }

    /// Registered kinds in order.
    pub fn kinds(&self) -> impl Iterator<Item = Kind> + '_ {
        self.kinds.keys().copied()
    }

    /// Look up a reference field of a kind.
    #[must_use]
    pub fn field(&self, kind: Kind, name: &str) -> Option<&FieldSpec> {
        self.kind(kind).field_spec(name)
    }

    /// Position of a reference field of a kind.
    #[must_use]
    pub fn field_index(&self, kind: Kind, name: &str) -> Option<usize> {
        self.kind(kind).field_index(name)
    }

    /// Check the schema for internal consistency.
    ///
    /// Every target kind must be registered, field names must be unique per
    /// kind, and mandatory references must not form a cycle between kinds.
    pub fn validate(&self) -> Result<(), LoshError> {
        for (kind, ks) in &self.kinds {
            let mut seen = BTreeSet::new();
            for field in &ks.fields {
                if !seen.insert(field.name) {
                    return Err(LoshError::Schema(format!(
                        "{kind}.{} is declared twice",
                        field.name
                    )));
                }
                if field.targets.is_empty() {
                    return Err(LoshError::Schema(format!(
                        "{kind}.{} has no target kinds",
                        field.name
                    )));
                }
                if let Some(missing) = field.targets.iter().find(|t| !self.contains(**t)) {
                    return Err(LoshError::Schema(format!(
                        "{kind}.{} targets unregistered kind {missing}",
                        field.name
                    )));
                }
            }
        }
        self.check_mandatory_cycles()
    }

    fn check_mandatory_cycles(&self) -> Result<(), LoshError> {
        // 0 = unvisited, 1 = on the current path, 2 = done
        let mut state: BTreeMap<Kind, u8> = BTreeMap::new();
        for start in self.kinds.keys().copied() {
            if state.get(&start).copied().unwrap_or(0) != 0 {
                continue;
            }
            // Explicit stack of (kind, next mandatory target index).
            let mut path: Vec<(Kind, usize)> = vec![(start, 0)];
            state.insert(start, 1);
            while let Some(top) = path.last_mut() {
                let (kind, cursor) = *top;
                let targets = self.mandatory_targets(kind);
                if let Some(&next) = targets.get(cursor) {
                    top.1 += 1;
                    match state.get(&next).copied().unwrap_or(0) {
                        0 => {
                            state.insert(next, 1);
                            path.push((next, 0));
                        }
                        1 => {
                            let mut names: Vec<String> = path
                                .iter()
                                .skip_while(|(k, _)| *k != next)
                                .map(|(k, _)| k.to_string())
                                .collect();
                            names.push(next.to_string());
                            return Err(LoshError::Schema(format!(
                                "mandatory reference cycle: {}",
                                names.join(" -> ")
                            )));
                        }
                        _ => {}
                    }
                } else {
                    state.insert(kind, 2);
                    path.pop();
                }
            }
        }
        Ok(())
    }

    fn mandatory_targets(&self, kind: Kind) -> Vec<Kind> {
        self.kind(kind)
            .fields
            .iter()
            .filter(|f| f.mandatory)
            .flat_map(|f| f.targets.iter().copied())
            .collect()
    }

    /// The open-hardware catalog schema.
    #[must_use]
    pub fn catalog() -> Schema {
        use Kind::*;

        const OWNER: &[Kind] = &[User, Group];

        let with_host = || {
            KindSchema::new()
                .alt_key("xid")
                .one("host", &[Host])
                .mandatory()
                .one("avatar", &[File])
                .many("memberOf", &[Group])
                .many("products", &[Product])
        };

        Schema::builder()
            .kind(
                Product,
                KindSchema::new()
                    .alt_key("xid")
                    .one("dataSource", &[Repository])
                    .mandatory()
                    .one("license", &[License])
                    .mandatory()
                    .one("licensor", OWNER)
                    .mandatory()
                    .one("release", &[Component])
                    .mandatory()
                    .many("releases", &[Component])
                    .mandatory()
                    .one("renamedTo", &[Product])
                    .one("renamedFrom", &[Product])
                    .one("forkOf", &[Product])
                    .many("forks", &[Product])
                    .many("tags", &[Tag])
                    .one("category", &[Category]),
            )
            .kind(
                Component,
                KindSchema::new()
                    .alt_key("xid")
                    .one("dataSource", &[Repository])
                    .mandatory()
                    .many("releases", &[Component])
                    .one("repository", &[Repository])
                    .mandatory()
                    .one("license", &[License])
                    .many("additionalLicenses", &[License])
                    .one("licensor", OWNER)
                    .mandatory()
                    .one("compliesWith", &[TechnicalStandard])
                    .one("tsdc", &[Tsdc])
                    .many("components", &[Component])
                    .many("software", &[Software])
                    .one("image", &[File])
                    .one("readme", &[File])
                    .one("contributionGuide", &[File])
                    .one("bom", &[File])
                    .one("manufacturingInstructions", &[File])
                    .one("userManual", &[File])
                    .one("product", &[Product])
                    .many("usedIn", &[Component])
                    .one("source", &[File])
                    .many("export", &[File])
                    .many("auxiliary", &[File])
                    .one("organization", &[Group])
                    .one("outerDimensions", &[BoundingBoxDimensions, OpenScadDimensions])
                    .one("material", &[Material])
                    .one("manufacturingProcess", &[ManufacturingProcess])
                    .many("productionMetadata", &[KeyValue]),
            )
            .kind(
                Repository,
                KindSchema::new()
                    .alt_key("xid")
                    .one("host", &[Host])
                    .mandatory()
                    .one("owner", OWNER),
            )
            .kind(
                File,
                KindSchema::new()
                    .alt_key("xid")
                    .one("dataSource", &[Repository])
                    .mandatory(),
            )
            .kind(Host, KindSchema::new().alt_key("domain"))
            .kind(
                Tag,
                KindSchema::new()
                    .alt_key("name")
                    .many("aliases", &[Tag])
                    .many("related", &[Tag]),
            )
            .kind(
                Category,
                KindSchema::new()
                    .alt_key("xid")
                    .one("parent", &[Category])
                    .many("children", &[Category])
                    .many("products", &[Product]),
            )
            .kind(
                Software,
                KindSchema::new()
                    .one("dataSource", &[Repository])
                    .mandatory()
                    .one("installationGuide", &[File])
                    .one("license", &[License]),
            )
            .kind(
                TechnicalStandard,
                KindSchema::new().alt_key("xid").many("components", &[Component]),
            )
            .kind(
                Tsdc,
                KindSchema::new().alt_key("xid").many("components", &[Component]),
            )
            .kind(
                KeyValue,
                KindSchema::new().one("value", &[StringV, FloatV]).mandatory(),
            )
            .kind(StringV, KindSchema::new())
            .kind(FloatV, KindSchema::new())
            .kind(Material, KindSchema::new())
            .kind(ManufacturingProcess, KindSchema::new())
            .kind(BoundingBoxDimensions, KindSchema::new())
            .kind(OpenScadDimensions, KindSchema::new())
            .kind(User, with_host())
            .kind(Group, with_host().many("members", OWNER))
            .kind(License, KindSchema::new().alt_key("xid").immutable())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_consistent() {
        let schema = Schema::catalog();
        schema.validate().expect("catalog schema validates");
        for kind in Kind::ALL {
            assert!(schema.contains(kind), "{kind} registered");
        }
    }

    #[test]
    fn catalog_field_lookup() {
        let schema = Schema::catalog();
        let licensor = schema.field(Kind::Product, "licensor").expect("field");
        assert!(licensor.mandatory);
        assert_eq!(licensor.cardinality, Cardinality::One);
        assert!(licensor.accepts(Kind::User));
        assert!(licensor.accepts(Kind::Group));
        assert!(!licensor.accepts(Kind::Host));

        let forks = schema.field(Kind::Product, "forks").expect("field");
        assert!(!forks.mandatory);
        assert_eq!(forks.cardinality, Cardinality::Many);

        assert!(schema.field(Kind::Product, "nope").is_none());
        assert_eq!(schema.kind(Kind::Host).alt_key, Some("domain"));
        assert!(schema.kind(Kind::License).immutable);
        assert_eq!(schema.kind(Kind::KeyValue).alt_key, None);
    }

    #[test]
    fn mandatory_cycle_is_rejected() {
        let result = Schema::builder()
            .kind(Kind::Product, KindSchema::new().one("release", &[Kind::Component]).mandatory())
            .kind(Kind::Component, KindSchema::new().one("product", &[Kind::Product]).mandatory())
            .build();
        match result {
            Err(LoshError::Schema(msg)) => assert!(msg.contains("cycle"), "{msg}"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn optional_cycle_is_allowed() {
        Schema::builder()
            .kind(Kind::Product, KindSchema::new().one("release", &[Kind::Component]).mandatory())
            .kind(Kind::Component, KindSchema::new().one("product", &[Kind::Product]))
            .build()
            .expect("optional back-reference is fine");
    }

    #[test]
    fn unregistered_target_is_rejected() {
        let result = Schema::builder()
            .kind(Kind::File, KindSchema::new().one("dataSource", &[Kind::Repository]))
            .build();
        assert!(matches!(result, Err(LoshError::Schema(_))));
    }

    #[test]
    fn unregistered_kind_has_no_fields() {
        let schema = Schema::builder().finish();
        assert!(schema.kind(Kind::Product).fields.is_empty());
        assert!(!schema.contains(Kind::Product));
    }
}
