//! Entity projectors: how an entity snapshot becomes the `data` object of a payload.
//!
//! Known entity types get an explicit allowlist ([`FieldMapping`]) so the external
//! contract does not move when the internal schema does. Everything else falls
//! back to [`StructuralProjector`], which exposes plain scalar fields only.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::event::{EntitySnapshot, FieldKind};

/// Renders an entity snapshot into its external representation.
pub trait EntityProjector: Send + Sync {
    /// External field map for the snapshot.
    fn project(&self, snapshot: &EntitySnapshot) -> Map<String, Value>;

    /// External name of an internal field, or `None` if the field is not exposed.
    fn external_name(&self, snapshot: &EntitySnapshot, field: &str) -> Option<String>;
}

/// Allowlist projector: `(external name, internal field)` pairs.
///
/// Mapped fields missing from the snapshot are emitted as `null`, so the
/// shape of the payload never depends on which fields were loaded.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    fields: Vec<(String, String)>,
}

impl FieldMapping {
    pub fn new<I, E, N>(fields: I) -> Self
    where
        I: IntoIterator<Item = (E, N)>,
        E: Into<String>,
        N: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(external, internal)| (external.into(), internal.into()))
                .collect(),
        }
    }
}

impl EntityProjector for FieldMapping {
    fn project(&self, snapshot: &EntitySnapshot) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(external, internal)| {
                let value = snapshot.get(internal).cloned().unwrap_or(Value::Null);
                (external.clone(), value)
            })
            .collect()
    }

    fn external_name(&self, _snapshot: &EntitySnapshot, field: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|(_, internal)| internal == field)
            .map(|(external, _)| external.clone())
    }
}

/// Fallback projector: every scalar field under its own name.
///
/// Navigation and search-index fields are never emitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralProjector;

impl EntityProjector for StructuralProjector {
    fn project(&self, snapshot: &EntitySnapshot) -> Map<String, Value> {
        snapshot
            .fields_of_kind(FieldKind::Scalar)
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn external_name(&self, snapshot: &EntitySnapshot, field: &str) -> Option<String> {
        snapshot
            .fields
            .get(field)
            .filter(|f| f.kind == FieldKind::Scalar)
            .map(|_| field.to_string())
    }
}

/// Entity type name to projector, with a structural fallback.
#[derive(Clone)]
pub struct ProjectorRegistry {
    projectors: HashMap<String, Arc<dyn EntityProjector>>,
    fallback: Arc<dyn EntityProjector>,
}

impl Default for ProjectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProjectorRegistry {
    /// Registry with no explicit mappings; every type uses the structural projector.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            projectors: HashMap::new(),
            fallback: Arc::new(StructuralProjector),
        }
    }

    /// Registry with the built-in CRM mappings (Contact, Company, Deal, Lead).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::empty()
            .register("Contact", contact_mapping())
            .register("Company", company_mapping())
            .register("Deal", deal_mapping())
            .register("Lead", lead_mapping())
    }

    /// Register (or replace) the projector for an entity type.
    #[must_use]
    pub fn register(
        mut self,
        entity_name: impl Into<String>,
        projector: impl EntityProjector + 'static,
    ) -> Self {
        self.projectors
            .insert(entity_name.into(), Arc::new(projector));
        self
    }

    /// Whether an entity type has an explicit projector.
    #[must_use]
    pub fn has_mapping(&self, entity_name: &str) -> bool {
        self.projectors.contains_key(entity_name)
    }

    /// Projector for an entity type.
    #[must_use]
    pub fn resolve(&self, entity_name: &str) -> &dyn EntityProjector {
        self.projectors
            .get(entity_name)
            .map_or(self.fallback.as_ref(), |p| p.as_ref())
    }
}

fn contact_mapping() -> FieldMapping {
    FieldMapping::new([
        ("id", "id"),
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("email", "email"),
        ("phone", "phone"),
        ("jobTitle", "job_title"),
        ("companyId", "company_id"),
        ("ownerId", "owner_id"),
        ("createdAt", "created_at"),
        ("updatedAt", "updated_at"),
    ])
}

fn company_mapping() -> FieldMapping {
    FieldMapping::new([
        ("id", "id"),
        ("name", "name"),
        ("domain", "domain"),
        ("industry", "industry"),
        ("phone", "phone"),
        ("website", "website"),
        ("ownerId", "owner_id"),
        ("createdAt", "created_at"),
        ("updatedAt", "updated_at"),
    ])
}

fn deal_mapping() -> FieldMapping {
    FieldMapping::new([
        ("id", "id"),
        ("title", "title"),
        ("value", "value"),
        ("currency", "currency"),
        ("stage", "stage"),
        ("probability", "probability"),
        ("expectedCloseDate", "expected_close_date"),
        ("companyId", "company_id"),
        ("contactId", "contact_id"),
        ("ownerId", "owner_id"),
        ("createdAt", "created_at"),
        ("updatedAt", "updated_at"),
    ])
}

fn lead_mapping() -> FieldMapping {
    FieldMapping::new([
        ("id", "id"),
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("email", "email"),
        ("companyName", "company_name"),
        ("source", "source"),
        ("status", "status"),
        ("score", "score"),
        ("ownerId", "owner_id"),
        ("createdAt", "created_at"),
        ("updatedAt", "updated_at"),
    ])
}
