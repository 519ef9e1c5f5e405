//! Domain-change events as observed on the mutation path.
//!
//! A [`DomainEvent`] is plain owned data: the entity state is copied into an
//! [`EntitySnapshot`] when the mutation is observed, so nothing here borrows
//! from the persistence context that produced it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of mutation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Created" => Some(Self::Created),
            "Updated" => Some(Self::Updated),
            "Deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a snapshot field relates to the entity's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain value stored on the entity row.
    Scalar,
    /// Reference to (or collection of) related entities.
    Navigation,
    /// Derived full-text search data.
    SearchIndex,
}

/// One captured field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotField {
    pub kind: FieldKind,
    pub value: Value,
}

/// Immutable copy of an entity's state at the moment of mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_name: String,
    pub entity_id: String,
    pub fields: BTreeMap<String, SnapshotField>,
    pub custom_fields: BTreeMap<String, Value>,
}

impl EntitySnapshot {
    pub fn new(entity_name: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_id: entity_id.into(),
            fields: BTreeMap::new(),
            custom_fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn scalar(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(name, FieldKind::Scalar, value)
    }

    #[must_use]
    pub fn navigation(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(name, FieldKind::Navigation, value)
    }

    #[must_use]
    pub fn search_index(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(name, FieldKind::SearchIndex, value)
    }

    #[must_use]
    pub fn custom_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom_fields.insert(name.into(), value.into());
        self
    }

    fn field(mut self, name: impl Into<String>, kind: FieldKind, value: impl Into<Value>) -> Self {
        self.fields.insert(
            name.into(),
            SnapshotField {
                kind,
                value: value.into(),
            },
        );
        self
    }

    /// Value of a field, if captured.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|f| &f.value)
    }

    /// Captured fields of a given kind, in name order.
    pub fn fields_of_kind(&self, kind: FieldKind) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter(move |(_, f)| f.kind == kind)
            .map(|(name, f)| (name.as_str(), &f.value))
    }
}

/// Before/after values of one changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// A materialized domain-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Stable identity of this occurrence; becomes the payload `id`.
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
    pub snapshot: EntitySnapshot,
    /// Changed fields, only populated for `Updated` events.
    pub changes: BTreeMap<String, FieldChange>,
}

impl DomainEvent {
    pub fn created(snapshot: EntitySnapshot) -> Self {
        Self::new(EventKind::Created, snapshot, BTreeMap::new())
    }

    pub fn updated(snapshot: EntitySnapshot, changes: BTreeMap<String, FieldChange>) -> Self {
        Self::new(EventKind::Updated, snapshot, changes)
    }

    pub fn deleted(snapshot: EntitySnapshot) -> Self {
        Self::new(EventKind::Deleted, snapshot, BTreeMap::new())
    }

    fn new(kind: EventKind, snapshot: EntitySnapshot, changes: BTreeMap<String, FieldChange>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            kind,
            snapshot,
            changes,
        }
    }

    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.snapshot.entity_name
    }

    /// Subscription key, e.g. `Contact.Created`.
    #[must_use]
    pub fn event_key(&self) -> String {
        format!("{}.{}", self.snapshot.entity_name, self.kind)
    }

    /// Payload event name, e.g. `contact.created`.
    #[must_use]
    pub fn event_type(&self) -> String {
        self.event_key().to_lowercase()
    }
}
