//! Webhook payload construction.
//!
//! The string returned by [`PayloadBuilder::build`] is the canonical payload:
//! it is stored on the job, signed and sent without ever being re-serialized.
//! Object keys are emitted in sorted order and the envelope `id`/`timestamp`
//! come from the event itself, so building the same event twice yields
//! byte-identical output.

mod projectors;

pub use projectors::{EntityProjector, FieldMapping, ProjectorRegistry, StructuralProjector};

use std::sync::Arc;

use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::WebhookResult;
use crate::event::{DomainEvent, EventKind};
use crate::models::WebhookSubscription;

/// Envelope schema version.
pub const PAYLOAD_VERSION: &str = "1";

/// Versioned webhook envelope as sent on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    id: Uuid,
    timestamp: String,
    version: &'static str,
    tenant_id: Uuid,
    event: String,
    data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<Map<String, Value>>,
}

/// Renders domain events into signed-ready JSON text.
#[derive(Clone, Default)]
pub struct PayloadBuilder {
    registry: Arc<ProjectorRegistry>,
}

impl PayloadBuilder {
    #[must_use]
    pub fn new(registry: ProjectorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Build the payload for one subscription.
    ///
    /// `customFields` is added to `data` only when the subscription opted in.
    /// Updated events carry a top-level `changes` object holding the exposed
    /// fields only, under their external names.
    pub fn build(
        &self,
        event: &DomainEvent,
        subscription: &WebhookSubscription,
        tenant_id: Uuid,
    ) -> WebhookResult<String> {
        let snapshot = &event.snapshot;
        let projector = self.registry.resolve(&snapshot.entity_name);

        let mut data = projector.project(snapshot);
        // Mappings emit missing fields as null; the id must never be.
        if data.get("id").map_or(true, Value::is_null) {
            data.insert("id".to_string(), Value::String(snapshot.entity_id.clone()));
        }

        if subscription.include_custom_fields {
            let custom: Map<String, Value> = snapshot
                .custom_fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            data.insert("customFields".to_string(), Value::Object(custom));
        }

        let changes = (event.kind == EventKind::Updated).then(|| {
            event
                .changes
                .iter()
                .filter_map(|(field, change)| {
                    projector.external_name(snapshot, field).map(|external| {
                        (external, json!({ "old": change.old, "new": change.new }))
                    })
                })
                .collect::<Map<String, Value>>()
        });

        let envelope = Envelope {
            id: event.event_id,
            timestamp: event
                .occurred_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            version: PAYLOAD_VERSION,
            tenant_id,
            event: event.event_type(),
            data,
            changes,
        };

        Ok(serde_json::to_string(&envelope)?)
    }
}
