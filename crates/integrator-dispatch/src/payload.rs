//! Payload normalization for the known destination object types.
//!
//! The queue stores opaque bodies; before delivery each body is decoded
//! according to the request's `object_type` tag and re-encoded canonically.
//! The tag is an explicit enum over the known shapes with a generic fallback,
//! so adding a shape is a compile-time-checked change rather than a string
//! comparison scattered through the worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DispatchError, Result};

/// Known payload shapes, parsed from the request's `object_type` field.
///
/// Unrecognized tags fall back to [`ObjectKind::Generic`], preserving the
/// queue's blind-proxy behavior for shapes it does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Aggregate data value set.
    DataValues,
    /// Bulk flat data value list.
    BulkDataValues,
    /// Tracked entity instances.
    TrackedEntities,
    /// Program events.
    Events,
    /// Program enrollments.
    Enrollments,
    /// Anything else; decoded as arbitrary JSON.
    Generic,
}

impl ObjectKind {
    /// Maps an `object_type` tag onto a kind.
    pub fn parse(object_type: &str) -> Self {
        match object_type {
            "DATA_VALUES" => Self::DataValues,
            "BULK_DATA_VALUES" => Self::BulkDataValues,
            "TRACKED_ENTITIES" => Self::TrackedEntities,
            "EVENTS" => Self::Events,
            "ENROLLMENTS" => Self::Enrollments,
            _ => Self::Generic,
        }
    }
}

/// A decoded request body, tagged by shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Aggregate data value set.
    DataValues(DataValuesPayload),
    /// Bulk flat data value list.
    BulkDataValues(BulkDataValuesPayload),
    /// Tracked entity instances.
    TrackedEntities(TrackedEntitiesPayload),
    /// Program events.
    Events(EventsPayload),
    /// Program enrollments.
    Enrollments(EnrollmentsPayload),
    /// Arbitrary JSON.
    Generic(Value),
}

impl Payload {
    /// Decodes a body according to its declared kind.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Payload`] when the body is not valid JSON
    /// for the declared shape.
    pub fn decode(kind: ObjectKind, body: &str) -> Result<Self> {
        let payload = match kind {
            ObjectKind::DataValues => Self::DataValues(
                serde_json::from_str(body).map_err(|e| DispatchError::payload(e.to_string()))?,
            ),
            ObjectKind::BulkDataValues => Self::BulkDataValues(
                serde_json::from_str(body).map_err(|e| DispatchError::payload(e.to_string()))?,
            ),
            ObjectKind::TrackedEntities => Self::TrackedEntities(
                serde_json::from_str(body).map_err(|e| DispatchError::payload(e.to_string()))?,
            ),
            ObjectKind::Events => Self::Events(
                serde_json::from_str(body).map_err(|e| DispatchError::payload(e.to_string()))?,
            ),
            ObjectKind::Enrollments => Self::Enrollments(
                serde_json::from_str(body).map_err(|e| DispatchError::payload(e.to_string()))?,
            ),
            ObjectKind::Generic => Self::Generic(
                serde_json::from_str(body).map_err(|e| DispatchError::payload(e.to_string()))?,
            ),
        };
        Ok(payload)
    }

    /// Re-encodes the payload canonically for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Payload`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DispatchError::payload(e.to_string()))
    }
}

/// A single data value inside an aggregate set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    /// Data element identifier.
    pub data_element: String,
    /// Category option combination, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_option_combo: Option<String>,
    /// Reported value. Source systems send both strings and numbers.
    pub value: Value,
}

/// Aggregate data value set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValuesPayload {
    /// Data set identifier.
    #[serde(default)]
    pub data_set: String,
    /// Completion date.
    #[serde(default)]
    pub completed: String,
    /// Reporting period.
    #[serde(default)]
    pub period: String,
    /// Reporting organisation unit.
    #[serde(default)]
    pub org_unit: String,
    /// Attribute option combination, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_option_combo: Option<String>,
    /// The data values.
    #[serde(default)]
    pub data_values: Vec<DataValue>,
}

/// One entry of a bulk data value list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDataValue {
    /// Data element identifier.
    pub data_element: String,
    /// Reporting period.
    #[serde(default)]
    pub period: String,
    /// Reporting organisation unit.
    #[serde(default)]
    pub org_unit: String,
    /// Reported value.
    pub value: Value,
}

/// Bulk flat data value list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDataValuesPayload {
    /// The data values.
    #[serde(default)]
    pub data_values: Vec<BulkDataValue>,
}

/// Tracked entity instances wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntitiesPayload {
    /// The tracked entity instances, kept as raw JSON.
    #[serde(default)]
    pub tracked_entity_instances: Vec<Value>,
}

/// Program events wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsPayload {
    /// The events, kept as raw JSON.
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Program enrollments wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentsPayload {
    /// The enrollments, kept as raw JSON.
    #[serde(default)]
    pub enrollments: Vec<Value>,
}

/// Import counts reported by a synchronous destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportCount {
    /// Records imported.
    pub imported: i64,
    /// Records updated.
    pub updated: i64,
    /// Records ignored.
    pub ignored: i64,
    /// Records deleted.
    pub deleted: i64,
}

/// Inner response object of an import summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportResponse {
    /// Response type tag.
    pub response_type: String,
    /// Import status: SUCCESS, WARNING, or ERROR.
    pub status: String,
    /// Import counts.
    pub import_count: ImportCount,
    /// Human-readable description.
    pub description: String,
    /// Conflicts reported by the destination.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Value>,
}

/// Structured import summary returned by synchronous destinations.
///
/// Every field defaults so a summary decodes from partial or empty
/// responses without erroring; the worker only logs what is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSummary {
    /// HTTP status text echoed by the destination.
    pub http_status: String,
    /// HTTP status code echoed by the destination.
    pub http_status_code: String,
    /// The structured response.
    pub response: ImportResponse,
    /// Top-level status, used by asynchronous acknowledgements.
    pub status: String,
    /// Top-level message.
    pub message: String,
}
