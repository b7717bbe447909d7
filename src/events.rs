//! Domain events carried in `MESSAGE` notifications.
//!
//! Payloads are UTF-8 JSON objects tagged by `type`:
//!
//! ```text
//! {"type":"run_started","parameters":["x"],"kpis":["y"]}
//! {"type":"progress","point":[0.5],"kpis":[1.25],"iteration":3}
//! ```

use crate::error::DeserializationError;
use serde::{Deserialize, Serialize};

/// A progress notification from the optimization process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new optimization run began.
    RunStarted {
        /// Names of the optimized parameters, in point order
        parameters: Vec<String>,
        /// Names of the KPIs, in value order
        kpis: Vec<String>,
    },

    /// The optimizer evaluated a point.
    Progress {
        /// Parameter values, ordered like `RunStarted::parameters`
        point: Vec<f64>,
        /// KPI values, ordered like `RunStarted::kpis`
        kpis: Vec<f64>,
        /// Evaluation counter, when the producer tracks one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<u64>,
    },
}

/// Decode a serialized payload into an [`Event`].
///
/// Pure and thread-safe. Fails on empty input, non-JSON input, an unknown
/// `type`, or missing fields. Unrecognised extra fields are ignored.
pub fn deserialize(payload: &[u8]) -> Result<Event, DeserializationError> {
    if payload.is_empty() {
        return Err(DeserializationError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

impl Event {
    /// Encode this event as a notification payload.
    pub fn to_payload(&self) -> Vec<u8> {
        // serde_json writes non-finite floats as null, so encoding cannot fail here
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RunStarted { .. } => "run_started",
            Event::Progress { .. } => "progress",
        }
    }
}
