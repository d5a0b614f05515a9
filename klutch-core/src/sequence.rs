use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::objects::ConfigMapObject;

/// Key of the entry in the status ConfigMap `data` holding the managed autoscaler list.
pub const STATUS_DATA_KEY: &str = "status";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Status object {name:?} has no {STATUS_DATA_KEY:?} entry in its data"))]
    StatusDataMissing { name: String },

    #[snafu(display("Failed to parse the status body of status object {name:?}"))]
    ParseStatusData {
        source: serde_json::Error,
        name: String,
    },

    #[snafu(display("Failed to serialize the managed autoscaler list"))]
    SerializeStatusData { source: serde_json::Error },
}

/// State recorded for one autoscaler while a scaling sequence is active. Stored as JSON
/// both in the autoscaler's status annotation and in the status ConfigMap, so the field
/// names are fixed wire format.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerStatusData {
    /// The value observed in `spec.minReplicas` before scaling up.
    pub original_min_replicas: i32,

    /// `status.currentReplicas` observed at scale-up time. Informational only.
    pub original_current_replicas: i32,

    /// The raised floor currently enforced.
    pub applied_min_replicas: i32,

    /// Unix seconds at which the raise was applied. Kept for logging, the durability
    /// anchor for expiry is [`SequenceState::started_at`].
    pub applied_at: i64,
}

/// One autoscaler tracked by an active sequence.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ManagedAutoscaler {
    pub name: String,
    pub namespace: String,
    pub status: AutoscalerStatusData,
}

impl ManagedAutoscaler {
    /// String representation for logging purposes.
    pub fn repr(&self) -> String {
        format!(
            "HorizontalPodAutoscaler (namespace={}, name={})",
            self.namespace, self.name
        )
    }
}

/// The full state of one active scaling sequence.
///
/// The persisted status object is the source of truth across restarts: a
/// `SequenceState` is reconstructable from that object alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceState {
    /// Unix seconds. Equals the creation timestamp of the persisted status object.
    pub started_at: i64,

    /// Every autoscaler the engine must reconcile and eventually revert, in the order
    /// they were scaled up.
    pub managed: Vec<ManagedAutoscaler>,
}

impl SequenceState {
    /// Reconstruct the sequence from a persisted status object.
    pub fn from_status_object(status_object: &ConfigMapObject) -> Result<Self, Error> {
        let body = status_object
            .data
            .get(STATUS_DATA_KEY)
            .context(StatusDataMissingSnafu {
                name: &status_object.name,
            })?;

        let managed = serde_json::from_str(body).context(ParseStatusDataSnafu {
            name: &status_object.name,
        })?;

        Ok(Self {
            started_at: status_object.creation_timestamp.timestamp(),
            managed,
        })
    }

    /// JSON body persisted under [`STATUS_DATA_KEY`] in the status object.
    pub fn status_body(&self) -> Result<String, Error> {
        serde_json::to_string(&self.managed).context(SerializeStatusDataSnafu)
    }

    pub fn is_expired(&self, duration_secs: u64, now: i64) -> bool {
        now > self.started_at + duration_secs as i64
    }
}
