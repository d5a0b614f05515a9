use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Narrow view of an autoscaler object, carrying exactly the fields the controller reads
/// and writes. The cluster adapter maps its native object type into this view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutoscalerObject {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub current_replicas: i32,
}

impl AutoscalerObject {
    /// String representation for logging purposes.
    pub fn repr(&self) -> String {
        format!(
            "HorizontalPodAutoscaler (namespace={}, name={})",
            self.namespace, self.name
        )
    }
}

/// Narrow view of a ConfigMap, used both for trigger markers and for the persisted
/// sequence status object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigMapObject {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
    pub creation_timestamp: DateTime<Utc>,
}
