use std::collections::BTreeMap;

use chrono::Utc;
use klutch_core::{
    objects::{AutoscalerObject, ConfigMapObject},
    patch::{AutoscalerPatch, PatchOperation},
};
use serde_json::Value;
use snafu::{OptionExt, Snafu};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::ClusterClient;

const MIN_REPLICAS_PATH: &str = "/spec/minReplicas";
const ANNOTATION_PATH_PREFIX: &str = "/metadata/annotations/";

/// In-memory stand-in for a real cluster, applying both patch flavors to its stored
/// objects so tests observe the same compensating-action semantics the engine relies on.
#[derive(Default)]
pub struct InMemoryCluster {
    config_maps: RwLock<Vec<ConfigMapObject>>,
    autoscalers: RwLock<Vec<AutoscalerObject>>,
}

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("ConfigMap {name:?} in namespace {namespace:?} not found"))]
    ConfigMapNotFound { name: String, namespace: String },

    #[snafu(display("ConfigMap {name:?} in namespace {namespace:?} already exists"))]
    ConfigMapAlreadyExists { name: String, namespace: String },

    #[snafu(display("HorizontalPodAutoscaler {name:?} in namespace {namespace:?} not found"))]
    AutoscalerNotFound { name: String, namespace: String },

    #[snafu(display("Patch path {path:?} is not supported by the in-memory cluster"))]
    UnsupportedPatchPath { path: String },

    #[snafu(display("Patch value for {path:?} has the wrong type"))]
    InvalidPatchValue { path: String },

    #[snafu(display("Patch tried to remove {path:?}, which is not present"))]
    RemovedPathNotPresent { path: String },
}

impl InMemoryCluster {
    pub fn new() -> Self {
        info!("Using in-memory cluster client");

        Self::default()
    }

    pub async fn add_config_map(&self, config_map: ConfigMapObject) {
        self.config_maps.write().await.push(config_map);
    }

    pub async fn add_autoscaler(&self, autoscaler: AutoscalerObject) {
        self.autoscalers.write().await.push(autoscaler);
    }

    pub async fn autoscaler(&self, name: &str, namespace: &str) -> Option<AutoscalerObject> {
        self.autoscalers
            .read()
            .await
            .iter()
            .find(|hpa| hpa.name == name && hpa.namespace == namespace)
            .cloned()
    }

    pub async fn config_maps(&self) -> Vec<ConfigMapObject> {
        self.config_maps.read().await.clone()
    }

    async fn list_labeled_config_maps(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Vec<ConfigMapObject> {
        let mut config_maps: Vec<ConfigMapObject> = self
            .config_maps
            .read()
            .await
            .iter()
            .filter(|cm| {
                cm.namespace == namespace
                    && cm.labels.get(label_key).map(String::as_str) == Some(label_value)
            })
            .cloned()
            .collect();
        config_maps.sort_by_key(|cm| std::cmp::Reverse(cm.creation_timestamp));

        config_maps
    }

    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let mut config_maps = self.config_maps.write().await;
        let index = config_maps
            .iter()
            .position(|cm| cm.name == name && cm.namespace == namespace)
            .context(ConfigMapNotFoundSnafu { name, namespace })?;
        config_maps.remove(index);

        Ok(())
    }
}

impl ClusterClient for InMemoryCluster {
    #[instrument(skip(self))]
    async fn list_trigger_markers(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<ConfigMapObject>, super::Error> {
        Ok(self
            .list_labeled_config_maps(namespace, label_key, label_value)
            .await)
    }

    #[instrument(skip(self))]
    async fn delete_trigger_marker(&self, name: &str, namespace: &str) -> Result<(), super::Error> {
        Ok(self.delete_config_map(name, namespace).await?)
    }

    #[instrument(skip(self))]
    async fn list_status_objects(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<ConfigMapObject>, super::Error> {
        Ok(self
            .list_labeled_config_maps(namespace, label_key, label_value)
            .await)
    }

    #[instrument(skip(self, labels, data))]
    async fn create_status_object(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigMapObject, super::Error> {
        let mut config_maps = self.config_maps.write().await;

        if config_maps
            .iter()
            .any(|cm| cm.name == name && cm.namespace == namespace)
        {
            ConfigMapAlreadyExistsSnafu { name, namespace }.fail()?;
        }

        let config_map = ConfigMapObject {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            labels,
            data,
            creation_timestamp: Utc::now(),
        };
        config_maps.push(config_map.clone());

        Ok(config_map)
    }

    #[instrument(skip(self))]
    async fn delete_status_object(&self, name: &str, namespace: &str) -> Result<(), super::Error> {
        Ok(self.delete_config_map(name, namespace).await?)
    }

    #[instrument(skip(self))]
    async fn list_autoscalers(&self) -> Result<Vec<AutoscalerObject>, super::Error> {
        // Insertion order, which is the stable order the engine persists
        Ok(self.autoscalers.read().await.clone())
    }

    #[instrument(skip(self))]
    async fn read_autoscaler(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<AutoscalerObject, super::Error> {
        Ok(self
            .autoscaler(name, namespace)
            .await
            .context(AutoscalerNotFoundSnafu { name, namespace })?)
    }

    #[instrument(skip(self, patch))]
    async fn patch_autoscaler(
        &self,
        name: &str,
        namespace: &str,
        patch: AutoscalerPatch,
    ) -> Result<(), super::Error> {
        let mut autoscalers = self.autoscalers.write().await;
        let hpa = autoscalers
            .iter_mut()
            .find(|hpa| hpa.name == name && hpa.namespace == namespace)
            .context(AutoscalerNotFoundSnafu { name, namespace })?;

        match patch {
            AutoscalerPatch::Merge(value) => apply_merge_patch(hpa, &value)?,
            AutoscalerPatch::Json(operations) => {
                for operation in &operations {
                    apply_operation(hpa, operation)?;
                }
            }
        }

        Ok(())
    }
}

fn apply_merge_patch(hpa: &mut AutoscalerObject, value: &Value) -> Result<(), Error> {
    if let Some(min_replicas) = value.pointer(MIN_REPLICAS_PATH) {
        hpa.min_replicas = min_replicas.as_i64().context(InvalidPatchValueSnafu {
            path: MIN_REPLICAS_PATH,
        })? as i32;
    }

    if let Some(annotations) = value
        .pointer("/metadata/annotations")
        .and_then(Value::as_object)
    {
        for (key, value) in annotations {
            match value {
                // A null in a merge-patch deletes the entry
                Value::Null => {
                    hpa.annotations.remove(key);
                }
                value => {
                    let value = value.as_str().context(InvalidPatchValueSnafu {
                        path: format!("/metadata/annotations/{key}"),
                    })?;
                    hpa.annotations.insert(key.clone(), value.to_owned());
                }
            }
        }
    }

    Ok(())
}

fn apply_operation(hpa: &mut AutoscalerObject, operation: &PatchOperation) -> Result<(), Error> {
    match operation {
        PatchOperation::Add { path, value } | PatchOperation::Replace { path, value } => {
            if path == MIN_REPLICAS_PATH {
                hpa.min_replicas = value
                    .as_i64()
                    .context(InvalidPatchValueSnafu { path })? as i32;
            } else if let Some(annotation) = path.strip_prefix(ANNOTATION_PATH_PREFIX) {
                let value = value.as_str().context(InvalidPatchValueSnafu { path })?;
                hpa.annotations
                    .insert(unescape_pointer_segment(annotation), value.to_owned());
            } else {
                UnsupportedPatchPathSnafu { path }.fail()?;
            }
        }
        PatchOperation::Remove { path } => {
            let annotation = path
                .strip_prefix(ANNOTATION_PATH_PREFIX)
                .context(UnsupportedPatchPathSnafu { path })?;
            hpa.annotations
                .remove(&unescape_pointer_segment(annotation))
                .context(RemovedPathNotPresentSnafu { path })?;
        }
    }

    Ok(())
}

fn unescape_pointer_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}
