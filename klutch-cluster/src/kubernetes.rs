use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::{
    api::{autoscaling::v1::HorizontalPodAutoscaler, core::v1::ConfigMap},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use klutch_core::{
    objects::{AutoscalerObject, ConfigMapObject},
    patch::AutoscalerPatch,
};
use kube::{
    Api, Client,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
};
use snafu::{ResultExt, Snafu};
use tracing::{info, instrument};

use crate::ClusterClient;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("Failed to list ConfigMaps in namespace {namespace:?}"))]
    ListConfigMaps {
        source: kube::Error,
        namespace: String,
    },

    #[snafu(display("Failed to delete ConfigMap {name:?} in namespace {namespace:?}"))]
    DeleteConfigMap {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("Failed to create ConfigMap {name:?} in namespace {namespace:?}"))]
    CreateConfigMap {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("Failed to list HorizontalPodAutoscalers across all namespaces"))]
    ListAutoscalers { source: kube::Error },

    #[snafu(display(
        "Failed to read HorizontalPodAutoscaler {name:?} in namespace {namespace:?}"
    ))]
    ReadAutoscaler {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display(
        "Failed to patch HorizontalPodAutoscaler {name:?} in namespace {namespace:?}"
    ))]
    PatchAutoscaler {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("Failed to build JSON patch document"))]
    BuildJsonPatch { source: serde_json::Error },
}

pub struct KubernetesClusterClient {
    client: Client,
}

impl KubernetesClusterClient {
    /// Credentials are resolved the default way: the in-cluster service account first,
    /// then the kubeconfig `KUBECONFIG` points at.
    pub async fn new() -> Result<Self, Error> {
        let client = Client::try_default().await.context(CreateClientSnafu)?;
        info!("Created Kubernetes cluster client");

        Ok(Self { client })
    }

    async fn list_labeled_config_maps(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<ConfigMapObject>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{label_key}={label_value}"));

        let list = api
            .list(&params)
            .await
            .context(ListConfigMapsSnafu { namespace })?;

        let mut config_maps: Vec<ConfigMapObject> =
            list.items.into_iter().map(config_map_view).collect();
        config_maps.sort_by_key(|cm| std::cmp::Reverse(cm.creation_timestamp));

        Ok(config_maps)
    }

    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .context(DeleteConfigMapSnafu { name, namespace })?;

        Ok(())
    }
}

impl ClusterClient for KubernetesClusterClient {
    #[instrument(skip(self))]
    async fn list_trigger_markers(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<ConfigMapObject>, super::Error> {
        Ok(self
            .list_labeled_config_maps(namespace, label_key, label_value)
            .await?)
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
            .await?)
    }

    #[instrument(skip(self, labels, data))]
    async fn create_status_object(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigMapObject, super::Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..ConfigMap::default()
        };

        let created = api
            .create(&PostParams::default(), &config_map)
            .await
            .context(CreateConfigMapSnafu { name, namespace })?;

        Ok(config_map_view(created))
    }

    #[instrument(skip(self))]
    async fn delete_status_object(&self, name: &str, namespace: &str) -> Result<(), super::Error> {
        Ok(self.delete_config_map(name, namespace).await?)
    }

    #[instrument(skip(self))]
    async fn list_autoscalers(&self) -> Result<Vec<AutoscalerObject>, super::Error> {
        let api: Api<HorizontalPodAutoscaler> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context(ListAutoscalersSnafu)?;

        Ok(list.items.into_iter().map(autoscaler_view).collect())
    }

    #[instrument(skip(self))]
    async fn read_autoscaler(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<AutoscalerObject, super::Error> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let hpa = api
            .get(name)
            .await
            .context(ReadAutoscalerSnafu { name, namespace })?;

        Ok(autoscaler_view(hpa))
    }

    #[instrument(skip(self, patch))]
    async fn patch_autoscaler(
        &self,
        name: &str,
        namespace: &str,
        patch: AutoscalerPatch,
    ) -> Result<(), super::Error> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams::default();

        match patch {
            AutoscalerPatch::Merge(value) => {
                api.patch(name, &params, &Patch::Merge(&value))
                    .await
                    .context(PatchAutoscalerSnafu { name, namespace })?;
            }
            AutoscalerPatch::Json(operations) => {
                // [`json_patch::Patch`] deserializes from the RFC 6902 wire format the
                // operations serialize to.
                let document =
                    serde_json::to_value(&operations).context(BuildJsonPatchSnafu)?;
                let json_patch: json_patch::Patch =
                    serde_json::from_value(document).context(BuildJsonPatchSnafu)?;

                api.patch(name, &params, &Patch::Json::<()>(json_patch))
                    .await
                    .context(PatchAutoscalerSnafu { name, namespace })?;
            }
        }

        Ok(())
    }
}

fn config_map_view(config_map: ConfigMap) -> ConfigMapObject {
    ConfigMapObject {
        name: config_map.metadata.name.unwrap_or_default(),
        namespace: config_map.metadata.namespace.unwrap_or_default(),
        labels: config_map.metadata.labels.unwrap_or_default(),
        data: config_map.data.unwrap_or_default(),
        creation_timestamp: config_map
            .metadata
            .creation_timestamp
            .map(|time| time.0)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

fn autoscaler_view(hpa: HorizontalPodAutoscaler) -> AutoscalerObject {
    let spec = hpa.spec.unwrap_or_default();

    AutoscalerObject {
        name: hpa.metadata.name.unwrap_or_default(),
        namespace: hpa.metadata.namespace.unwrap_or_default(),
        annotations: hpa.metadata.annotations.unwrap_or_default(),
        // The Kubernetes API defaults minReplicas to 1 when unset
        min_replicas: spec.min_replicas.unwrap_or(1),
        max_replicas: spec.max_replicas,
        current_replicas: hpa
            .status
            .map(|status| status.current_replicas)
            .unwrap_or_default(),
    }
}
