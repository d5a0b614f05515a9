use std::collections::BTreeMap;

use enum_dispatch::enum_dispatch;
use klutch_core::{
    objects::{AutoscalerObject, ConfigMapObject},
    patch::AutoscalerPatch,
};
use snafu::Snafu;

pub mod in_memory;
pub mod kubernetes;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Kubernetes cluster error"), context(false))]
    KubernetesError { source: kubernetes::Error },

    #[snafu(display("In-memory cluster error"), context(false))]
    InMemoryError { source: in_memory::Error },
}

/// Narrow contract over the cluster object store, covering exactly the operations the
/// scaling engine and the trigger sources need. All operations may fail with a transport
/// error, which is propagated unchanged.
///
/// Listings of labeled ConfigMaps are ordered by creation timestamp, newest first.
/// [`ClusterClient::list_autoscalers`] returns a stable order, which the engine relies on
/// when persisting the managed autoscaler list.
#[enum_dispatch(ClusterClientImplementation)]
// According to https://blog.rust-lang.org/2023/12/21/async-fn-rpit-in-traits.html
#[trait_variant::make(SendClusterClient: Send)]
pub trait ClusterClient {
    async fn list_trigger_markers(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<ConfigMapObject>, Error>;

    async fn delete_trigger_marker(&self, name: &str, namespace: &str) -> Result<(), Error>;

    async fn list_status_objects(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<ConfigMapObject>, Error>;

    async fn create_status_object(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigMapObject, Error>;

    async fn delete_status_object(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// All autoscalers across all namespaces.
    async fn list_autoscalers(&self) -> Result<Vec<AutoscalerObject>, Error>;

    async fn read_autoscaler(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<AutoscalerObject, Error>;

    async fn patch_autoscaler(
        &self,
        name: &str,
        namespace: &str,
        patch: AutoscalerPatch,
    ) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum ClusterClientImplementation {
    Kubernetes(kubernetes::KubernetesClusterClient),
    InMemory(in_memory::InMemoryCluster),
}
