use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use klutch_cluster::{ClusterClient, ClusterClientImplementation};
use klutch_core::{Trigger, config::Config, objects::ConfigMapObject};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    shutdown::{ShutdownFlag, sleep_observing},
    trigger::enqueue_trigger,
};

const SOURCE_NAME: &str = "trigger-config-map";

/// Trigger source that periodically scans the controller namespace for labeled trigger
/// ConfigMaps. A fresh marker fires a trigger; every examined marker is deleted.
pub struct ConfigMapTrigger {
    config: Config,
    cluster: Arc<ClusterClientImplementation>,
    triggers: mpsc::Sender<Trigger>,
    active: Arc<AtomicBool>,
    shutdown: ShutdownFlag,
}

impl ConfigMapTrigger {
    pub fn new(
        config: Config,
        cluster: Arc<ClusterClientImplementation>,
        triggers: mpsc::Sender<Trigger>,
        active: Arc<AtomicBool>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            cluster,
            triggers,
            active,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!("Started");
        let scan_interval = Duration::from_secs(self.config.trigger_config_map.scan_interval);

        loop {
            if self.shutdown.is_signaled() {
                info!("Stopped");
                return;
            }

            self.scan().await;
            sleep_observing(scan_interval, &self.shutdown).await;
        }
    }

    /// One scan pass: fire on the newest marker if it is fresh enough, then delete every
    /// marker that was listed.
    #[instrument(skip(self))]
    pub(crate) async fn scan(&self) {
        debug!("Looking for trigger ConfigMap objects");

        let trigger_config = &self.config.trigger_config_map;
        let markers = match self
            .cluster
            .list_trigger_markers(
                self.config.namespace(),
                &trigger_config.cm_trigger_label_key,
                &trigger_config.cm_trigger_label_value,
            )
            .await
        {
            Ok(markers) => markers,
            Err(error) => {
                error!(?error, "Failed to list trigger ConfigMaps");
                return;
            }
        };

        let mut markers = markers.into_iter();
        let Some(newest) = markers.next() else {
            debug!("No triggers found");
            return;
        };

        if marker_is_valid(&newest, trigger_config.max_age, Utc::now().timestamp()) {
            if self.active.load(Ordering::SeqCst) {
                debug!(
                    name = newest.name,
                    "A sequence is already active, the engine will ignore this trigger"
                );
            }
            enqueue_trigger(&self.triggers, SOURCE_NAME);
        } else {
            warn!(
                name = newest.name,
                "Trigger ConfigMap is not valid (expired) and has been deleted"
            );
        }

        self.delete_marker(&newest).await;

        let surplus: Vec<ConfigMapObject> = markers.collect();
        if !surplus.is_empty() {
            warn!("More than one trigger found. Using most recent. Removing others.");
            for marker in &surplus {
                self.delete_marker(marker).await;
            }
        }
    }

    async fn delete_marker(&self, marker: &ConfigMapObject) {
        if let Err(error) = self
            .cluster
            .delete_trigger_marker(&marker.name, &marker.namespace)
            .await
        {
            error!(?error, name = marker.name, "Failed to delete trigger ConfigMap");
        }
    }
}

/// A marker is valid iff it was created within `max_age` seconds of now. Markers with a
/// creation timestamp in the future are valid as well.
fn marker_is_valid(marker: &ConfigMapObject, max_age: u64, now: i64) -> bool {
    marker.creation_timestamp.timestamp() + max_age as i64 >= now
}
