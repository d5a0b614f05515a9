use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use klutch_cluster::{ClusterClient, ClusterClientImplementation};
use klutch_core::{
    Trigger,
    config::Config,
    sequence::{AutoscalerStatusData, ManagedAutoscaler, STATUS_DATA_KEY, SequenceState},
};
use snafu::{ResultExt, Snafu, ensure};
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    engine::hpa::{reconcile_hpa, revert_hpa, scale_hpa},
    shutdown::{ShutdownFlag, sleep_observing},
};

pub mod hpa;

const IDLE_TICK: Duration = Duration::from_secs(1);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to list status objects"))]
    ListStatusObjects { source: klutch_cluster::Error },

    #[snafu(display("Failed to parse adopted status object {name:?}"))]
    ParseAdoptedStatusObject {
        source: klutch_core::sequence::Error,
        name: String,
    },

    #[snafu(display("Failed to list autoscalers"))]
    ListAutoscalers { source: klutch_cluster::Error },

    #[snafu(display("Refusing to sweep orphans while a scaling sequence is active"))]
    OrphanSweepWhileActive,
}

/// States of the scaling sequence state machine.
///
/// `Idle` waits for a trigger. A trigger moves through `StartSequence` into the
/// `Active`/`Reconcile` cycle, which `EndSequence` leaves once the configured duration
/// has expired, reverting every managed autoscaler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    StartSequence,
    Active,
    Reconcile,
    EndSequence,
}

struct ActiveSequence {
    state: SequenceState,
    /// Name of the persisted status object backing this sequence.
    status_name: String,
}

/// The single writer of the system. Consumes triggers, runs the sequence state machine
/// and owns all mutation of autoscaler objects and of the persisted status object.
pub struct SequenceEngine {
    config: Config,
    cluster: Arc<ClusterClientImplementation>,
    triggers: mpsc::Receiver<Trigger>,
    /// Exposed to trigger sources for observability. Sources may still fire while
    /// active, the engine drains and ignores those triggers.
    active: Arc<AtomicBool>,
    shutdown: ShutdownFlag,
    sequence: Option<ActiveSequence>,
    last_orphan_scan: i64,
}

impl SequenceEngine {
    pub fn new(
        config: Config,
        cluster: Arc<ClusterClientImplementation>,
        triggers: mpsc::Receiver<Trigger>,
        active: Arc<AtomicBool>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            cluster,
            triggers,
            active,
            shutdown,
            sequence: None,
            last_orphan_scan: Utc::now().timestamp(),
        }
    }

    /// Adopt a sequence persisted by a previous incarnation, or revert orphaned
    /// autoscalers when there is none. Must complete before [`SequenceEngine::run`];
    /// failures are fatal, guessing about leftover state is not an option.
    #[instrument(skip(self))]
    pub async fn startup(&mut self) -> Result<EngineState, Error> {
        let common = &self.config.common;
        let mut status_objects = self
            .cluster
            .list_status_objects(
                self.config.namespace(),
                &common.cm_status_label_key,
                &common.cm_status_label_value,
            )
            .await
            .context(ListStatusObjectsSnafu)?;

        if status_objects.is_empty() {
            info!("Startup: No status for ongoing scaling sequence found.");

            match self.sweep_orphans().await? {
                0 => {}
                reverted => warn!(reverted, "Startup: Reverted orphaned autoscalers"),
            }

            return Ok(EngineState::Idle);
        }

        let newest = status_objects.remove(0);
        let state = SequenceState::from_status_object(&newest).context(
            ParseAdoptedStatusObjectSnafu { name: &newest.name },
        )?;
        info!(
            started_at = state.started_at,
            managed = state.managed.len(),
            "Startup: Found status for ongoing scaling sequence. Resuming."
        );

        if !status_objects.is_empty() {
            warn!(
                "Startup: Found multiple statuses for ongoing scaling sequence. Deleting all but newest."
            );
            for stale in &status_objects {
                if let Err(error) = self
                    .cluster
                    .delete_status_object(&stale.name, &stale.namespace)
                    .await
                {
                    error!(
                        ?error,
                        name = stale.name,
                        "Startup: Failed to delete stale status object"
                    );
                }
            }
        }

        self.sequence = Some(ActiveSequence {
            state,
            status_name: newest.name,
        });
        self.active.store(true, Ordering::SeqCst);

        Ok(EngineState::Active)
    }

    pub async fn run(mut self) {
        let mut state = match self.sequence {
            Some(_) => EngineState::Active,
            None => EngineState::Idle,
        };
        info!(?state, "Started");

        loop {
            if self.shutdown.is_signaled() {
                // No revert on shutdown: the next incarnation adopts the persisted
                // status object and finishes the sequence.
                info!("Stopped");
                return;
            }

            state = match state {
                EngineState::Idle => self.idle().await,
                EngineState::StartSequence => self.start_sequence().await,
                EngineState::Active => self.active_wait().await,
                EngineState::Reconcile => self.reconcile().await,
                EngineState::EndSequence => self.end_sequence().await,
            };
        }
    }

    /// Wait for a trigger, with a timeout so the stop flag and the orphan scan interval
    /// are observed.
    async fn idle(&mut self) -> EngineState {
        match timeout(IDLE_TICK, self.triggers.recv()).await {
            Ok(Some(trigger)) => {
                info!(source = trigger.source, "Received trigger");
                EngineState::StartSequence
            }
            Ok(None) => {
                // Every source is gone, nothing can fire anymore. Keep idling so the
                // supervisor stays in charge of shutting down.
                sleep_observing(IDLE_TICK, &self.shutdown).await;
                EngineState::Idle
            }
            Err(_elapsed) => {
                debug!("No trigger fired, starting next cycle.");
                self.scan_orphans_if_due().await;
                EngineState::Idle
            }
        }
    }

    /// Scale up every opted-in autoscaler and persist the resulting sequence. Any
    /// failure to persist aborts the start; partially scaled-up autoscalers are
    /// reverted as orphans by the next startup.
    #[instrument(skip(self))]
    async fn start_sequence(&mut self) -> EngineState {
        let common = &self.config.common;

        let autoscalers = match self.cluster.list_autoscalers().await {
            Ok(autoscalers) => autoscalers,
            Err(error) => {
                error!(?error, "Failed to list autoscalers, not starting a sequence");
                return EngineState::Idle;
            }
        };

        let candidates: Vec<_> = autoscalers
            .into_iter()
            .filter(|hpa| {
                hpa.annotations.get(&common.hpa_annotation_enabled_key)
                    == Some(&common.hpa_annotation_enabled_value)
            })
            .collect();

        if candidates.is_empty() {
            warn!("No opted-in autoscalers found, not starting a sequence");
            return EngineState::Idle;
        }

        let mut managed = Vec::with_capacity(candidates.len());
        for hpa in &candidates {
            match scale_hpa(&self.cluster, common, hpa).await {
                Ok(entry) => managed.push(entry),
                Err(error) => warn!(%error, "Skipping autoscaler"),
            }
        }

        if managed.is_empty() {
            warn!("No autoscaler could be scaled up, not starting a sequence");
            return EngineState::Idle;
        }

        let mut state = SequenceState {
            started_at: 0,
            managed,
        };
        let body = match state.status_body() {
            Ok(body) => body,
            Err(error) => {
                error!(
                    ?error,
                    "Failed to serialize sequence status, aborting sequence start. \
                     Scaled-up autoscalers will be reverted as orphans."
                );
                return EngineState::Idle;
            }
        };

        let labels = BTreeMap::from([(
            common.cm_status_label_key.clone(),
            common.cm_status_label_value.clone(),
        )]);
        let data = BTreeMap::from([(STATUS_DATA_KEY.to_owned(), body)]);

        match self
            .cluster
            .create_status_object(
                self.config.namespace(),
                &self.config.common.cm_status_name,
                labels,
                data,
            )
            .await
        {
            Ok(status_object) => {
                // The durability anchor for expiry is the object's creation timestamp
                state.started_at = status_object.creation_timestamp.timestamp();
                info!(
                    managed = state.managed.len(),
                    started_at = state.started_at,
                    "Started scaling sequence"
                );

                self.sequence = Some(ActiveSequence {
                    state,
                    status_name: status_object.name,
                });
                self.active.store(true, Ordering::SeqCst);

                EngineState::Active
            }
            Err(error) => {
                error!(
                    ?error,
                    "Failed to persist sequence status, aborting sequence start. \
                     Scaled-up autoscalers will be reverted as orphans."
                );
                EngineState::Idle
            }
        }
    }

    /// Sleep one reconcile interval, drop accumulated triggers and decide between
    /// another reconcile pass and ending the sequence.
    async fn active_wait(&mut self) -> EngineState {
        sleep_observing(
            Duration::from_secs(self.config.common.reconcile_interval),
            &self.shutdown,
        )
        .await;
        if self.shutdown.is_signaled() {
            // run() exits before acting on the state
            return EngineState::Active;
        }

        self.drain_triggers();

        let Some(sequence) = &self.sequence else {
            error!("In Active state without a sequence. This should not happen!");
            self.active.store(false, Ordering::SeqCst);
            return EngineState::Idle;
        };

        if sequence
            .state
            .is_expired(self.config.common.duration, Utc::now().timestamp())
        {
            info!("Sequence duration expired");
            EngineState::EndSequence
        } else {
            EngineState::Reconcile
        }
    }

    fn drain_triggers(&mut self) {
        while let Ok(trigger) = self.triggers.try_recv() {
            info!(
                source = trigger.source,
                "Ignoring trigger received during active sequence"
            );
        }
    }

    /// Re-assert the scaled-up state on every managed autoscaler, in persisted order.
    /// Per-object failures are logged and retried on the next tick.
    #[instrument(skip(self))]
    async fn reconcile(&mut self) -> EngineState {
        let Some(sequence) = &self.sequence else {
            error!("In Reconcile state without a sequence. This should not happen!");
            self.active.store(false, Ordering::SeqCst);
            return EngineState::Idle;
        };

        for managed in &sequence.state.managed {
            if let Err(error) = reconcile_hpa(&self.cluster, &self.config.common, managed).await {
                warn!(%error, "Failed to reconcile autoscaler, will retry next tick");
            }
        }

        EngineState::Active
    }

    /// Restore every managed autoscaler and delete the status object.
    #[instrument(skip(self))]
    async fn end_sequence(&mut self) -> EngineState {
        let Some(sequence) = self.sequence.take() else {
            error!("In EndSequence state without a sequence. This should not happen!");
            self.active.store(false, Ordering::SeqCst);
            return EngineState::Idle;
        };

        info!(
            managed = sequence.state.managed.len(),
            "Ending scaling sequence, restoring original values"
        );

        for managed in &sequence.state.managed {
            if let Err(error) = revert_hpa(&self.cluster, &self.config.common, managed).await {
                warn!(%error, "Failed to revert autoscaler, it will be picked up as an orphan");
            }
        }

        if let Err(error) = self
            .cluster
            .delete_status_object(&sequence.status_name, self.config.namespace())
            .await
        {
            // The leftover object is adopted on the next restart; reverting a second
            // time is harmless
            error!(
                ?error,
                name = sequence.status_name,
                "Failed to delete status object"
            );
        }

        self.active.store(false, Ordering::SeqCst);
        info!("Scaling sequence finished");

        EngineState::Idle
    }

    async fn scan_orphans_if_due(&mut self) {
        let interval = self.config.common.scan_orphans_interval;
        if interval == 0 {
            return;
        }

        let now = Utc::now().timestamp();
        if now - self.last_orphan_scan <= interval as i64 {
            return;
        }
        self.last_orphan_scan = now;

        match self.sweep_orphans().await {
            Ok(0) => {}
            Ok(reverted) => warn!(
                reverted,
                "Orphan sweep reverted autoscalers left behind without a sequence"
            ),
            Err(error) => error!(?error, "Orphan sweep failed"),
        }
    }

    /// Revert every autoscaler that carries the in-progress status annotation even
    /// though no sequence is active (e.g. the status object was deleted manually).
    /// Refuses to run during an active sequence, a sweep would fight the reconcile loop.
    #[instrument(skip(self))]
    pub async fn sweep_orphans(&self) -> Result<usize, Error> {
        ensure!(
            !self.active.load(Ordering::SeqCst),
            OrphanSweepWhileActiveSnafu
        );

        let autoscalers = self
            .cluster
            .list_autoscalers()
            .await
            .context(ListAutoscalersSnafu)?;

        let mut reverted = 0;
        for hpa in autoscalers {
            let Some(annotation) = hpa.annotations.get(&self.config.common.hpa_annotation_status)
            else {
                continue;
            };

            let status: AutoscalerStatusData = match serde_json::from_str(annotation) {
                Ok(status) => status,
                Err(error) => {
                    warn!(
                        ?error,
                        hpa = hpa.repr(),
                        "Orphaned autoscaler carries an unparseable status annotation, skipping"
                    );
                    continue;
                }
            };

            let orphan = ManagedAutoscaler {
                name: hpa.name,
                namespace: hpa.namespace,
                status,
            };
            match revert_hpa(&self.cluster, &self.config.common, &orphan).await {
                Ok(()) => reverted += 1,
                Err(error) => warn!(%error, "Failed to revert orphaned autoscaler"),
            }
        }

        Ok(reverted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use klutch_cluster::in_memory::InMemoryCluster;
    use klutch_core::objects::{AutoscalerObject, ConfigMapObject};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.common.namespace = Some("test-ns".to_owned());
        // Keep the tests from sleeping through real reconcile intervals
        config.common.reconcile_interval = 0;
        config
    }

    fn enabled_hpa(name: &str, scale_percent: &str) -> AutoscalerObject {
        AutoscalerObject {
            name: name.to_owned(),
            namespace: "test-ns".to_owned(),
            annotations: BTreeMap::from([
                ("klutch.it/enabled".to_owned(), "true".to_owned()),
                (
                    "klutch.it/scale-percentage-of-actual".to_owned(),
                    scale_percent.to_owned(),
                ),
            ]),
            min_replicas: 2,
            max_replicas: 10,
            current_replicas: 4,
        }
    }

    fn scaled_hpa(name: &str) -> (AutoscalerObject, ManagedAutoscaler) {
        let status = AutoscalerStatusData {
            original_min_replicas: 2,
            original_current_replicas: 4,
            applied_min_replicas: 8,
            applied_at: Utc::now().timestamp(),
        };

        let mut hpa = enabled_hpa(name, "200");
        hpa.min_replicas = status.applied_min_replicas;
        hpa.annotations.insert(
            "klutch.it/status".to_owned(),
            serde_json::to_string(&status).unwrap(),
        );

        let managed = ManagedAutoscaler {
            name: name.to_owned(),
            namespace: "test-ns".to_owned(),
            status,
        };

        (hpa, managed)
    }

    fn status_object(name: &str, age_secs: i64, managed: Vec<ManagedAutoscaler>) -> ConfigMapObject {
        let state = SequenceState {
            started_at: 0,
            managed,
        };

        ConfigMapObject {
            name: name.to_owned(),
            namespace: "test-ns".to_owned(),
            labels: BTreeMap::from([("klutch.it/status".to_owned(), "1".to_owned())]),
            data: BTreeMap::from([(STATUS_DATA_KEY.to_owned(), state.status_body().unwrap())]),
            creation_timestamp: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    struct TestEngine {
        engine: SequenceEngine,
        triggers: mpsc::Sender<Trigger>,
        active: Arc<AtomicBool>,
        cluster: Arc<ClusterClientImplementation>,
    }

    fn engine_with(cluster: InMemoryCluster, config: Config) -> TestEngine {
        let cluster: Arc<ClusterClientImplementation> = Arc::new(cluster.into());
        let (triggers, rx) = mpsc::channel(16);
        let active = Arc::new(AtomicBool::new(false));

        let engine = SequenceEngine::new(
            config,
            Arc::clone(&cluster),
            rx,
            Arc::clone(&active),
            ShutdownFlag::new(),
        );

        TestEngine {
            engine,
            triggers,
            active,
            cluster,
        }
    }

    fn in_memory(cluster: &ClusterClientImplementation) -> &InMemoryCluster {
        match cluster {
            ClusterClientImplementation::InMemory(in_memory) => in_memory,
            _ => panic!("Test must run against the in-memory cluster"),
        }
    }

    #[tokio::test]
    async fn test_startup_without_status_is_idle() {
        let mut test = engine_with(InMemoryCluster::new(), test_config());

        let state = test.engine.startup().await.unwrap();

        assert_eq!(state, EngineState::Idle);
        assert!(!test.active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_startup_adopts_newest_status_and_deletes_older() {
        let (hpa, managed) = scaled_hpa("test-hpa");
        let cluster = InMemoryCluster::new();
        cluster.add_autoscaler(hpa.clone()).await;
        cluster
            .add_config_map(status_object("klutch-status-old", 60, vec![]))
            .await;
        cluster
            .add_config_map(status_object(
                "klutch-status",
                10,
                vec![managed.clone()],
            ))
            .await;

        let mut test = engine_with(cluster, test_config());
        let state = test.engine.startup().await.unwrap();

        assert_eq!(state, EngineState::Active);
        assert!(test.active.load(Ordering::SeqCst));

        let sequence = test.engine.sequence.as_ref().unwrap();
        assert_eq!(sequence.state.managed, vec![managed]);
        assert_eq!(sequence.status_name, "klutch-status");
        // startedAt is anchored to the adopted object's creation timestamp
        let now = Utc::now().timestamp();
        assert!((now - 12..=now - 8).contains(&sequence.state.started_at));

        // Only the adopted status object survives
        let remaining = in_memory(&test.cluster).config_maps().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "klutch-status");

        // Adoption does not scale anything: the autoscaler is untouched
        assert_eq!(
            in_memory(&test.cluster)
                .autoscaler("test-hpa", "test-ns")
                .await
                .unwrap(),
            hpa
        );
    }

    #[tokio::test]
    async fn test_startup_reverts_orphans_when_no_status_exists() {
        let (hpa, _) = scaled_hpa("orphan");
        let cluster = InMemoryCluster::new();
        cluster.add_autoscaler(hpa).await;

        let mut test = engine_with(cluster, test_config());
        let state = test.engine.startup().await.unwrap();

        assert_eq!(state, EngineState::Idle);
        let reverted = in_memory(&test.cluster)
            .autoscaler("orphan", "test-ns")
            .await
            .unwrap();
        assert_eq!(reverted.min_replicas, 2);
        assert!(!reverted.annotations.contains_key("klutch.it/status"));
    }

    #[tokio::test]
    async fn test_trigger_moves_idle_to_start_sequence() {
        let mut test = engine_with(InMemoryCluster::new(), test_config());
        test.triggers.send(Trigger::new("test")).await.unwrap();

        assert_eq!(test.engine.idle().await, EngineState::StartSequence);
    }

    #[tokio::test]
    async fn test_start_sequence_scales_candidates_and_persists() {
        let cluster = InMemoryCluster::new();
        cluster.add_autoscaler(enabled_hpa("first", "200")).await;
        // Not opted in: enabled annotation value does not match
        let mut opted_out = enabled_hpa("opted-out", "200");
        opted_out
            .annotations
            .insert("klutch.it/enabled".to_owned(), "false".to_owned());
        cluster.add_autoscaler(opted_out.clone()).await;
        // Opted in but rejected: unparseable percentage
        cluster.add_autoscaler(enabled_hpa("bad-percent", "nope")).await;
        cluster.add_autoscaler(enabled_hpa("second", "150")).await;

        let mut test = engine_with(cluster, test_config());
        let state = test.engine.start_sequence().await;

        assert_eq!(state, EngineState::Active);
        assert!(test.active.load(Ordering::SeqCst));

        // Managed list keeps the listing order of the scaled autoscalers
        let sequence = test.engine.sequence.as_ref().unwrap();
        let names: Vec<_> = sequence
            .state
            .managed
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);

        // Persisted status object round-trips to the same list
        let status_objects = in_memory(&test.cluster).config_maps().await;
        assert_eq!(status_objects.len(), 1);
        let persisted = SequenceState::from_status_object(&status_objects[0]).unwrap();
        assert_eq!(persisted.managed, sequence.state.managed);

        // Value-match semantics: presence of the key alone did not opt in
        assert_eq!(
            in_memory(&test.cluster)
                .autoscaler("opted-out", "test-ns")
                .await
                .unwrap(),
            opted_out
        );
    }

    #[tokio::test]
    async fn test_start_sequence_without_candidates_returns_idle() {
        let mut test = engine_with(InMemoryCluster::new(), test_config());

        let state = test.engine.start_sequence().await;

        assert_eq!(state, EngineState::Idle);
        assert!(!test.active.load(Ordering::SeqCst));
        assert!(in_memory(&test.cluster).config_maps().await.is_empty());
    }

    #[tokio::test]
    async fn test_triggers_during_active_sequence_are_drained() {
        let (hpa, managed) = scaled_hpa("test-hpa");
        let cluster = InMemoryCluster::new();
        cluster.add_autoscaler(hpa).await;
        cluster
            .add_config_map(status_object("klutch-status", 10, vec![managed.clone()]))
            .await;

        let mut test = engine_with(cluster, test_config());
        test.engine.startup().await.unwrap();

        for _ in 0..3 {
            test.triggers.send(Trigger::new("test")).await.unwrap();
        }

        // Not expired yet: continues reconciling, and the pending triggers are gone
        let state = test.engine.active_wait().await;
        assert_eq!(state, EngineState::Reconcile);
        assert_eq!(
            test.engine.sequence.as_ref().unwrap().state.managed,
            vec![managed]
        );
        assert!(test.engine.triggers.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expired_sequence_ends_and_reverts() {
        let (hpa, managed) = scaled_hpa("test-hpa");
        let cluster = InMemoryCluster::new();
        cluster.add_autoscaler(hpa).await;
        cluster
            .add_config_map(status_object("klutch-status", 301, vec![managed]))
            .await;

        let mut test = engine_with(cluster, test_config());
        test.engine.startup().await.unwrap();

        let state = test.engine.active_wait().await;
        assert_eq!(state, EngineState::EndSequence);

        let state = test.engine.end_sequence().await;
        assert_eq!(state, EngineState::Idle);
        assert!(!test.active.load(Ordering::SeqCst));
        assert!(test.engine.sequence.is_none());

        // Original values restored, annotation and status object gone
        let reverted = in_memory(&test.cluster)
            .autoscaler("test-hpa", "test-ns")
            .await
            .unwrap();
        assert_eq!(reverted.min_replicas, 2);
        assert!(!reverted.annotations.contains_key("klutch.it/status"));
        assert!(in_memory(&test.cluster).config_maps().await.is_empty());
    }

    #[tokio::test]
    async fn test_fresh_sequence_reconciles_instead_of_ending() {
        let (hpa, managed) = scaled_hpa("test-hpa");
        let cluster = InMemoryCluster::new();
        cluster.add_autoscaler(hpa).await;
        cluster
            .add_config_map(status_object("klutch-status", 10, vec![managed]))
            .await;

        let mut test = engine_with(cluster, test_config());
        test.engine.startup().await.unwrap();

        assert_eq!(test.engine.active_wait().await, EngineState::Reconcile);
        assert_eq!(test.engine.reconcile().await, EngineState::Active);
    }

    #[tokio::test]
    async fn test_orphan_sweep_refuses_while_active() {
        let test = engine_with(InMemoryCluster::new(), test_config());
        test.active.store(true, Ordering::SeqCst);

        assert!(matches!(
            test.engine.sweep_orphans().await,
            Err(Error::OrphanSweepWhileActive)
        ));
    }

    #[tokio::test]
    async fn test_orphan_sweep_skips_unparseable_annotations() {
        let cluster = InMemoryCluster::new();
        let (hpa, _) = scaled_hpa("orphan");
        cluster.add_autoscaler(hpa).await;
        let mut broken = enabled_hpa("broken", "200");
        broken
            .annotations
            .insert("klutch.it/status".to_owned(), "not json".to_owned());
        cluster.add_autoscaler(broken.clone()).await;

        let test = engine_with(cluster, test_config());
        let reverted = test.engine.sweep_orphans().await.unwrap();

        assert_eq!(reverted, 1);
        assert_eq!(
            in_memory(&test.cluster)
                .autoscaler("broken", "test-ns")
                .await
                .unwrap(),
            broken
        );
    }
}
