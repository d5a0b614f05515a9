use chrono::Utc;
use klutch_cluster::{ClusterClient, ClusterClientImplementation};
use klutch_core::{
    config::CommonConfig,
    objects::AutoscalerObject,
    patch::{AutoscalerPatch, PatchOperation, annotation_path},
    sequence::{AutoscalerStatusData, ManagedAutoscaler},
};
use serde_json::{Value, json};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, info, instrument, warn};

const MIN_REPLICAS_PATH: &str = "/spec/minReplicas";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Can not scale up {repr}: already has been scaled up"))]
    AlreadyScaled { repr: String },

    #[snafu(display(
        "Can not scale up {repr}: annotation {annotation:?} is missing or does not parse as an integer percentage"
    ))]
    BadScalePercent { repr: String, annotation: String },

    #[snafu(display(
        "Can not scale up {repr}: would not increase minReplicas (workload not correctly started?)"
    ))]
    WouldNotIncrease { repr: String },

    #[snafu(display("Cluster error"), context(false))]
    ClusterError { source: klutch_cluster::Error },

    #[snafu(display("Failed to serialize status annotation for {repr}"))]
    SerializeStatusAnnotation {
        source: serde_json::Error,
        repr: String,
    },
}

/// Outcome of a reconcile pass over a single autoscaler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Desired state was already in place, no patch was issued.
    UpToDate,
    Patched,
}

/// Raise the minReplicas floor of one autoscaler to
/// `ceil(currentReplicas * percentage / 100)`, clamped to maxReplicas, and record the
/// original values in the status annotation. A single merge-patch applies both.
#[instrument(skip_all, fields(hpa = hpa.repr()))]
pub async fn scale_hpa(
    cluster: &ClusterClientImplementation,
    config: &CommonConfig,
    hpa: &AutoscalerObject,
) -> Result<ManagedAutoscaler, Error> {
    let repr = hpa.repr();

    if hpa.annotations.contains_key(&config.hpa_annotation_status) {
        return AlreadyScaledSnafu { repr }.fail();
    }

    let scale_percent: u32 = hpa
        .annotations
        .get(&config.hpa_annotation_scale_percent_of_actual)
        .and_then(|value| value.parse().ok())
        .context(BadScalePercentSnafu {
            repr: &repr,
            annotation: &config.hpa_annotation_scale_percent_of_actual,
        })?;

    let target_numerator = hpa.current_replicas as i64 * scale_percent as i64;
    let target = (target_numerator + 99) / 100;

    // Guards against currentReplicas being 0 because the workload never started
    if target <= hpa.min_replicas as i64 {
        return WouldNotIncreaseSnafu { repr }.fail();
    }

    let target = if target > hpa.max_replicas as i64 {
        warn!(
            intended = target,
            max_replicas = hpa.max_replicas,
            "Limiting minReplicas to maxReplicas instead of the intended value"
        );
        hpa.max_replicas
    } else {
        target as i32
    };

    let status = AutoscalerStatusData {
        original_min_replicas: hpa.min_replicas,
        original_current_replicas: hpa.current_replicas,
        applied_min_replicas: target,
        applied_at: Utc::now().timestamp(),
    };
    let status_json =
        serde_json::to_string(&status).context(SerializeStatusAnnotationSnafu { repr: &repr })?;

    let mut patch = json!({
        "metadata": {"annotations": {}},
        "spec": {"minReplicas": target},
    });
    patch["metadata"]["annotations"][config.hpa_annotation_status.as_str()] =
        Value::String(status_json);

    cluster
        .patch_autoscaler(&hpa.name, &hpa.namespace, AutoscalerPatch::Merge(patch))
        .await?;

    info!(from = hpa.min_replicas, to = target, "Scaled up minReplicas");

    Ok(ManagedAutoscaler {
        name: hpa.name.clone(),
        namespace: hpa.namespace.clone(),
        status,
    })
}

/// Re-assert the scaled-up state onto one autoscaler. An external actor (e.g. a deploy
/// tool) may have overwritten minReplicas or stripped the status annotation; both are
/// restored with a single ordered JSON-patch. Idempotent: when nothing drifted, no
/// patch is issued.
#[instrument(skip_all, fields(hpa = managed.repr()))]
pub async fn reconcile_hpa(
    cluster: &ClusterClientImplementation,
    config: &CommonConfig,
    managed: &ManagedAutoscaler,
) -> Result<ReconcileOutcome, Error> {
    // Read first to determine which operations are needed
    let hpa = cluster
        .read_autoscaler(&managed.name, &managed.namespace)
        .await?;

    let mut operations = Vec::new();

    if !hpa.annotations.contains_key(&config.hpa_annotation_status) {
        let status_json =
            serde_json::to_string(&managed.status).context(SerializeStatusAnnotationSnafu {
                repr: managed.repr(),
            })?;
        operations.push(PatchOperation::Add {
            path: annotation_path(&config.hpa_annotation_status),
            value: Value::String(status_json),
        });
    }

    if hpa.min_replicas != managed.status.applied_min_replicas {
        operations.push(PatchOperation::Replace {
            path: MIN_REPLICAS_PATH.to_owned(),
            value: managed.status.applied_min_replicas.into(),
        });
    }

    if operations.is_empty() {
        debug!("No reconcile needed");
        return Ok(ReconcileOutcome::UpToDate);
    }

    cluster
        .patch_autoscaler(
            &managed.name,
            &managed.namespace,
            AutoscalerPatch::Json(operations),
        )
        .await?;

    info!("Reconciled");

    Ok(ReconcileOutcome::Patched)
}

/// Restore minReplicas to its original value and remove the status annotation.
#[instrument(skip_all, fields(hpa = managed.repr()))]
pub async fn revert_hpa(
    cluster: &ClusterClientImplementation,
    config: &CommonConfig,
    managed: &ManagedAutoscaler,
) -> Result<(), Error> {
    // Read first to determine whether the annotation survived; removing an absent
    // annotation would fail the whole patch
    let hpa = cluster
        .read_autoscaler(&managed.name, &managed.namespace)
        .await?;

    let mut operations = vec![PatchOperation::Replace {
        path: MIN_REPLICAS_PATH.to_owned(),
        value: managed.status.original_min_replicas.into(),
    }];

    if hpa.annotations.contains_key(&config.hpa_annotation_status) {
        operations.push(PatchOperation::Remove {
            path: annotation_path(&config.hpa_annotation_status),
        });
    }

    cluster
        .patch_autoscaler(
            &managed.name,
            &managed.namespace,
            AutoscalerPatch::Json(operations),
        )
        .await?;

    info!(
        from = managed.status.applied_min_replicas,
        to = managed.status.original_min_replicas,
        "Restored original minReplicas"
    );

    Ok(())
}
