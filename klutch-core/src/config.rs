use std::{fs, path::PathBuf};

use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu, ensure};

const IN_CLUSTER_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to read configuration file at {config_file:?}"))]
    ReadConfigFile {
        source: std::io::Error,
        config_file: PathBuf,
    },

    #[snafu(display("Failed to parse configuration file at {config_file:?}"))]
    ParseConfigFile {
        source: serde_yaml::Error,
        config_file: PathBuf,
    },

    #[snafu(display(
        "common.reconcile_interval ({reconcile_interval}s) can not be larger than common.duration ({duration}s)"
    ))]
    ReconcileIntervalExceedsDuration {
        reconcile_interval: u64,
        duration: u64,
    },

    #[snafu(display("When running out of cluster, common.namespace needs to be set"))]
    NamespaceRequired,
}

/// All intervals and durations are plain seconds, matching the values
/// operators put in the deployed ConfigMap of the controller.
#[derive(Clone, Debug, Default, Deserialize)]
// We want to fail on unknown config properties to make the user aware that what they tried to
// configure is not a valid configuration.
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,

    #[serde(default)]
    pub trigger_web_hook: TriggerWebHookConfig,

    #[serde(default)]
    pub trigger_config_map: TriggerConfigMapConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonConfig {
    /// Period (seconds) after which scaled-up autoscalers are restored to their original values.
    #[serde(default = "default_duration")]
    pub duration: u64,

    /// Interval (seconds) between reconcile passes while a sequence is active.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: u64,

    /// Interval (seconds) between orphan sweeps while no sequence is active. 0 disables the sweep.
    #[serde(default)]
    pub scan_orphans_interval: u64,

    /// Namespace to look for triggers and store status in. Defaults to the namespace the
    /// controller is deployed in; required when running out of cluster.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Annotation marking a HorizontalPodAutoscaler as opted in. The annotation value must
    /// match `hpa_annotation_enabled_value` exactly, presence alone is not sufficient.
    #[serde(default = "default_hpa_annotation_enabled_key")]
    pub hpa_annotation_enabled_key: String,

    #[serde(default = "default_hpa_annotation_enabled_value")]
    pub hpa_annotation_enabled_value: String,

    /// Annotation holding the percentage applied to `status.currentReplicas` when computing
    /// the raised `minReplicas` floor.
    #[serde(default = "default_hpa_annotation_scale_percent_of_actual")]
    pub hpa_annotation_scale_percent_of_actual: String,

    /// Annotation the controller stores in-progress state under while an autoscaler is
    /// scaled up.
    #[serde(default = "default_hpa_annotation_status")]
    pub hpa_annotation_status: String,

    /// Name and label of the ConfigMap the controller persists an ongoing sequence in.
    #[serde(default = "default_cm_status_name")]
    pub cm_status_name: String,

    #[serde(default = "default_cm_status_label_key")]
    pub cm_status_label_key: String,

    #[serde(default = "default_cm_status_label_value")]
    pub cm_status_label_value: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerWebHookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_web_hook_address")]
    pub address: String,

    #[serde(default = "default_web_hook_port")]
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfigMapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval (seconds) between scans for trigger ConfigMaps.
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,

    /// Trigger ConfigMaps older than this period (seconds) are ignored and deleted.
    #[serde(default = "default_trigger_max_age")]
    pub max_age: u64,

    #[serde(default = "default_cm_trigger_label_key")]
    pub cm_trigger_label_key: String,

    #[serde(default = "default_cm_trigger_label_value")]
    pub cm_trigger_label_value: String,
}

fn default_duration() -> u64 {
    300
}

fn default_reconcile_interval() -> u64 {
    10
}

fn default_hpa_annotation_enabled_key() -> String {
    "klutch.it/enabled".to_owned()
}

fn default_hpa_annotation_enabled_value() -> String {
    "true".to_owned()
}

fn default_hpa_annotation_scale_percent_of_actual() -> String {
    "klutch.it/scale-percentage-of-actual".to_owned()
}

fn default_hpa_annotation_status() -> String {
    "klutch.it/status".to_owned()
}

fn default_cm_status_name() -> String {
    "klutch-status".to_owned()
}

fn default_cm_status_label_key() -> String {
    "klutch.it/status".to_owned()
}

fn default_cm_status_label_value() -> String {
    "1".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_web_hook_address() -> String {
    "127.0.0.1".to_owned()
}

fn default_web_hook_port() -> u16 {
    8123
}

fn default_scan_interval() -> u64 {
    10
}

fn default_trigger_max_age() -> u64 {
    300
}

fn default_cm_trigger_label_key() -> String {
    "klutch.it/trigger".to_owned()
}

fn default_cm_trigger_label_value() -> String {
    "1".to_owned()
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            reconcile_interval: default_reconcile_interval(),
            scan_orphans_interval: 0,
            namespace: None,
            hpa_annotation_enabled_key: default_hpa_annotation_enabled_key(),
            hpa_annotation_enabled_value: default_hpa_annotation_enabled_value(),
            hpa_annotation_scale_percent_of_actual:
                default_hpa_annotation_scale_percent_of_actual(),
            hpa_annotation_status: default_hpa_annotation_status(),
            cm_status_name: default_cm_status_name(),
            cm_status_label_key: default_cm_status_label_key(),
            cm_status_label_value: default_cm_status_label_value(),
        }
    }
}

impl Default for TriggerWebHookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_web_hook_address(),
            port: default_web_hook_port(),
        }
    }
}

impl Default for TriggerConfigMapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval: default_scan_interval(),
            max_age: default_trigger_max_age(),
            cm_trigger_label_key: default_cm_trigger_label_key(),
            cm_trigger_label_value: default_cm_trigger_label_value(),
        }
    }
}

impl Config {
    /// Read, validate and resolve the configuration. Without a config file every setting
    /// falls back to its default, which is sufficient for in-cluster deployments.
    pub fn load(config_file: Option<&PathBuf>) -> Result<Self, Error> {
        let mut config = match config_file {
            Some(config_file) => Self::read_from_file(config_file)?,
            None => Self::default(),
        };
        config.validate()?;
        config.resolve_namespace(in_cluster_namespace())?;
        Ok(config)
    }

    /// Using [`std::fs::read_to_string`] as [`serde_yaml`] has no async reader support.
    /// Should not matter, as the config is only read once during startup.
    pub fn read_from_file(config_file: &PathBuf) -> Result<Self, Error> {
        let contents = fs::read_to_string(config_file).context(ReadConfigFileSnafu {
            config_file: config_file.clone(),
        })?;

        serde_yaml::from_str(&contents).context(ParseConfigFileSnafu {
            config_file: config_file.clone(),
        })
    }

    fn validate(&self) -> Result<(), Error> {
        ensure!(
            self.common.reconcile_interval <= self.common.duration,
            ReconcileIntervalExceedsDurationSnafu {
                reconcile_interval: self.common.reconcile_interval,
                duration: self.common.duration,
            }
        );

        Ok(())
    }

    /// Fill in `common.namespace` from the in-cluster service-account mount if the
    /// configuration did not set it.
    fn resolve_namespace(&mut self, in_cluster_namespace: Option<String>) -> Result<(), Error> {
        if self.common.namespace.is_none() {
            self.common.namespace = Some(in_cluster_namespace.context(NamespaceRequiredSnafu)?);
        }

        Ok(())
    }

    /// The namespace triggers and status objects live in. Always set after [`Config::load`].
    pub fn namespace(&self) -> &str {
        self.common.namespace.as_deref().unwrap_or_default()
    }
}

fn in_cluster_namespace() -> Option<String> {
    let namespace = fs::read_to_string(IN_CLUSTER_NAMESPACE_FILE).ok()?;
    let namespace = namespace.trim();

    if namespace.is_empty() {
        None
    } else {
        Some(namespace.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.common.duration, 300);
        assert_eq!(config.common.reconcile_interval, 10);
        assert_eq!(config.common.scan_orphans_interval, 0);
        assert_eq!(config.common.hpa_annotation_enabled_key, "klutch.it/enabled");
        assert_eq!(
            config.common.hpa_annotation_scale_percent_of_actual,
            "klutch.it/scale-percentage-of-actual"
        );
        assert_eq!(config.common.hpa_annotation_status, "klutch.it/status");
        assert_eq!(config.common.cm_status_name, "klutch-status");
        assert!(config.trigger_web_hook.enabled);
        assert_eq!(config.trigger_web_hook.address, "127.0.0.1");
        assert_eq!(config.trigger_web_hook.port, 8123);
        assert!(config.trigger_config_map.enabled);
        assert_eq!(config.trigger_config_map.scan_interval, 10);
        assert_eq!(config.trigger_config_map.max_age, 300);
        assert_eq!(
            config.trigger_config_map.cm_trigger_label_key,
            "klutch.it/trigger"
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let config: Config = serde_yaml::from_str(indoc! {"
            common:
              duration: 600
              namespace: production
            trigger_web_hook:
              enabled: false
        "})
        .expect("Failed to parse config");

        assert_eq!(config.common.duration, 600);
        assert_eq!(config.common.namespace.as_deref(), Some("production"));
        // Untouched sections and fields keep their defaults
        assert_eq!(config.common.reconcile_interval, 10);
        assert!(!config.trigger_web_hook.enabled);
        assert_eq!(config.trigger_web_hook.port, 8123);
        assert!(config.trigger_config_map.enabled);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str(indoc! {"
            common:
              duartion: 600
        "});

        assert!(result.is_err());
    }

    #[test]
    fn test_reconcile_interval_must_not_exceed_duration() {
        let config: Config = serde_yaml::from_str(indoc! {"
            common:
              duration: 5
              reconcile_interval: 10
        "})
        .expect("Failed to parse config");

        assert!(matches!(
            config.validate(),
            Err(Error::ReconcileIntervalExceedsDuration {
                reconcile_interval: 10,
                duration: 5
            })
        ));
    }

    #[test]
    fn test_namespace_required_out_of_cluster() {
        let mut config = Config::default();

        assert!(matches!(
            config.resolve_namespace(None),
            Err(Error::NamespaceRequired)
        ));
    }

    #[test]
    fn test_namespace_from_service_account() {
        let mut config = Config::default();
        config
            .resolve_namespace(Some("kube-public".to_owned()))
            .expect("Failed to resolve namespace");

        assert_eq!(config.namespace(), "kube-public");
    }

    #[test]
    fn test_configured_namespace_wins_over_service_account() {
        let mut config = Config::default();
        config.common.namespace = Some("configured".to_owned());
        config
            .resolve_namespace(Some("in-cluster".to_owned()))
            .expect("Failed to resolve namespace");

        assert_eq!(config.namespace(), "configured");
    }
}
