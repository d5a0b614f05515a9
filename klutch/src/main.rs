use std::sync::{Arc, atomic::AtomicBool};

use clap::Parser;
use klutch_cluster::{
    ClusterClientImplementation,
    kubernetes::{self, KubernetesClusterClient},
};
use klutch_core::config::{self, Config};
use main_error::MainError;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    args::Args,
    engine::SequenceEngine,
    shutdown::ShutdownFlag,
    supervisor::Supervisor,
    trigger::{TRIGGER_CHANNEL_CAPACITY, config_map::ConfigMapTrigger, web_hook::WebHookTrigger},
};

mod args;
mod engine;
mod shutdown;
mod supervisor;
mod trigger;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to read configuration"))]
    ReadConfig { source: config::Error },

    #[snafu(display("Failed to create Kubernetes cluster client"))]
    CreateClusterClient { source: kubernetes::Error },

    #[snafu(display("Failed to start scaling sequence engine"))]
    StartEngine { source: engine::Error },

    #[snafu(display("Failed to shut down cleanly"))]
    Shutdown { source: supervisor::Error },
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = Config::load(args.config.as_ref()).context(ReadConfigSnafu)?;
    info!(namespace = config.namespace(), "Loaded configuration");

    let cluster: Arc<ClusterClientImplementation> = Arc::new(
        KubernetesClusterClient::new()
            .await
            .context(CreateClusterClientSnafu)?
            .into(),
    );

    let (triggers_tx, triggers_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
    let active = Arc::new(AtomicBool::new(false));

    let mut supervisor = Supervisor::new();

    if config.trigger_config_map.enabled {
        let shutdown = ShutdownFlag::new();
        let source = ConfigMapTrigger::new(
            config.clone(),
            Arc::clone(&cluster),
            triggers_tx.clone(),
            Arc::clone(&active),
            shutdown.clone(),
        );
        supervisor.register("trigger-config-map", shutdown, source.start());
    }

    if config.trigger_web_hook.enabled {
        let shutdown = ShutdownFlag::new();
        let source = WebHookTrigger::new(
            &config.trigger_web_hook,
            triggers_tx.clone(),
            Arc::clone(&active),
            shutdown.clone(),
        );
        supervisor.register("trigger-web-hook", shutdown, source.start());
    }

    // The sources hold the only remaining senders. With every source disabled the engine
    // sees a closed channel and keeps idling until stopped.
    drop(triggers_tx);

    let shutdown = ShutdownFlag::new();
    let mut engine = SequenceEngine::new(
        config,
        cluster,
        triggers_rx,
        active,
        shutdown.clone(),
    );
    engine.startup().await.context(StartEngineSnafu)?;
    supervisor.register("sequence-engine", shutdown, tokio::spawn(engine.run()));

    supervisor.run().await.context(ShutdownSnafu)?;

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_directives = if debug { "klutch=debug,info" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
