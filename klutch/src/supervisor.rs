use std::time::Duration;

use futures::FutureExt;
use snafu::Snafu;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

use crate::shutdown::ShutdownFlag;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const ALIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("The components {stuck:?} failed to stop within {SHUTDOWN_TIMEOUT:?}"))]
    ComponentsFailedToStop { stuck: Vec<String> },
}

struct Component {
    name: &'static str,
    shutdown: ShutdownFlag,
    handle: JoinHandle<()>,
}

/// Owns the lifecycle of all long-running components. Waits for a termination signal
/// (or a component dying on its own), signals a cooperative stop to every component and
/// waits for quiescence, bounded by a fixed deadline.
pub struct Supervisor {
    components: Vec<Component>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, shutdown: ShutdownFlag, handle: JoinHandle<()>) {
        info!(name, "Registered component");
        self.components.push(Component {
            name,
            shutdown,
            handle,
        });
    }

    pub async fn run(self) -> Result<(), Error> {
        let mut signal = std::pin::pin!(wait_for_shutdown_signal());

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Received termination signal");
                    break;
                }
                _ = sleep(ALIVENESS_POLL_INTERVAL) => {
                    if let Some(dead) = self.components.iter().find(|c| c.handle.is_finished()) {
                        warn!(name = dead.name, "Component exited unexpectedly, shutting down");
                        break;
                    }
                }
            }
        }

        for component in &self.components {
            component.shutdown.signal();
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.all_stopped() {
                info!("All components stopped. Exiting.");
                return Ok(());
            }

            info!("Waiting for components to stop.");
            sleep(Duration::from_secs(1)).await;
        }

        if self.all_stopped() {
            info!("All components stopped. Exiting.");
            return Ok(());
        }

        let stuck: Vec<String> = self
            .components
            .iter()
            .filter(|c| !c.handle.is_finished())
            .map(|c| c.name.to_owned())
            .collect();
        error!(?stuck, "Components failed to stop within timeout. Aborting.");

        ComponentsFailedToStopSnafu { stuck }.fail()
    }

    fn all_stopped(&self) -> bool {
        self.components.iter().all(|c| c.handle.is_finished())
    }
}

async fn wait_for_shutdown_signal() {
    // Copied from kube::runtime::Controller::shutdown_on_signal
    futures::future::select(
        tokio::signal::ctrl_c().map(|_| ()).boxed(),
        #[cfg(unix)]
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .unwrap()
            .recv()
            .map(|_| ())
            .boxed(),
        // Assume that ctrl_c is enough on non-Unix platforms (such as Windows)
        #[cfg(not(unix))]
        futures::future::pending::<()>().boxed(),
    )
    .await;
}
