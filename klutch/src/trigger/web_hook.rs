use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::{Router, extract::State, routing::post};
use axum_server::Handle;
use klutch_core::{Trigger, config::TriggerWebHookConfig};
use tokio::{sync::mpsc, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};

use crate::{
    shutdown::{ShutdownFlag, sleep_observing},
    trigger::enqueue_trigger,
};

const SOURCE_NAME: &str = "trigger-web-hook";
const TICK_INTERVAL: Duration = Duration::from_secs(1);
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Trigger source listening for HTTP POSTs. Any POST fires a trigger and is answered
/// with a plain `OK`; other methods get the default method-not-allowed response.
pub struct WebHookTrigger {
    config: TriggerWebHookConfig,
    triggers: mpsc::Sender<Trigger>,
    active: Arc<AtomicBool>,
    shutdown: ShutdownFlag,
}

struct WebHookState {
    triggers: mpsc::Sender<Trigger>,
    active: Arc<AtomicBool>,
}

impl WebHookTrigger {
    pub fn new(
        config: &TriggerWebHookConfig,
        triggers: mpsc::Sender<Trigger>,
        active: Arc<AtomicBool>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config: config.clone(),
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

        let address: IpAddr = match self.config.address.parse() {
            Ok(address) => address,
            Err(error) => {
                error!(
                    ?error,
                    address = self.config.address,
                    "Invalid web hook listen address"
                );
                return;
            }
        };
        let listen_addr = SocketAddr::from((address, self.config.port));

        let state = Arc::new(WebHookState {
            triggers: self.triggers.clone(),
            active: Arc::clone(&self.active),
        });
        let app = app(state);

        info!(%listen_addr, "Starting web hook server");
        let handle = Handle::new();
        let server = tokio::spawn(
            axum_server::bind(listen_addr)
                .handle(handle.clone())
                .serve(app.into_make_service()),
        );

        loop {
            if self.shutdown.is_signaled() || server.is_finished() {
                break;
            }
            sleep_observing(TICK_INTERVAL, &self.shutdown).await;
        }

        info!("Stopping");
        handle.graceful_shutdown(Some(SERVER_SHUTDOWN_GRACE));
        match server.await {
            Ok(Ok(())) => info!("Stopped"),
            Ok(Err(error)) => error!(?error, "Web hook server failed"),
            Err(error) => error!(?error, "Failed to join web hook server task"),
        }
    }
}

fn app(state: Arc<WebHookState>) -> Router {
    // The fallback catches every path, the method router limits it to POST
    Router::new()
        .fallback_service(post(post_trigger).with_state(state))
        .layer(TraceLayer::new_for_http())
}

#[instrument(skip(state))]
async fn post_trigger(State(state): State<Arc<WebHookState>>) -> &'static str {
    if state.active.load(Ordering::SeqCst) {
        debug!("A sequence is already active, the engine will ignore this trigger");
    }
    enqueue_trigger(&state.triggers, SOURCE_NAME);

    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use rstest::rstest;
    use tower::ServiceExt;

    fn test_app() -> (Router, mpsc::Receiver<Trigger>) {
        let (tx, rx) = mpsc::channel(4);
        let state = Arc::new(WebHookState {
            triggers: tx,
            active: Arc::new(AtomicBool::new(false)),
        });

        (app(state), rx)
    }

    #[rstest]
    #[case("/")]
    #[case("/any/path")]
    #[tokio::test]
    async fn test_post_fires_trigger(#[case] path: &str) {
        let (app, mut rx) = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get("content-type")
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"OK");

        let trigger = rx.try_recv().expect("Expected a trigger to fire");
        assert_eq!(trigger.source, SOURCE_NAME);
    }

    #[tokio::test]
    async fn test_other_methods_are_rejected() {
        let (app, mut rx) = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(rx.try_recv().is_err());
    }
}
