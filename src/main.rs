//! keyflow-daemon: Background daemon for keyboard workflows on macOS
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Global key interception via CGEventTap
//! - A sequence matcher resolving chord sequences to workflows
//! - A command dispatcher running the matched workflow's commands
//! - IPC server for configuration, application signals and UI events

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use keyflow::config::Config;
use keyflow::dispatch::{Dispatcher, SystemExecutor};
use keyflow::events::EngineEvent;
use keyflow::hotkey::HotkeyListener;
use keyflow::ipc::Server;
use keyflow::lifecycle::ShutdownSignal;
use keyflow::state::{Engine, SequenceMatcher};
use keyflow::workflow::Configuration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "keyflow-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.workflows_path, "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Create channels for inter-component communication
    // Matcher and engine -> dispatcher
    let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
    // Engine, matcher and dispatcher -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<EngineEvent>(256);
    // IPC server -> engine
    let (input_tx, input_rx) = mpsc::channel(32);

    let matcher = Arc::new(Mutex::new(SequenceMatcher::new(
        config.reset_interval,
        dispatch_tx.clone(),
        event_tx.clone(),
    )));

    let configuration = match Configuration::load(&config.workflows_path) {
        Ok(Some(configuration)) => {
            info!(workflows = configuration.workflow_count(), "workflow snapshot loaded");
            configuration
        }
        Ok(None) => {
            info!("no workflow snapshot, waiting for configuration over IPC");
            Configuration::default()
        }
        Err(e) => {
            warn!(?e, "failed to load workflow snapshot");
            Configuration::default()
        }
    };

    let engine = Engine::new(Arc::clone(&matcher), dispatch_tx, event_tx.clone())
        .with_configuration(configuration);
    let dispatcher = Dispatcher::new(Arc::new(SystemExecutor::new()), event_tx.clone());

    tokio::spawn(dispatcher.run(dispatch_rx));
    tokio::spawn(engine.run(input_rx));

    // Create IPC server and track engine events for its status
    let server = Server::new(&config.socket_path, input_tx, event_tx.clone())?;
    let mut ipc_event_rx = event_tx.subscribe();

    // Create the listener; it runs on a dedicated thread once registered
    let hotkey_listener = HotkeyListener::new(Arc::clone(&matcher));

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the event tap installed
        _ = keep_registered(&hotkey_listener, config.registration_retry, &event_tx) => {}

        // Handle engine events for IPC status
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        debug!(%event, "engine event");
                        server.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "engine event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("engine event handler exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => match result {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(?e, "failed to register signal handlers"),
        },
    }

    // Cleanup
    info!("shutting down...");

    hotkey_listener.stop();
    server.shutdown().await;

    info!("keyflow-daemon stopped");

    Ok(())
}

/// Install the event tap and reinstall it whenever the listener stops,
/// retrying on a fixed interval. Never returns.
async fn keep_registered(
    listener: &HotkeyListener,
    retry: Duration,
    event_tx: &broadcast::Sender<EngineEvent>,
) {
    let mut available = None;

    loop {
        if !listener.is_running() {
            match tokio::task::block_in_place(|| listener.start()) {
                Ok(()) => {
                    info!("hotkey listener started");
                    available = Some(true);
                    let _ = event_tx.send(EngineEvent::InterceptionStarted);
                }
                Err(e) => {
                    if available != Some(false) {
                        error!(%e, "failed to start hotkey listener");
                        warn!(?retry, "retrying registration - check Accessibility permissions");
                        let _ = event_tx.send(EngineEvent::InterceptionUnavailable {
                            reason: e.to_string(),
                        });
                    }
                    available = Some(false);
                }
            }
        }

        tokio::time::sleep(retry).await;
    }
}
