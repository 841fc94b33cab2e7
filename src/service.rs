//! # Tracking Service
//!
//! Runs a [`TrackingEngine`] and its [`LocationWatcher`] on a tokio task.
//!
//! Everything that changes state is a message on one unbounded channel:
//! UI commands from [`TrackingHandle`], live samples from the watcher
//! callback, and foreground reconciliation. The task consumes messages
//! strictly in receipt order, so a background replay never interleaves
//! with live samples.

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::background::resume_foreground;
use crate::engine::{Command, CommandOutcome, TrackingEngine, TrackingState};
use crate::ingestion::{LocationProvider, LocationWatcher, PermissionLevel};
use crate::{LocationSample, Result, TrackingError, UnitSystem};

enum Message {
    Command {
        command: Command,
        reply: Option<oneshot::Sender<CommandOutcome>>,
    },
    EnterBackground,
    RequestPermissions(oneshot::Sender<PermissionLevel>),
    Snapshot(oneshot::Sender<TrackingState>),
    Shutdown,
}

/// Owns the engine and watcher for the lifetime of the task.
pub struct TrackingService<P: LocationProvider> {
    engine: TrackingEngine,
    watcher: LocationWatcher<P>,
    rx: mpsc::UnboundedReceiver<Message>,
    /// Weak so the loop ends once every handle is dropped
    tx: mpsc::WeakUnboundedSender<Message>,
}

impl<P: LocationProvider + 'static> TrackingService<P> {
    /// Spawn the service on the current runtime.
    ///
    /// The join handle yields the engine back after shutdown.
    pub fn spawn(
        engine: TrackingEngine,
        watcher: LocationWatcher<P>,
    ) -> (TrackingHandle, JoinHandle<TrackingEngine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            engine,
            watcher,
            rx,
            tx: tx.downgrade(),
        };
        let task = tokio::spawn(service.run());
        (TrackingHandle { tx }, task)
    }

    async fn run(mut self) -> TrackingEngine {
        info!("[TrackingService] Started");
        while let Some(message) = self.rx.recv().await {
            match message {
                Message::Command { command, reply } => {
                    let outcome = self.apply(command);
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                Message::EnterBackground => self.enter_background(),
                Message::RequestPermissions(reply) => {
                    let _ = reply.send(self.watcher.request_permissions());
                }
                Message::Snapshot(reply) => {
                    let _ = reply.send(self.engine.snapshot());
                }
                Message::Shutdown => break,
            }
        }

        self.watcher.cleanup();
        info!("[TrackingService] Stopped");
        self.engine
    }

    fn apply(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::Start => self.start(),
            Command::Stop => {
                self.watcher.stop_watching();
                self.watcher.stop_background_tracking();
                self.engine.dispatch(Command::Stop)
            }
            Command::Foreground => {
                let (on_sample, on_error) = self.sinks();
                resume_foreground(&mut self.engine, &mut self.watcher, on_sample, on_error)
            }
            other => self.engine.dispatch(other),
        }
    }

    /// Subscribe first; the session only starts if the stream does.
    ///
    /// A failed subscription is reported once, by the watcher through the
    /// error sink, so it lands in the state behind this command.
    fn start(&mut self) -> CommandOutcome {
        if self.engine.is_tracking() {
            return self.engine.dispatch(Command::Start);
        }

        let (on_sample, on_error) = self.sinks();
        let interval = self.engine.config().update_interval_ms;
        if !self.watcher.start_watching(on_sample, on_error, interval) {
            return CommandOutcome::Failed(TrackingError::provider(
                "Failed to start location tracking",
            ));
        }
        self.engine.dispatch(Command::Start)
    }

    fn enter_background(&mut self) {
        self.watcher.stop_watching();
        if self.engine.is_tracking() && !self.watcher.start_background_tracking() {
            debug!("[TrackingService] Continuing without background delivery");
        }
    }

    /// Callbacks that feed watcher output back into the channel.
    fn sinks(
        &self,
    ) -> (
        impl FnMut(LocationSample) + Send + 'static,
        impl FnMut(String) + Send + 'static,
    ) {
        let samples = self.tx.clone();
        let errors = self.tx.clone();

        let on_sample = move |sample: LocationSample| {
            send_weak(&samples, Command::SampleArrived(sample));
        };
        let on_error = move |message: String| {
            send_weak(&errors, Command::ReportError(message));
        };
        (on_sample, on_error)
    }
}

fn send_weak(tx: &mpsc::WeakUnboundedSender<Message>, command: Command) {
    let Some(tx) = tx.upgrade() else {
        return;
    };
    if tx
        .send(Message::Command {
            command,
            reply: None,
        })
        .is_err()
    {
        warn!("[TrackingService] Dropped message after shutdown");
    }
}

/// Cloneable front end for a running [`TrackingService`].
#[derive(Clone)]
pub struct TrackingHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl TrackingHandle {
    /// Queue a command without waiting for it to be applied.
    pub fn send(&self, command: Command) -> Result<()> {
        self.post(Message::Command {
            command,
            reply: None,
        })
    }

    /// Queue a command and wait for its outcome.
    pub async fn execute(&self, command: Command) -> Result<CommandOutcome> {
        let (reply, rx) = oneshot::channel();
        self.post(Message::Command {
            command,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn start(&self) -> Result<CommandOutcome> {
        self.execute(Command::Start).await
    }

    pub async fn stop(&self) -> Result<CommandOutcome> {
        self.execute(Command::Stop).await
    }

    pub fn sample(&self, sample: LocationSample) -> Result<()> {
        self.send(Command::SampleArrived(sample))
    }

    /// App returned to the foreground.
    pub async fn foreground(&self) -> Result<CommandOutcome> {
        self.execute(Command::Foreground).await
    }

    /// App moved to the background. Live capture hands over to the
    /// background task.
    pub fn background(&self) -> Result<()> {
        self.post(Message::EnterBackground)
    }

    pub async fn set_unit_system(&self, unit: UnitSystem) -> Result<CommandOutcome> {
        self.execute(Command::SetUnitSystem(unit)).await
    }

    pub async fn request_permissions(&self) -> Result<PermissionLevel> {
        let (reply, rx) = oneshot::channel();
        self.post(Message::RequestPermissions(reply))?;
        rx.await.map_err(|_| stopped())
    }

    /// State after every message queued before this call.
    pub async fn snapshot(&self) -> Result<TrackingState> {
        let (reply, rx) = oneshot::channel();
        self.post(Message::Snapshot(reply))?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the service after already-queued messages.
    pub fn shutdown(&self) -> Result<()> {
        self.post(Message::Shutdown)
    }

    fn post(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| stopped())
    }
}

fn stopped() -> TrackingError {
    TrackingError::InvalidState {
        message: "tracking service is not running".to_string(),
    }
}
