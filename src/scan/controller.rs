use std::{sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    api::{ScanResult, SubmissionApi},
    decoder::{CameraConfig, CameraDecoder, DecoderError, DecoderLease, DecoderStatus},
};

use super::{
    events::{EventSink, Notification, SessionEvent},
    policy::ScanPolicy,
    state::{
        ConfirmationDraft, DraftPatch, Effect, LocalValidationError, ScanEvent, ScanMode,
        ScanPhase, ScanSession, SessionInput, Submission, Transition,
    },
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Read-only view of the station handed to the UI shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub phase: ScanPhase,
    pub mode: ScanMode,
    pub cooldown_remaining: u32,
    pub last_accepted_code: Option<String>,
    pub last_result: Option<ScanResult>,
    pub last_error: Option<String>,
    pub validation_error: Option<LocalValidationError>,
    pub draft: Option<ConfirmationDraft>,
    pub decoder: DecoderStatus,
}

impl ScanSnapshot {
    fn capture(session: &ScanSession, decoder: &DecoderStatus) -> Self {
        Self {
            phase: session.phase().clone(),
            mode: session.mode(),
            cooldown_remaining: session.cooldown_remaining(),
            last_accepted_code: session.last_accepted_code().map(str::to_string),
            last_result: session.last_result().cloned(),
            last_error: session.last_error().map(str::to_string),
            validation_error: session.validation_error(),
            draft: session.draft().cloned(),
            decoder: decoder.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("scan session has been shut down")]
    Closed,
}

enum Command {
    /// Operator intent; answered with the snapshot after the transition.
    Intent(SessionInput, oneshot::Sender<ScanSnapshot>),
    /// Input produced by one of the session's own tasks.
    Input(SessionInput),
    Tick { generation: u64 },
    RestartDecoder(oneshot::Sender<ScanSnapshot>),
    DecoderAcquired(Result<DecoderLease, DecoderError>),
    DecoderFailed(DecoderError),
    DecoderClosed { generation: u64 },
}

/// Handle to one scan station. Cloning shares the same session; the session
/// is torn down on `shutdown` or when the last handle is dropped.
#[derive(Clone)]
pub struct ScanController {
    inbox: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ScanSnapshot>,
    shutdown: CancellationToken,
    actor: Arc<Mutex<Option<JoinHandle<()>>>>,
    _teardown_on_drop: Arc<DropGuard>,
}

impl ScanController {
    /// Spawns the session and makes one attempt to start the camera.
    pub fn mount(
        policy: ScanPolicy,
        decoder: Arc<dyn CameraDecoder>,
        api: Arc<dyn SubmissionApi>,
        sink: Arc<dyn EventSink>,
        camera: CameraConfig,
    ) -> Self {
        Self::mount_with_tick(policy, decoder, api, sink, camera, Duration::from_secs(1))
    }

    pub fn mount_with_tick(
        policy: ScanPolicy,
        decoder: Arc<dyn CameraDecoder>,
        api: Arc<dyn SubmissionApi>,
        sink: Arc<dyn EventSink>,
        camera: CameraConfig,
        tick_interval: Duration,
    ) -> Self {
        let (inbox, commands) = mpsc::unbounded_channel();
        let session = ScanSession::new();
        let (snapshot_tx, snapshots) =
            watch::channel(ScanSnapshot::capture(&session, &DecoderStatus::Stopped));
        let shutdown = CancellationToken::new();

        let actor = SessionActor {
            session,
            policy,
            decoder,
            api,
            sink,
            camera,
            decoder_status: DecoderStatus::Stopped,
            decoder_generation: 0,
            pump: None,
            ticker: None,
            ticker_generation: 0,
            tick_interval,
            inbox: inbox.clone(),
            snapshots: snapshot_tx,
            shutdown: shutdown.clone(),
        };

        log_info!("mounting scan session ({:?})", actor.policy.submit);
        let handle = tokio::spawn(actor.run(commands));

        Self {
            inbox,
            snapshots,
            shutdown: shutdown.clone(),
            actor: Arc::new(Mutex::new(Some(handle))),
            _teardown_on_drop: Arc::new(shutdown.drop_guard()),
        }
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.snapshots.clone()
    }

    pub async fn submit_manual_code(&self, text: impl Into<String>) -> Result<ScanSnapshot, ControllerError> {
        self.request(SessionInput::Scan(ScanEvent::manual(text))).await
    }

    pub async fn select_mode(&self, mode: ScanMode) -> Result<ScanSnapshot, ControllerError> {
        self.request(SessionInput::SelectMode(mode)).await
    }

    pub async fn update_draft(&self, patch: DraftPatch) -> Result<ScanSnapshot, ControllerError> {
        self.request(SessionInput::UpdateDraft(patch)).await
    }

    pub async fn confirm_submit(&self) -> Result<ScanSnapshot, ControllerError> {
        self.request(SessionInput::ConfirmSubmit).await
    }

    pub async fn cancel_confirmation(&self) -> Result<ScanSnapshot, ControllerError> {
        self.request(SessionInput::CancelConfirmation).await
    }

    pub async fn restart_decoder(&self) -> Result<ScanSnapshot, ControllerError> {
        self.ensure_open()?;
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Command::RestartDecoder(reply))
            .map_err(|_| ControllerError::Closed)?;
        response.await.map_err(|_| ControllerError::Closed)
    }

    /// Camera failure observed outside the decoder's own start call, e.g.
    /// permission revoked mid-stream.
    pub fn report_decoder_failure(&self, error: DecoderError) -> Result<(), ControllerError> {
        self.ensure_open()?;
        self.inbox
            .send(Command::DecoderFailed(error))
            .map_err(|_| ControllerError::Closed)
    }

    /// Stops the camera, cancels the cooldown and any in-flight submission,
    /// and waits for the session to exit. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.actor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log_error!("scan session task failed to join: {err}");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_open(&self) -> Result<(), ControllerError> {
        if self.shutdown.is_cancelled() {
            Err(ControllerError::Closed)
        } else {
            Ok(())
        }
    }

    async fn request(&self, input: SessionInput) -> Result<ScanSnapshot, ControllerError> {
        self.ensure_open()?;
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Command::Intent(input, reply))
            .map_err(|_| ControllerError::Closed)?;
        response.await.map_err(|_| ControllerError::Closed)
    }
}

struct DecoderPump {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the session. Every command is handled to completion before the next
/// one is read, so the session is never mutated concurrently.
struct SessionActor {
    session: ScanSession,
    policy: ScanPolicy,
    decoder: Arc<dyn CameraDecoder>,
    api: Arc<dyn SubmissionApi>,
    sink: Arc<dyn EventSink>,
    camera: CameraConfig,
    decoder_status: DecoderStatus,
    decoder_generation: u64,
    pump: Option<DecoderPump>,
    ticker: Option<JoinHandle<()>>,
    ticker_generation: u64,
    tick_interval: Duration,
    inbox: mpsc::UnboundedSender<Command>,
    snapshots: watch::Sender<ScanSnapshot>,
    shutdown: CancellationToken,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.acquire_decoder();
        self.publish();

        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.tear_down().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Intent(input, reply) => {
                let transition = self.session.apply(input, &self.policy);
                self.commit(transition);
                let _ = reply.send(self.snapshot());
            }
            Command::Input(input) => {
                let transition = self.session.apply(input, &self.policy);
                self.commit(transition);
            }
            Command::Tick { generation } => {
                if generation != self.ticker_generation {
                    return;
                }
                let transition = self.session.apply(SessionInput::Tick, &self.policy);
                self.commit(transition);
            }
            Command::RestartDecoder(reply) => {
                if self.decoder_status == DecoderStatus::Starting {
                    log_debug!("camera start already in progress");
                } else {
                    self.release_decoder().await;
                    self.acquire_decoder();
                    self.publish();
                }
                let _ = reply.send(self.snapshot());
            }
            Command::DecoderAcquired(result) => self.on_decoder_acquired(result),
            Command::DecoderFailed(error) => {
                log_warn!("camera failure reported: {error}");
                self.release_decoder().await;
                self.fail_decoder(error);
            }
            Command::DecoderClosed { generation } => {
                if generation == self.decoder_generation
                    && self.decoder_status == DecoderStatus::Active
                {
                    log_info!("camera stream ended");
                    if let Some(pump) = self.pump.take() {
                        let _ = pump.handle.await;
                    }
                    self.decoder_status = DecoderStatus::Stopped;
                    self.publish();
                }
            }
        }
    }

    fn commit(&mut self, transition: Transition) {
        let Transition { changed, effects } = transition;

        for effect in effects {
            match effect {
                Effect::Submit(submission) => self.spawn_submission(submission),
                Effect::StartCooldown => self.spawn_ticker(),
                Effect::StopCooldown => self.cancel_ticker(),
                Effect::Notify(notification) => self.notify(notification),
            }
        }

        if changed {
            self.publish();
        }
    }

    fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot::capture(&self.session, &self.decoder_status)
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshots.send_replace(snapshot.clone());
        self.sink.emit(SessionEvent::StateChanged(snapshot));
    }

    fn notify(&self, notification: Notification) {
        self.sink.emit(SessionEvent::Notification(notification));
    }

    fn spawn_submission(&self, submission: Submission) {
        let api = self.api.clone();
        let inbox = self.inbox.clone();
        let shutdown = self.shutdown.clone();
        let ticket = submission.ticket;
        let request = submission.request();

        log_info!(
            "submitting {} for '{}' (ticket {ticket})",
            submission.mode.as_str(),
            submission.code
        );

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log_debug!("dropping in-flight submission {ticket} on teardown");
                    return;
                }
                outcome = api.submit(request) => outcome,
            };

            let input = match outcome {
                Ok(result) => SessionInput::SubmissionSucceeded { ticket, result },
                Err(error) => {
                    log_warn!("submission {ticket} failed: {error:?}");
                    SessionInput::SubmissionFailed { ticket, error }
                }
            };

            // Session gone means the result has nowhere to land.
            let _ = inbox.send(Command::Input(input));
        });
    }

    fn spawn_ticker(&mut self) {
        self.cancel_ticker();
        self.ticker_generation = self.ticker_generation.wrapping_add(1);

        let generation = self.ticker_generation;
        let inbox = self.inbox.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if inbox.send(Command::Tick { generation }).is_err() {
                    break;
                }
            }
        });

        self.ticker = Some(handle);
    }

    fn cancel_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }

    fn acquire_decoder(&mut self) {
        self.decoder_status = DecoderStatus::Starting;

        let decoder = self.decoder.clone();
        let inbox = self.inbox.clone();
        let shutdown = self.shutdown.clone();
        let camera = self.camera.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                result = decoder.start(camera.facing, &camera.region) => result,
                _ = shutdown.cancelled() => {
                    decoder.stop();
                    return;
                }
            };

            let acquired = result.map(|frames| DecoderLease::new(decoder.clone(), frames));
            // If the session is gone the lease is dropped here, which stops
            // the camera again.
            let _ = inbox.send(Command::DecoderAcquired(acquired));
        });
    }

    fn on_decoder_acquired(&mut self, result: Result<DecoderLease, DecoderError>) {
        if self.decoder_status != DecoderStatus::Starting {
            log_debug!("discarding camera start result; no start pending");
            return;
        }

        match result {
            Ok(lease) => {
                log_info!("camera started");
                self.spawn_pump(lease);
                self.decoder_status = DecoderStatus::Active;
                self.publish();
            }
            Err(error) => {
                log_error!("camera failed to start: {error}");
                self.fail_decoder(error);
            }
        }
    }

    fn fail_decoder(&mut self, error: DecoderError) {
        let message = error.to_string();
        self.decoder_status = DecoderStatus::Error {
            message: message.clone(),
        };
        self.notify(Notification::error(message));
        self.publish();
    }

    fn spawn_pump(&mut self, mut lease: DecoderLease) {
        self.decoder_generation = self.decoder_generation.wrapping_add(1);

        let generation = self.decoder_generation;
        let inbox = self.inbox.clone();
        let stop = self.shutdown.child_token();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let ended = loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break false,
                    text = lease.next_text() => match text {
                        Some(text) => {
                            let event = ScanEvent::camera(text);
                            if inbox.send(Command::Input(SessionInput::Scan(event))).is_err() {
                                break false;
                            }
                        }
                        None => break true,
                    },
                }
            };

            // Stop this stream before anyone can start the next one.
            drop(lease);
            if ended {
                let _ = inbox.send(Command::DecoderClosed { generation });
            }
        });

        self.pump = Some(DecoderPump { stop, handle });
    }

    /// Returns once the pump task, and with it the lease, is gone; a lease
    /// dropped later would stop whatever stream was started after it.
    async fn release_decoder(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.stop.cancel();
            pump.handle.abort();
            let _ = pump.handle.await;
        }
        self.decoder.stop();
        self.decoder_status = DecoderStatus::Stopped;
    }

    async fn tear_down(&mut self) {
        log_info!("tearing down scan session");
        let transition = self.session.apply(SessionInput::TearDown, &self.policy);
        if transition.effects.contains(&Effect::StopCooldown) {
            self.cancel_ticker();
        }
        self.release_decoder().await;
    }
}
