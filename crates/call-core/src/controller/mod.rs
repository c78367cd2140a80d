//! Call session controller
//!
//! [`CallSessionController`] owns one [`Call`] for its whole life. After a
//! successful [`start`](CallSessionController::start) a single task consumes
//! the call's event queue, feeds each event to the [`CallStateMachine`] and
//! hands the resulting effects to the executor before taking the next event.
//!
//! ```text
//! signaling ─┐
//! native UI ─┼─► CallEventSource ─► event loop ─► CallStateMachine ─► effects
//! commands  ─┤                          ▲                              │
//! timers    ─┘                          └──────── completions ◄────────┘
//! ```

mod executor;
pub mod state_machine;
mod timers;

pub use state_machine::{AudioCommand, CallStateMachine, Effect};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, AudioCoordinator};
use crate::call::{Call, CallId, CallSnapshot, CallStatus};
use crate::config::CallConfig;
use crate::error::{ActionError, ActionResult, SetupError, SetupResult};
use crate::events::{
    CallCommand, CallEvent, CallEventSource, EventReceiver, EventSource, NativeUiSender,
    SignalingSender, SourceSender, SourcedEvent,
};
use crate::lifecycle::{CallLifecycleListener, LifecycleDispatcher, LifecycleEvent};
use crate::recovery::{retry_with_backoff, with_timeout};
use crate::signaling::{OpenRequest, SignalingHandle, SignalingTransport};
use crate::state_table::{MasterStateTable, MASTER_TABLE};
use crate::telephony::NativeTelephonyAdapter;

use executor::{CallFacts, EffectExecutor};
use timers::TimerSet;

/// Where the controller is in its own life, independent of the call status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    /// Constructed, `start` not called yet
    Idle,
    /// Signaling handshake in progress
    Starting,
    /// Event loop running
    Running,
    /// Disposed; nothing more will happen
    Closed,
}

struct Shared {
    phase: Mutex<ControllerPhase>,
    call_id: Mutex<Option<CallId>>,
    snapshot_tx: watch::Sender<Option<CallSnapshot>>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    fn close(&self) {
        *self.phase.lock() = ControllerPhase::Closed;
        self.closed_tx.send_replace(true);
    }
}

/// Drives exactly one call from `start` to disposal
pub struct CallSessionController {
    config: CallConfig,
    telephony: Arc<dyn NativeTelephonyAdapter>,
    signaling: Arc<dyn SignalingTransport>,
    audio_backend: Arc<dyn AudioBackend>,
    table: Arc<MasterStateTable>,
    source: Mutex<CallEventSource>,
    commands: SourceSender,
    lifecycle: LifecycleDispatcher,
    shared: Arc<Shared>,
}

impl CallSessionController {
    pub fn new(
        config: CallConfig,
        telephony: Arc<dyn NativeTelephonyAdapter>,
        signaling: Arc<dyn SignalingTransport>,
        audio_backend: Arc<dyn AudioBackend>,
    ) -> Self {
        let source = CallEventSource::new();
        let commands = source.sender(EventSource::Command);
        let lifecycle = LifecycleDispatcher::new(config.lifecycle_channel_capacity, None);
        let (snapshot_tx, _) = watch::channel(None);
        let (closed_tx, _) = watch::channel(false);

        Self {
            config,
            telephony,
            signaling,
            audio_backend,
            table: MASTER_TABLE.clone(),
            source: Mutex::new(source),
            commands,
            lifecycle,
            shared: Arc::new(Shared {
                phase: Mutex::new(ControllerPhase::Idle),
                call_id: Mutex::new(None),
                snapshot_tx,
                closed_tx,
            }),
        }
    }

    /// Register the UI listener; replaces any earlier one
    pub fn with_listener(mut self, listener: Arc<dyn CallLifecycleListener>) -> Self {
        self.lifecycle =
            LifecycleDispatcher::new(self.config.lifecycle_channel_capacity, Some(listener));
        self
    }

    /// Attach to a freshly built call, open its signaling channel and start
    /// consuming events.
    ///
    /// A hangup-equivalent event arriving while the handshake is in flight
    /// cancels the start with [`SetupError::Cancelled`]; the call never enters
    /// its first status.
    pub async fn start(&self, mut call: Call) -> SetupResult<()> {
        {
            let mut phase = self.shared.phase.lock();
            if *phase != ControllerPhase::Idle || call.is_started() {
                warn!(call_id = %call.id(), phase = ?*phase, "Controller already has a call");
                return Err(SetupError::CallAlreadyActive {
                    active: self.call_id().unwrap_or_else(|| call.id().clone()),
                });
            }
            *phase = ControllerPhase::Starting;
        }

        let call_id = call.id().clone();
        *self.shared.call_id.lock() = Some(call_id.clone());

        let (rx, updates, timer_tx, completion_tx) = {
            let mut source = self.source.lock();
            source.bind(&call_id);
            (
                source.take_receiver(),
                source.signaling_sender(),
                source.sender(EventSource::Timer),
                source.sender(EventSource::Completion),
            )
        };
        let Some(mut rx) = rx else {
            self.shared.close();
            return Err(SetupError::CallAlreadyActive { active: call_id });
        };

        info!(call_id = %call_id, direction = %call.direction(), "Starting call session");

        let request = OpenRequest {
            call_id: call_id.clone(),
            direction: call.direction(),
            access_token: call.access_token().clone(),
            remote_handle: call.remote_party().handle.clone(),
        };
        let signaling = self.signaling.clone();
        let retry = self.config.signaling_retry.clone();
        let open = with_timeout(
            "signaling_open",
            self.config.signaling_connect_timeout(),
            retry_with_backoff("signaling_open", &retry, || {
                signaling.open(request.clone(), updates.clone())
            }),
        );
        tokio::pin!(open);

        let mut early = Vec::new();
        let opened = loop {
            tokio::select! {
                biased;

                Some(event) = rx.recv() => {
                    if event.event.is_hangup_equivalent() {
                        info!(call_id = %call_id, event = %event.event.name(), "Call setup cancelled");
                        self.abort_start(rx, early);
                        return Err(SetupError::Cancelled);
                    }
                    early.push(event);
                }
                result = &mut open => break result,
            }
        };

        let handle = match opened {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(call_id = %call_id, error = %e, "Signaling handshake failed");
                self.abort_start(rx, early);
                return Err(SetupError::unreachable(e.to_string()));
            }
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "Signaling handshake timed out");
                self.abort_start(rx, early);
                return Err(SetupError::unreachable(e.to_string()));
            }
        };

        while let Ok(event) = rx.try_recv() {
            if event.event.is_hangup_equivalent() {
                info!(call_id = %call_id, event = %event.event.name(), "Call setup cancelled after handshake");
                self.signaling.close(&handle).await;
                self.abort_start(rx, early);
                return Err(SetupError::Cancelled);
            }
            early.push(event);
        }

        call.attach_signaling(handle.clone());
        let facts = CallFacts {
            id: call_id.clone(),
            direction: call.direction(),
            caller: call.caller().clone(),
            receptor: call.receptor().clone(),
        };
        let mut machine = CallStateMachine::new(call, self.table.clone());
        let mut executor = EffectExecutor::new(
            facts,
            self.config.clone(),
            AudioCoordinator::new(self.audio_backend.clone()),
            self.telephony.clone(),
            self.signaling.clone(),
            handle,
            completion_tx,
            TimerSet::new(timer_tx),
            self.lifecycle.clone(),
        );

        let effects = machine.start();
        executor.execute(effects);
        self.shared.snapshot_tx.send_replace(machine.snapshot());
        *self.shared.phase.lock() = ControllerPhase::Running;

        tokio::spawn(run_event_loop(
            machine,
            executor,
            rx,
            early,
            self.shared.clone(),
        ));
        Ok(())
    }

    fn abort_start(&self, mut rx: EventReceiver, early: Vec<SourcedEvent>) {
        rx.close();
        let pending = std::iter::from_fn(|| rx.try_recv().ok());
        for event in early.into_iter().chain(pending) {
            event.event.reject_replies(ActionError::CallFinished);
        }
        self.shared.close();
    }

    /// Inject an event from any source
    pub fn handle(&self, event: CallEvent) -> bool {
        let source = match &event {
            CallEvent::Signaling(_) => EventSource::Signaling,
            CallEvent::Native(_) => EventSource::NativeUi,
            CallEvent::Command(_) => EventSource::Command,
            CallEvent::Timer { .. } => EventSource::Timer,
            CallEvent::Completion(_) => EventSource::Completion,
        };
        self.source.lock().sender(source).send(event)
    }

    /// Answer a ringing inbound call
    pub fn accept(&self) -> bool {
        self.command(CallCommand::Answer)
    }

    /// End the call through the native UI; falls back to a local hangup
    /// when the native layer cannot confirm in time
    pub fn hangup(&self) -> bool {
        self.command(CallCommand::Hangup)
    }

    /// End the call locally without going through the native UI
    pub fn request_hangup(&self) -> bool {
        self.command(CallCommand::RequestHangup)
    }

    /// Set the mute state; resolves with the confirmed state once the native
    /// UI reflected it, or with the error that made the request revert
    pub async fn request_mute(&self, muted: bool) -> ActionResult<bool> {
        self.mute_command(|reply| CallCommand::SetMute {
            muted,
            reply: Some(reply),
        })
        .await
    }

    pub async fn toggle_mute(&self) -> ActionResult<bool> {
        self.mute_command(|reply| CallCommand::ToggleMute { reply: Some(reply) })
            .await
    }

    pub fn toggle_speaker(&self) -> bool {
        self.command(CallCommand::ToggleSpeaker)
    }

    /// Tear the call down. Safe to call any number of times.
    pub fn dispose(&self) {
        let mut phase = self.shared.phase.lock();
        match *phase {
            ControllerPhase::Idle => {
                *phase = ControllerPhase::Closed;
                drop(phase);
                if let Some(mut rx) = self.source.lock().take_receiver() {
                    rx.close();
                    while let Ok(event) = rx.try_recv() {
                        event.event.reject_replies(ActionError::CallFinished);
                    }
                }
                self.shared.closed_tx.send_replace(true);
                debug!("Disposed idle controller");
            }
            ControllerPhase::Starting | ControllerPhase::Running => {
                drop(phase);
                self.commands.send(CallEvent::Command(CallCommand::Dispose));
            }
            ControllerPhase::Closed => {}
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        *self.shared.phase.lock()
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.shared.call_id.lock().clone()
    }

    /// Latest read-only view of the call; `None` before the call started
    pub fn snapshot(&self) -> Option<CallSnapshot> {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// Wait until the call reaches `status`.
    ///
    /// Returns `None` if the controller closes, or the call finishes, without
    /// ever being in `status`.
    pub async fn wait_for_status(&self, status: CallStatus) -> Option<CallSnapshot> {
        let mut snapshots = self.shared.snapshot_tx.subscribe();
        let mut closed = self.shared.closed_tx.subscribe();

        let reached = tokio::select! {
            reached = snapshots.wait_for(|s| {
                s.as_ref()
                    .is_some_and(|s| s.status == status || s.status == CallStatus::Finished)
            }) => reached.ok().and_then(|s| s.clone()),
            _ = closed.wait_for(|c| *c) => self.snapshot(),
        };
        reached.filter(|s| s.status == status)
    }

    /// Stream of lifecycle events for this controller
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Resolves once the controller is closed and teardown has completed
    pub async fn closed(&self) {
        let mut closed = self.shared.closed_tx.subscribe();
        let _ = closed.wait_for(|c| *c).await;
    }

    /// Sender for the native telephony adapter's callbacks
    pub fn native_ui_sender(&self) -> NativeUiSender {
        self.source.lock().native_ui_sender()
    }

    /// Sender for remote signaling updates
    pub fn signaling_sender(&self) -> SignalingSender {
        self.source.lock().signaling_sender()
    }

    fn command(&self, command: CallCommand) -> bool {
        self.commands.send(CallEvent::Command(command))
    }

    async fn mute_command<F>(&self, build: F) -> ActionResult<bool>
    where
        F: FnOnce(oneshot::Sender<ActionResult<bool>>) -> CallCommand,
    {
        if matches!(self.phase(), ControllerPhase::Idle | ControllerPhase::Closed) {
            return Err(ActionError::CallFinished);
        }
        let (tx, rx) = oneshot::channel();
        self.command(build(tx));
        rx.await.unwrap_or(Err(ActionError::CallFinished))
    }
}

impl Drop for CallSessionController {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for CallSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSessionController")
            .field("phase", &self.phase())
            .field("call_id", &self.call_id())
            .finish()
    }
}

async fn run_event_loop(
    mut machine: CallStateMachine,
    mut executor: EffectExecutor,
    mut rx: EventReceiver,
    early: Vec<SourcedEvent>,
    shared: Arc<Shared>,
) {
    let call_id = machine.call().id().clone();
    debug!(call_id = %call_id, early = early.len(), "Event loop started");

    for event in early {
        dispatch(&mut machine, &mut executor, event, &shared);
    }
    while !machine.is_finished() {
        let Some(event) = rx.recv().await else {
            break;
        };
        dispatch(&mut machine, &mut executor, event, &shared);
    }

    rx.close();
    while let Ok(event) = rx.try_recv() {
        debug!(call_id = %call_id, event = %event.event.name(), "Discarding event after finish");
        event.event.reject_replies(ActionError::CallFinished);
    }

    executor.teardown().await;
    shared.close();
    info!(call_id = %call_id, "Call session closed");
}

fn dispatch(
    machine: &mut CallStateMachine,
    executor: &mut EffectExecutor,
    sourced: SourcedEvent,
    shared: &Shared,
) {
    if let CallEvent::Timer { kind, generation } = &sourced.event {
        if !executor.timers.take_if_current(*kind, *generation) {
            debug!(timer = %kind, generation, "Stale timer, ignoring");
            return;
        }
    }

    let effects = machine.handle(sourced.source, sourced.event);
    executor.execute(effects);
    shared.snapshot_tx.send_replace(machine.snapshot());
}
