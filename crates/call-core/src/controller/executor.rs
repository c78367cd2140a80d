//! Effect execution
//!
//! Audio effects run inline. Native UI and signaling requests are spawned,
//! bounded by their configured timeouts, and report back through the
//! completion source so the event loop never waits on them.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::state_machine::{AudioCommand, Effect};
use super::timers::TimerSet;
use crate::audio::AudioCoordinator;
use crate::call::{CallDirection, CallId, FinishReason, Party};
use crate::config::CallConfig;
use crate::error::{ActionError, ActionResult, NativeUiError, SignalingError};
use crate::events::{CallEvent, Completion, SourceSender};
use crate::lifecycle::LifecycleDispatcher;
use crate::recovery::with_timeout;
use crate::signaling::{SignalingAction, SignalingHandle, SignalingTransport};
use crate::telephony::NativeTelephonyAdapter;

/// Immutable facts about the call the executor needs for requests
#[derive(Debug, Clone)]
pub(crate) struct CallFacts {
    pub(crate) id: CallId,
    pub(crate) direction: CallDirection,
    pub(crate) caller: Party,
    pub(crate) receptor: Party,
}

/// Work left once the call reached `Finished`
#[derive(Debug)]
struct Teardown {
    reason: FinishReason,
    final_signal: Option<SignalingAction>,
}

pub(crate) struct EffectExecutor {
    facts: CallFacts,
    config: CallConfig,
    audio: AudioCoordinator,
    telephony: Arc<dyn NativeTelephonyAdapter>,
    signaling: Arc<dyn SignalingTransport>,
    signaling_handle: SignalingHandle,
    completions: SourceSender,
    pub(crate) timers: TimerSet,
    lifecycle: LifecycleDispatcher,
    teardown: Option<Teardown>,
}

impl EffectExecutor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        facts: CallFacts,
        config: CallConfig,
        audio: AudioCoordinator,
        telephony: Arc<dyn NativeTelephonyAdapter>,
        signaling: Arc<dyn SignalingTransport>,
        signaling_handle: SignalingHandle,
        completions: SourceSender,
        timers: TimerSet,
        lifecycle: LifecycleDispatcher,
    ) -> Self {
        Self {
            facts,
            config,
            audio,
            telephony,
            signaling,
            signaling_handle,
            completions,
            timers,
            lifecycle,
            teardown: None,
        }
    }

    /// Apply effects in order
    pub(crate) fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            if self.teardown.is_some() && !matches!(effect, Effect::Notify(_)) {
                debug!(call_id = %self.facts.id, ?effect, "Call finished, dropping effect");
                continue;
            }
            self.execute_one(effect);
        }
    }

    fn execute_one(&mut self, effect: Effect) {
        match effect {
            Effect::Audio(command) => self.apply_audio(command),
            Effect::PresentOutgoing => {
                let (telephony, id, party) = self.native_args(&self.facts.receptor);
                self.spawn_native("present_outgoing", Completion::Presented, async move {
                    telephony.present_outgoing(&id, &party).await
                });
            }
            Effect::PresentIncoming => {
                let (telephony, id, party) = self.native_args(&self.facts.caller);
                self.spawn_native("present_incoming", Completion::Presented, async move {
                    telephony.present_incoming(&id, &party).await
                });
            }
            Effect::ReflectMute { seq, muted } => {
                let telephony = self.telephony.clone();
                let id = self.facts.id.clone();
                self.spawn_native(
                    "reflect_mute",
                    move |result| Completion::MuteReflected { seq, muted, result },
                    async move { telephony.reflect_mute(&id, muted).await },
                );
            }
            Effect::RequestNativeEnd => {
                let telephony = self.telephony.clone();
                let id = self.facts.id.clone();
                self.spawn_native("request_end", Completion::EndRequested, async move {
                    telephony.request_end(&id).await
                });
            }
            Effect::Signal(action) => self.spawn_signal(action),
            Effect::ArmTimer(kind) => {
                self.timers.arm(kind, self.config.timer_duration(kind));
            }
            Effect::CancelTimer(kind) => self.timers.cancel(kind),
            Effect::Notify(event) => self.lifecycle.publish(event),
            Effect::Finish {
                reason,
                final_signal,
            } => {
                self.timers.cancel_all();
                self.audio.stop();
                self.teardown = Some(Teardown {
                    reason,
                    final_signal,
                });
            }
        }
    }

    fn apply_audio(&mut self, command: AudioCommand) {
        match command {
            AudioCommand::ApplyStatus(status) => {
                self.audio.apply_status(status, self.facts.direction)
            }
            AudioCommand::PlayIndicator(sound) => self.audio.play_indicator_sound(sound),
            AudioCommand::SetMute(muted) => self.audio.set_mute(muted),
            AudioCommand::SetSpeaker(enabled) => self.audio.set_speaker(enabled),
            AudioCommand::SetSessionActive(active) => self.audio.set_session_active(active),
        }
    }

    fn native_args(&self, party: &Party) -> (Arc<dyn NativeTelephonyAdapter>, CallId, Party) {
        (self.telephony.clone(), self.facts.id.clone(), party.clone())
    }

    fn spawn_native<F, W>(&self, operation: &'static str, wrap: W, request: F)
    where
        F: Future<Output = Result<(), NativeUiError>> + Send + 'static,
        W: FnOnce(ActionResult<()>) -> Completion + Send + 'static,
    {
        let timeout = self.config.native_request_timeout();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = flatten_native(operation, with_timeout(operation, timeout, request).await);
            completions.send(CallEvent::Completion(wrap(result)));
        });
    }

    fn spawn_signal(&self, action: SignalingAction) {
        let signaling = self.signaling.clone();
        let handle = self.signaling_handle.clone();
        let timeout = self.config.signaling_request_timeout();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let sent = with_timeout(action.name(), timeout, signaling.send(&handle, action)).await;
            let result = flatten_signaling(action.name(), sent);
            completions.send(CallEvent::Completion(Completion::SignalingSent { action, result }));
        });
    }

    /// Finish the outside-world part of the teardown.
    ///
    /// Runs after the event loop has stopped taking events; failures are
    /// logged and otherwise ignored.
    pub(crate) async fn teardown(&mut self) {
        let Some(teardown) = self.teardown.take() else {
            return;
        };
        let id = self.facts.id.clone();

        let report = {
            let telephony = self.telephony.clone();
            let timeout = self.config.native_request_timeout();
            let id = id.clone();
            let reason = teardown.reason.clone();
            async move {
                let reported = with_timeout("report_ended", timeout, telephony.report_ended(&id, &reason)).await;
                flatten_native("report_ended", reported)
            }
        };

        let signal = {
            let signaling = self.signaling.clone();
            let handle = self.signaling_handle.clone();
            let timeout = self.config.signaling_request_timeout();
            async move {
                let mut result = Ok(());
                if let Some(action) = teardown.final_signal {
                    let sent = with_timeout(action.name(), timeout, signaling.send(&handle, action)).await;
                    result = flatten_signaling(action.name(), sent);
                }
                signaling.close(&handle).await;
                result
            }
        };

        let (reported, signaled) = tokio::join!(report, signal);
        if let Err(e) = &reported {
            warn!(call_id = %id, error = %e, "Native end report failed");
        }
        if let Err(e) = &signaled {
            debug!(call_id = %id, error = %e, "Final signaling action failed");
        }
        // completion lands on a closed queue and is discarded
        self.completions
            .send(CallEvent::Completion(Completion::EndReported(reported)));
        info!(call_id = %id, "Call torn down");
    }
}

fn flatten_native(
    operation: &str,
    result: Result<Result<(), NativeUiError>, ActionError>,
) -> ActionResult<()> {
    result?.map_err(|e| ActionError::native(operation, e.message))
}

fn flatten_signaling(
    operation: &str,
    result: Result<Result<(), SignalingError>, ActionError>,
) -> ActionResult<()> {
    result?.map_err(|e| ActionError::signaling(operation, e.to_string()))
}

impl std::fmt::Debug for EffectExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectExecutor")
            .field("call_id", &self.facts.id)
            .field("audio", &self.audio)
            .field("finished", &self.teardown.is_some())
            .finish()
    }
}
