//! The `Call` entity
//!
//! A [`Call`] is created from a validated [`CallInit`] and from then on is
//! owned by exactly one [`CallSessionController`](crate::controller::CallSessionController).
//! Everything outside the controller sees it through [`CallSnapshot`]s.

pub mod types;

pub use types::{
    AccessToken, CallDirection, CallId, CallSnapshot, CallStatus, FinishReason, MediaLeg,
    MediaState, Party,
};

use chrono::{DateTime, Utc};

use crate::registry::CallSlot;
use crate::signaling::SignalingHandle;

/// Validated, immutable part of a call produced by session setup
#[derive(Debug)]
pub struct CallInit {
    pub id: CallId,
    pub direction: CallDirection,
    pub access_token: AccessToken,
    pub caller: Party,
    pub receptor: Party,
    slot: CallSlot,
}

impl CallInit {
    /// Build the init record for the call that owns `slot`
    pub fn new(
        slot: CallSlot,
        direction: CallDirection,
        access_token: AccessToken,
        caller: Party,
        receptor: Party,
    ) -> Self {
        Self {
            id: slot.call_id().clone(),
            direction,
            access_token,
            caller,
            receptor,
            slot,
        }
    }

    pub fn slot(&self) -> &CallSlot {
        &self.slot
    }

    /// Handle of the party on the other end
    pub fn remote_handle(&self) -> &str {
        match self.direction {
            CallDirection::Outbound => &self.receptor.handle,
            CallDirection::Inbound => &self.caller.handle,
        }
    }
}

/// One live call session
#[derive(Debug)]
pub struct Call {
    id: CallId,
    direction: CallDirection,
    caller: Party,
    receptor: Party,
    status: Option<CallStatus>,
    /// Status interrupted by a transport flush
    flushed_from: Option<CallStatus>,
    caller_media_state: MediaState,
    receptor_media_state: MediaState,
    access_token: AccessToken,
    signaling_handle: Option<SignalingHandle>,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    finish_reason: Option<FinishReason>,
    slot: Option<CallSlot>,
}

impl Call {
    pub fn new(init: CallInit) -> Self {
        Self {
            id: init.id,
            direction: init.direction,
            caller: init.caller,
            receptor: init.receptor,
            status: None,
            flushed_from: None,
            caller_media_state: MediaState::Connecting,
            receptor_media_state: MediaState::Connecting,
            access_token: init.access_token,
            signaling_handle: None,
            created_at: Utc::now(),
            ended_at: None,
            finish_reason: None,
            slot: Some(init.slot),
        }
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn caller(&self) -> &Party {
        &self.caller
    }

    pub fn receptor(&self) -> &Party {
        &self.receptor
    }

    /// The party on the other end from this device's point of view
    pub fn remote_party(&self) -> &Party {
        match self.direction {
            CallDirection::Outbound => &self.receptor,
            CallDirection::Inbound => &self.caller,
        }
    }

    /// Current status; `None` until the controller has started the call
    pub fn status(&self) -> Option<CallStatus> {
        self.status
    }

    pub fn is_started(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.status == Some(CallStatus::Finished)
    }

    pub fn flushed_from(&self) -> Option<CallStatus> {
        self.flushed_from
    }

    /// Whether media leg updates apply in the current status. While flushed
    /// this follows the interrupted status so legs keep being tracked.
    pub fn tracks_media(&self) -> bool {
        match self.status {
            Some(CallStatus::Flushed) => self.flushed_from.is_some_and(|s| s.tracks_media()),
            Some(status) => status.tracks_media(),
            None => false,
        }
    }

    pub fn media_state(&self, leg: MediaLeg) -> MediaState {
        match leg {
            MediaLeg::Caller => self.caller_media_state,
            MediaLeg::Receptor => self.receptor_media_state,
        }
    }

    pub fn caller_media_state(&self) -> MediaState {
        self.caller_media_state
    }

    pub fn receptor_media_state(&self) -> MediaState {
        self.receptor_media_state
    }

    pub fn both_legs_connected(&self) -> bool {
        self.caller_media_state == MediaState::Connected
            && self.receptor_media_state == MediaState::Connected
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn signaling_handle(&self) -> Option<&SignalingHandle> {
        self.signaling_handle.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish_reason.as_ref()
    }

    /// Apply a status change and return the previous status.
    ///
    /// Callers are responsible for only passing table-approved transitions;
    /// this only refuses to leave `Finished`.
    pub(crate) fn set_status(&mut self, status: CallStatus) -> Option<CallStatus> {
        let previous = self.status;
        if previous == Some(CallStatus::Finished) {
            return previous;
        }
        if status == CallStatus::Flushed {
            if previous != Some(CallStatus::Flushed) {
                self.flushed_from = previous;
            }
        } else {
            self.flushed_from = None;
        }
        self.status = Some(status);
        previous
    }

    /// Record a media leg change and return the previous leg state
    pub(crate) fn set_media_state(&mut self, leg: MediaLeg, state: MediaState) -> MediaState {
        let slot = match leg {
            MediaLeg::Caller => &mut self.caller_media_state,
            MediaLeg::Receptor => &mut self.receptor_media_state,
        };
        std::mem::replace(slot, state)
    }

    pub(crate) fn attach_signaling(&mut self, handle: SignalingHandle) {
        self.signaling_handle = Some(handle);
    }

    pub(crate) fn mark_finished(&mut self, reason: FinishReason) {
        if self.finish_reason.is_none() {
            self.finish_reason = Some(reason);
            self.ended_at = Some(Utc::now());
        }
    }

    /// Give up the call slot; returns whether it was still held
    pub(crate) fn release_slot(&mut self) -> bool {
        match self.slot.take() {
            Some(slot) => {
                slot.release();
                true
            }
            None => false,
        }
    }

    /// Read-only view; `None` before the call is started
    pub fn snapshot(&self, muted: bool, speaker: bool) -> Option<CallSnapshot> {
        let status = self.status?;
        Some(CallSnapshot {
            id: self.id.clone(),
            direction: self.direction,
            caller: self.caller.clone(),
            receptor: self.receptor.clone(),
            status,
            caller_media_state: self.caller_media_state,
            receptor_media_state: self.receptor_media_state,
            muted,
            speaker,
            created_at: self.created_at,
            ended_at: self.ended_at,
            finish_reason: self.finish_reason.clone(),
        })
    }
}
