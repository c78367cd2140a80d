use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::{CallEvent, SourceSender, TimerKind};

/// Per-call timers.
///
/// Each arm gets a fresh generation; a timer event is only honored while its
/// generation is still the armed one, so cancel/re-arm races cannot fire a
/// stale timeout.
#[derive(Debug)]
pub(crate) struct TimerSet {
    sender: SourceSender,
    active: HashMap<TimerKind, (u64, JoinHandle<()>)>,
    next_generation: u64,
}

impl TimerSet {
    pub(crate) fn new(sender: SourceSender) -> Self {
        Self {
            sender,
            active: HashMap::new(),
            next_generation: 0,
        }
    }

    pub(crate) fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.cancel(kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        let sender = self.sender.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            sender.send(CallEvent::Timer { kind, generation });
        });
        debug!(timer = %kind, generation, after_ms = after.as_millis() as u64, "Timer armed");
        self.active.insert(kind, (generation, task));
    }

    pub(crate) fn cancel(&mut self, kind: TimerKind) {
        if let Some((generation, task)) = self.active.remove(&kind) {
            task.abort();
            debug!(timer = %kind, generation, "Timer cancelled");
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, (_, task)) in self.active.drain() {
            task.abort();
        }
    }

    /// Consume a fired timer; false when it was cancelled or re-armed since
    pub(crate) fn take_if_current(&mut self, kind: TimerKind, generation: u64) -> bool {
        match self.active.get(&kind) {
            Some((armed, _)) if *armed == generation => {
                self.active.remove(&kind);
                true
            }
            _ => false,
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CallEventSource, EventSource};

    #[tokio::test(start_paused = true)]
    async fn test_fired_timer_is_current_once() {
        let mut source = CallEventSource::new();
        let mut rx = source.take_receiver().expect("Should have a receiver");
        let mut timers = TimerSet::new(source.sender(EventSource::Timer));

        timers.arm(TimerKind::NoAnswer, Duration::from_secs(5));
        let fired = rx.recv().await.expect("Should fire");
        let CallEvent::Timer { kind, generation } = fired.event else {
            panic!("Expected a timer event");
        };
        assert_eq!(kind, TimerKind::NoAnswer);
        assert!(timers.take_if_current(kind, generation));
        assert!(!timers.take_if_current(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_makes_old_generation_stale() {
        let source = CallEventSource::new();
        let mut timers = TimerSet::new(source.sender(EventSource::Timer));

        timers.arm(TimerKind::MediaDisconnect, Duration::from_secs(20));
        timers.arm(TimerKind::MediaDisconnect, Duration::from_secs(20));
        assert!(!timers.take_if_current(TimerKind::MediaDisconnect, 1));
        assert!(timers.take_if_current(TimerKind::MediaDisconnect, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let mut source = CallEventSource::new();
        let mut rx = source.take_receiver().expect("Should have a receiver");
        let mut timers = TimerSet::new(source.sender(EventSource::Timer));

        timers.arm(TimerKind::EndConfirm, Duration::from_secs(1));
        timers.cancel(TimerKind::EndConfirm);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }
}
