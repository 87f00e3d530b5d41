// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Background helper tasks permitted by spec.md §5: a timeout timer
//! that schedules a single wakeup and posts a `timeout_event` back to
//! the consensus task, and a finalization-catchup timer that
//! periodically re-broadcasts the latest finalization message until
//! cancelled. Both are plain `tokio` tasks communicating over an
//! `mpsc` channel — the teacher's own `channel` crate plays the same
//! role for `chained_bft`'s `EventProcessor`, just built on an older
//! `tokio`/`futures-preview` pair than the one this workspace carries
//! forward.
//!
//! Neither timer ever touches [`tree_state::TreeState`] directly: per
//! spec.md §5, "only I/O against the blob store/LMDB and the single
//! lock around tree state may block", and arming/cancelling a timer is
//! the one kind of background work that must not itself hold that
//! lock. The consensus task drains the channel and applies the event
//! serially.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events a background timer posts to the consensus task's inbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    /// The round timeout fired without a QC or TC having advanced the
    /// round first.
    RoundTimeout,
    /// The finalization-catchup timer fired: re-broadcast the latest
    /// finalization message.
    FinalizationCatchup,
}

/// A single-wakeup timer: arming replaces any outstanding wakeup,
/// cancelling is idempotent and non-blocking (spec.md §5).
pub struct TimeoutTimer {
    sender: mpsc::UnboundedSender<TimerEvent>,
    current: Option<JoinHandle<()>>,
}

impl TimeoutTimer {
    pub fn new(sender: mpsc::UnboundedSender<TimerEvent>) -> Self {
        TimeoutTimer { sender, current: None }
    }

    /// Arm (or re-arm) the timer to fire `TimerEvent::RoundTimeout`
    /// after `duration`, cancelling whatever wakeup was previously
    /// scheduled (spec.md §4.10: "reset timeout timer to
    /// `timeout_base × growth_factor^consecutive_timeouts`").
    pub fn reset(&mut self, duration: Duration) {
        self.cancel();
        let sender = self.sender.clone();
        self.current = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = sender.send(TimerEvent::RoundTimeout);
        }));
    }

    /// Idempotent, non-blocking cancellation (spec.md §5).
    pub fn cancel(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.abort();
        }
    }
}

impl Drop for TimeoutTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Periodically posts `TimerEvent::FinalizationCatchup` until
/// cancelled (spec.md §5: "periodically re-broadcasts the latest
/// finalization message until cancelled").
pub struct FinalizationCatchupTimer {
    handle: Option<JoinHandle<()>>,
}

impl FinalizationCatchupTimer {
    pub fn start(sender: mpsc::UnboundedSender<TimerEvent>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if sender.send(TimerEvent::FinalizationCatchup).is_err() {
                    return;
                }
            }
        });
        FinalizationCatchupTimer { handle: Some(handle) }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for FinalizationCatchupTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_timer_fires_once_armed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimeoutTimer::new(tx);
        timer.reset(Duration::from_millis(5));
        let event = rx.recv().await.unwrap();
        assert_eq!(event, TimerEvent::RoundTimeout);
    }

    #[tokio::test]
    async fn resetting_cancels_the_previous_wakeup() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimeoutTimer::new(tx);
        timer.reset(Duration::from_millis(500));
        timer.reset(Duration::from_millis(5));
        let event = rx.recv().await.unwrap();
        assert_eq!(event, TimerEvent::RoundTimeout);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_stops_future_firings() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimeoutTimer::new(tx);
        timer.reset(Duration::from_millis(5));
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn finalization_catchup_timer_fires_repeatedly() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = FinalizationCatchupTimer::start(tx, Duration::from_millis(5));
        assert_eq!(rx.recv().await.unwrap(), TimerEvent::FinalizationCatchup);
        assert_eq!(rx.recv().await.unwrap(), TimerEvent::FinalizationCatchup);
        timer.cancel();
    }
}
