//! Per-session tick sources for the countdown and the race
//!
//! A `Clock` is a spawned task that emits one `ClockEvent` per period onto
//! the engine's channel and a final `Expired` event. Each clock carries the
//! epoch it was started under; the owning session bumps its epoch whenever
//! a clock is replaced, so events still queued from a cancelled clock can be
//! recognised and dropped.

use log::debug;
use shared::GameId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockKind {
    Countdown,
    Race,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSignal {
    /// Seconds (ticks) left after this one
    Tick { remaining: u32 },
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockEvent {
    pub game_id: GameId,
    pub epoch: u64,
    pub kind: ClockKind,
    pub signal: ClockSignal,
}

/// Handle to a running clock. Dropping it stops the ticks.
#[derive(Debug)]
pub struct Clock {
    kind: ClockKind,
    epoch: u64,
    handle: JoinHandle<()>,
}

impl Clock {
    /// Spawns a clock that ticks `duration_ticks` times, one `period` apart,
    /// counting `remaining` down to zero, then reports expiry.
    pub fn start(
        game_id: GameId,
        epoch: u64,
        kind: ClockKind,
        duration_ticks: u32,
        period: Duration,
        events: mpsc::UnboundedSender<ClockEvent>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let emit = |signal| ClockEvent {
                game_id: game_id.clone(),
                epoch,
                kind,
                signal,
            };

            for elapsed in 1..=duration_ticks {
                ticker.tick().await;
                let remaining = duration_ticks - elapsed;
                if events.send(emit(ClockSignal::Tick { remaining })).is_err() {
                    debug!("Clock for {} stopped, receiver gone", game_id);
                    return;
                }
            }

            let _ = events.send(emit(ClockSignal::Expired));
        });

        Self {
            kind,
            epoch,
            handle,
        }
    }

    pub fn kind(&self) -> ClockKind {
        self.kind
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
