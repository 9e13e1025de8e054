//! Per-station CSMA/CD contention logic.
//!
//! A station senses only its own bus position. Each tick it either keeps
//! jamming, waits out its backoff, or tries to put the next frame of its
//! current message on the wire:
//!
//! ```text
//!   Idle ──claim──▶ Selecting ──medium free──▶ Transmitting ──last frame──▶ Idle
//!                      ▲   │foreign signal          │foreign signal
//!                      │   └──(defer)               ▼
//!                   Backoff ◀──jam done────────── Jamming ──retries spent──▶ Idle
//! ```

use crate::backoff::BackoffRng;
use crate::config::AbandonPolicy;
use crate::medium::{Bus, Symbol};
use crate::schedule::{MessageId, MessageStatus, ScheduleError, TrafficSchedule};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub type StationId = u32;

pub const MAX_STATIONS: usize = 32;
// A station makes at most two transitions per tick.
pub const MAX_TICK_EVENTS: usize = MAX_STATIONS * 2;

pub type TickEvents = Vec<StationEvent, MAX_TICK_EVENTS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationState {
    Idle,
    Selecting,
    Transmitting,
    Jamming,
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationEvent {
    Claimed {
        station: StationId,
        message: MessageId,
    },
    Deferred {
        station: StationId,
        message: MessageId,
        observed: Symbol,
    },
    Collision {
        station: StationId,
        message: MessageId,
        observed: Symbol,
        frames_sent: u32,
    },
    BackoffStarted {
        station: StationId,
        message: MessageId,
        tries: u32,
        multiplier: u64,
        ticks: u64,
    },
    Resumed {
        station: StationId,
        message: MessageId,
    },
    Completed {
        station: StationId,
        message: MessageId,
    },
    Abandoned {
        station: StationId,
        message: MessageId,
        status: MessageStatus,
    },
}

impl StationEvent {
    pub fn station(&self) -> StationId {
        match *self {
            StationEvent::Claimed { station, .. }
            | StationEvent::Deferred { station, .. }
            | StationEvent::Collision { station, .. }
            | StationEvent::BackoffStarted { station, .. }
            | StationEvent::Resumed { station, .. }
            | StationEvent::Completed { station, .. }
            | StationEvent::Abandoned { station, .. } => station,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationStats {
    pub frames_emitted: u64,
    pub collisions: u32,
    pub deferrals: u32,
    pub completed: u32,
    pub abandoned: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentionLimits {
    pub max_retries: u32,
    pub jam_duration: u32,
    pub abandon_policy: AbandonPolicy,
}

/// Everything a station may touch during its turn.
pub struct TickContext<'a> {
    pub now: u64,
    pub bus: &'a mut Bus,
    pub schedule: &'a mut TrafficSchedule,
    pub rng: &'a mut BackoffRng,
    pub limits: ContentionLimits,
    pub events: &'a mut TickEvents,
}

impl TickContext<'_> {
    fn record(&mut self, event: StationEvent) {
        if let Err(lost) = self.events.push(event) {
            warn!(tick = self.now, capacity = MAX_TICK_EVENTS, event = ?lost, "tick event buffer full, event lost");
        }
    }
}

#[derive(Debug, Clone)]
pub struct Station {
    id: StationId,
    position: usize,
    state: StationState,
    tries: u32,
    backoff_ticks: u64,
    jam_ticks_remaining: u32,
    frames_sent: u32,
    active_message: Option<MessageId>,
    stats: StationStats,
}

impl Station {
    pub fn new(id: StationId, position: usize) -> Self {
        Self {
            id,
            position,
            state: StationState::Idle,
            tries: 0,
            backoff_ticks: 0,
            jam_ticks_remaining: 0,
            frames_sent: 0,
            active_message: None,
            stats: StationStats::default(),
        }
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn backoff_ticks(&self) -> u64 {
        self.backoff_ticks
    }

    pub fn jam_ticks_remaining(&self) -> u32 {
        self.jam_ticks_remaining
    }

    pub fn frames_sent(&self) -> u32 {
        self.frames_sent
    }

    pub fn active_message(&self) -> Option<MessageId> {
        self.active_message
    }

    pub fn stats(&self) -> &StationStats {
        &self.stats
    }

    /// Run this station's turn for the current tick.
    pub fn step(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ScheduleError> {
        match self.state {
            StationState::Jamming => return self.jam(ctx),
            StationState::Backoff => {
                if self.backoff_ticks > 0 {
                    self.backoff_ticks -= 1;
                    if self.backoff_ticks == 0 {
                        self.resume(ctx);
                    }
                    return Ok(());
                }
                self.resume(ctx);
            }
            _ => {}
        }

        let Some(message) = self.bind_message(ctx)? else {
            self.state = StationState::Idle;
            return Ok(());
        };

        self.attempt_frame(message, ctx)
    }

    fn resume(&mut self, ctx: &mut TickContext<'_>) {
        self.state = StationState::Selecting;
        if let Some(message) = self.active_message {
            debug!(station = self.id, message, "backoff elapsed");
            ctx.record(StationEvent::Resumed {
                station: self.id,
                message,
            });
        }
    }

    fn bind_message(&mut self, ctx: &mut TickContext<'_>) -> Result<Option<MessageId>, ScheduleError> {
        if let Some(message) = self.active_message {
            return Ok(Some(message));
        }

        let Some(candidate) = ctx.schedule.next_claimable(self.id, ctx.now) else {
            return Ok(None);
        };

        ctx.schedule.claim(candidate, self.id)?;
        self.active_message = Some(candidate);
        self.frames_sent = 0;
        self.tries = 0;
        self.state = StationState::Selecting;

        debug!(station = self.id, message = candidate, tick = ctx.now, "message claimed");
        ctx.record(StationEvent::Claimed {
            station: self.id,
            message: candidate,
        });
        Ok(Some(candidate))
    }

    fn attempt_frame(&mut self, message: MessageId, ctx: &mut TickContext<'_>) -> Result<(), ScheduleError> {
        let (own, length) = ctx
            .schedule
            .get(message)
            .map(|m| (m.symbol(), m.length))
            .ok_or(ScheduleError::UnknownMessage(message))?;
        let observed = ctx.bus.symbol_at(self.position);

        if self.frames_sent > 0 && !observed.is_empty() && observed != own {
            return self.start_jam(message, observed, ctx);
        }

        if !observed.is_empty() && observed != own {
            // Carrier present before our first frame: keep listening.
            self.state = StationState::Selecting;
            self.stats.deferrals += 1;
            debug!(station = self.id, message, observed = %observed, "medium busy, deferring");
            ctx.record(StationEvent::Deferred {
                station: self.id,
                message,
                observed,
            });
            return Ok(());
        }

        ctx.bus.emit(self.position, own);
        self.frames_sent += 1;
        self.stats.frames_emitted += 1;
        self.state = StationState::Transmitting;

        if self.frames_sent >= length {
            ctx.schedule.complete(message, self.id, ctx.now)?;
            self.reset();
            self.stats.completed += 1;
            info!(station = self.id, message, tick = ctx.now, "message delivered");
            ctx.record(StationEvent::Completed {
                station: self.id,
                message,
            });
        }
        Ok(())
    }

    fn start_jam(&mut self, message: MessageId, observed: Symbol, ctx: &mut TickContext<'_>) -> Result<(), ScheduleError> {
        self.stats.collisions += 1;
        warn!(
            station = self.id,
            message,
            observed = %observed,
            frames_sent = self.frames_sent,
            tick = ctx.now,
            "collision detected"
        );
        ctx.record(StationEvent::Collision {
            station: self.id,
            message,
            observed,
            frames_sent: self.frames_sent,
        });

        self.state = StationState::Jamming;
        self.jam_ticks_remaining = ctx.limits.jam_duration;
        self.jam(ctx)
    }

    fn jam(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ScheduleError> {
        ctx.bus.emit(self.position, Symbol::Jam);
        self.jam_ticks_remaining = self.jam_ticks_remaining.saturating_sub(1);
        if self.jam_ticks_remaining == 0 {
            self.finish_jam(ctx)?;
        }
        Ok(())
    }

    fn finish_jam(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ScheduleError> {
        self.frames_sent = 0;
        self.tries += 1;

        let Some(message) = self.active_message else {
            self.reset();
            return Ok(());
        };

        if self.tries > ctx.limits.max_retries {
            let status = ctx.schedule.abandon(message, self.id, ctx.limits.abandon_policy)?;
            let tries = self.tries;
            self.reset();
            self.stats.abandoned += 1;
            info!(station = self.id, message, tries, ?status, "retries exhausted, message abandoned");
            ctx.record(StationEvent::Abandoned {
                station: self.id,
                message,
                status,
            });
            return Ok(());
        }

        let draw = ctx.rng.draw(self.tries);
        self.backoff_ticks = draw.ticks;
        self.state = StationState::Backoff;
        debug!(
            station = self.id,
            message,
            tries = self.tries,
            multiplier = draw.multiplier,
            ticks = draw.ticks,
            "backing off"
        );
        ctx.record(StationEvent::BackoffStarted {
            station: self.id,
            message,
            tries: self.tries,
            multiplier: draw.multiplier,
            ticks: draw.ticks,
        });
        Ok(())
    }

    fn reset(&mut self) {
        self.state = StationState::Idle;
        self.tries = 0;
        self.frames_sent = 0;
        self.backoff_ticks = 0;
        self.jam_ticks_remaining = 0;
        self.active_message = None;
    }
}
