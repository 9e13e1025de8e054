use crate::backoff::{BackoffPolicy, BackoffRng};
use crate::config::{ConfigError, SimulationConfig, StationOrder};
use crate::medium::Bus;
use crate::schedule::{ScheduleError, TrafficSchedule};
use crate::snapshot::{StationSnapshot, TickSnapshot};
use crate::station::{ContentionLimits, Station, StationState, TickContext, TickEvents, MAX_STATIONS};
use heapless::Vec;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("simulation invariant violated at tick {tick}: {source}")]
    InvariantViolation {
        tick: u64,
        #[source]
        source: ScheduleError,
    },
}

/// A single collision domain: the bus, its stations and their traffic.
///
/// All mutable state lives here. Each call to [`BusSimulation::tick`]
/// advances time by exactly one tick.
#[derive(Debug)]
pub struct BusSimulation {
    config: SimulationConfig,
    bus: Bus,
    stations: Vec<Station, MAX_STATIONS>,
    schedule: TrafficSchedule,
    rng: BackoffRng,
    limits: ContentionLimits,
    current_tick: u64,
    last_events: TickEvents,
}

impl BusSimulation {
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut station_configs = config.stations.clone();
        station_configs.sort_by_key(|s| s.id);

        let mut stations = Vec::new();
        for station in &station_configs {
            stations
                .push(Station::new(station.id, station.position))
                .map_err(|_| ConfigError::TooManyStations {
                    count: station_configs.len(),
                    max: MAX_STATIONS,
                })?;
        }

        let mut schedule = TrafficSchedule::new();
        for entry in &config.messages {
            schedule.push(entry).map_err(|_| ConfigError::ScheduleFull {
                count: config.messages.len(),
                max: crate::schedule::MAX_SCHEDULED_MESSAGES,
            })?;
        }

        let limits = ContentionLimits {
            max_retries: config.max_retries,
            jam_duration: config.jam_duration(),
            abandon_policy: config.abandon_policy,
        };
        let rng = BackoffRng::new(BackoffPolicy::for_bus(config.bus_length), config.seed);

        debug!(
            bus_length = config.bus_length,
            stations = stations.len(),
            messages = schedule.len(),
            seed = config.seed,
            "simulation configured"
        );

        Ok(Self {
            bus: Bus::new(config.bus_length),
            stations,
            schedule,
            rng,
            limits,
            current_tick: 0,
            last_events: TickEvents::new(),
            config,
        })
    }

    /// Propagate the bus, then let every station act once.
    pub fn tick(&mut self) -> Result<TickSnapshot, SimulationError> {
        let now = self.current_tick;

        self.bus.advance();

        let order = self.turn_order(now);
        let mut events = TickEvents::new();
        {
            let mut ctx = TickContext {
                now,
                bus: &mut self.bus,
                schedule: &mut self.schedule,
                rng: &mut self.rng,
                limits: self.limits,
                events: &mut events,
            };
            for index in order {
                if let Err(source) = self.stations[index].step(&mut ctx) {
                    error!(tick = now, station = self.stations[index].id(), %source, "invariant violated");
                    return Err(SimulationError::InvariantViolation { tick: now, source });
                }
            }
        }

        self.last_events = events;
        self.current_tick += 1;
        Ok(self.build_snapshot(now))
    }

    /// Run `ticks` ticks and return the last snapshot, or `None` if nothing
    /// has run yet.
    pub fn run(&mut self, ticks: u64) -> Result<Option<TickSnapshot>, SimulationError> {
        let mut last = self.snapshot();
        for _ in 0..ticks {
            last = Some(self.tick()?);
        }
        Ok(last)
    }

    /// Tick until every message is settled and the medium is quiet.
    ///
    /// Returns the number of ticks run, or `None` if `max_ticks` elapsed first.
    pub fn run_until_settled(&mut self, max_ticks: u64) -> Result<Option<u64>, SimulationError> {
        for ran in 0..max_ticks {
            if self.is_settled() {
                return Ok(Some(ran));
            }
            self.tick()?;
        }
        Ok(self.is_settled().then_some(max_ticks))
    }

    pub fn is_settled(&self) -> bool {
        self.schedule.all_settled()
            && self.bus.is_quiet()
            && self.stations.iter().all(|s| s.state() == StationState::Idle)
    }

    fn turn_order(&self, now: u64) -> Vec<usize, MAX_STATIONS> {
        let count = self.stations.len();
        let start = match self.config.station_order {
            StationOrder::Ascending => 0,
            StationOrder::Rotating if count > 0 => (now % count as u64) as usize,
            StationOrder::Rotating => 0,
        };
        (0..count).map(|offset| (start + offset) % count).collect()
    }

    /// View of the most recently completed tick. `None` before the first tick.
    pub fn snapshot(&self) -> Option<TickSnapshot> {
        let last = self.current_tick.checked_sub(1)?;
        Some(self.build_snapshot(last))
    }

    fn build_snapshot(&self, tick: u64) -> TickSnapshot {
        TickSnapshot {
            tick,
            segments: self.bus.symbols(),
            touched: self.bus.touched_positions(),
            stations: self.stations.iter().map(StationSnapshot::from).collect(),
            events: self.last_events.iter().copied().collect(),
            completed_count: self.schedule.completed_count(),
            failed_count: self.schedule.failed_count(),
            pending_count: self.schedule.pending_count(),
            earliest_pending_ready_tick: self.schedule.earliest_pending_ready_tick(),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn station(&self, id: crate::station::StationId) -> Option<&Station> {
        self.stations.iter().find(|s| s.id() == id)
    }

    pub fn schedule(&self) -> &TrafficSchedule {
        &self.schedule
    }

    /// Index of the next tick to run.
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn backoff_draws(&self) -> u64 {
        self.rng.draws()
    }
}
