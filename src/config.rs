//! Scenario configuration: bus geometry, attached stations and the traffic
//! schedule. Scenarios are usually loaded from TOML files and are validated
//! in full before the first tick runs.

use crate::backoff::DEFAULT_SEED;
use crate::medium::Symbol;
use crate::schedule::MAX_SCHEDULED_MESSAGES;
use crate::station::{StationId, MAX_STATIONS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Ethernet gives up after 16 attempts, i.e. 15 retries.
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// What happens to a message once its station runs out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AbandonPolicy {
    /// The message is reported as failed in every snapshot.
    #[default]
    MarkFailed,
    /// The message silently never completes.
    Drop,
}

/// Order in which stations act within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StationOrder {
    /// Ascending station id every tick. Lower ids always act first.
    #[default]
    Ascending,
    /// Ascending id, but the starting station advances by one each tick.
    Rotating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: StationId,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub station: StationId,
    pub ready_tick: u64,
    pub length: u32,
    pub symbol: char,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub bus_length: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub abandon_policy: AbandonPolicy,
    #[serde(default)]
    pub station_order: StationOrder,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
    #[serde(default)]
    pub messages: Vec<ScheduleEntry>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bus length must be positive")]
    EmptyBus,
    #[error("station {id} at position {position} is outside the bus [0, {bus_length})")]
    PositionOutOfRange {
        id: StationId,
        position: usize,
        bus_length: usize,
    },
    #[error("station id {0} is declared more than once")]
    DuplicateStation(StationId),
    #[error("stations {other} and {id} share tap position {position}")]
    SharedPosition {
        id: StationId,
        other: StationId,
        position: usize,
    },
    #[error("too many stations: {count} (maximum {max})")]
    TooManyStations { count: usize, max: usize },
    #[error("schedule entry {index} references unknown station {station}")]
    UnknownStation { index: usize, station: StationId },
    #[error("schedule entry {index} has zero length")]
    EmptyMessage { index: usize },
    #[error("schedule entry {index} uses reserved symbol '{symbol}'")]
    ReservedSymbol { index: usize, symbol: char },
    #[error("schedule holds {count} messages (maximum {max})")]
    ScheduleFull { count: usize, max: usize },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl SimulationConfig {
    pub fn new(bus_length: usize) -> Self {
        Self {
            bus_length,
            max_retries: DEFAULT_MAX_RETRIES,
            seed: DEFAULT_SEED,
            abandon_policy: AbandonPolicy::default(),
            station_order: StationOrder::default(),
            stations: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn with_station(mut self, id: StationId, position: usize) -> Self {
        self.stations.push(StationConfig { id, position });
        self
    }

    pub fn with_message(mut self, station: StationId, ready_tick: u64, length: u32, symbol: char) -> Self {
        self.messages.push(ScheduleEntry {
            station,
            ready_tick,
            length,
            symbol,
        });
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_abandon_policy(mut self, policy: AbandonPolicy) -> Self {
        self.abandon_policy = policy;
        self
    }

    pub fn with_station_order(mut self, order: StationOrder) -> Self {
        self.station_order = order;
        self
    }

    /// Load a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Jam length in ticks: one bus length.
    pub fn jam_duration(&self) -> u32 {
        self.bus_length as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_length == 0 {
            return Err(ConfigError::EmptyBus);
        }

        if self.stations.len() > MAX_STATIONS {
            return Err(ConfigError::TooManyStations {
                count: self.stations.len(),
                max: MAX_STATIONS,
            });
        }

        let mut ids = HashSet::new();
        // One station per tap: a cell has a single writer each tick.
        let mut taps: HashMap<usize, StationId> = HashMap::new();
        for station in &self.stations {
            if !ids.insert(station.id) {
                return Err(ConfigError::DuplicateStation(station.id));
            }
            if station.position >= self.bus_length {
                return Err(ConfigError::PositionOutOfRange {
                    id: station.id,
                    position: station.position,
                    bus_length: self.bus_length,
                });
            }
            if let Some(&other) = taps.get(&station.position) {
                return Err(ConfigError::SharedPosition {
                    id: station.id,
                    other,
                    position: station.position,
                });
            }
            taps.insert(station.position, station.id);
        }

        if self.messages.len() > MAX_SCHEDULED_MESSAGES {
            return Err(ConfigError::ScheduleFull {
                count: self.messages.len(),
                max: MAX_SCHEDULED_MESSAGES,
            });
        }

        for (index, entry) in self.messages.iter().enumerate() {
            if !ids.contains(&entry.station) {
                return Err(ConfigError::UnknownStation {
                    index,
                    station: entry.station,
                });
            }
            if entry.length == 0 {
                return Err(ConfigError::EmptyMessage { index });
            }
            if Symbol::is_reserved_token(entry.symbol) {
                return Err(ConfigError::ReservedSymbol {
                    index,
                    symbol: entry.symbol,
                });
            }
        }

        Ok(())
    }
}

/// Two stations near opposite ends of a 20-segment cable; the second one
/// starts talking while the first one's frame is still on the wire.
pub fn demo_scenario() -> SimulationConfig {
    SimulationConfig::new(20)
        .with_station(0, 1)
        .with_station(1, 18)
        .with_message(0, 0, 24, 'A')
        .with_message(1, 2, 24, 'B')
}
