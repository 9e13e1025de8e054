use crate::medium::Symbol;
use crate::schedule::MessageId;
use crate::station::{Station, StationEvent, StationId, StationState, StationStats};
use serde::{Deserialize, Serialize};

/// Read-only view of one station after a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: StationId,
    pub position: usize,
    pub state: StationState,
    pub tries: u32,
    pub backoff_ticks: u64,
    pub jam_ticks_remaining: u32,
    pub frames_sent: u32,
    pub active_message: Option<MessageId>,
    pub stats: StationStats,
}

impl From<&Station> for StationSnapshot {
    fn from(station: &Station) -> Self {
        Self {
            id: station.id(),
            position: station.position(),
            state: station.state(),
            tries: station.tries(),
            backoff_ticks: station.backoff_ticks(),
            jam_ticks_remaining: station.jam_ticks_remaining(),
            frames_sent: station.frames_sent(),
            active_message: station.active_message(),
            stats: *station.stats(),
        }
    }
}

/// Everything a renderer or journal needs to know about one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub tick: u64,
    pub segments: Vec<Symbol>,
    /// Positions written during this tick.
    pub touched: Vec<usize>,
    pub stations: Vec<StationSnapshot>,
    pub events: Vec<StationEvent>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub earliest_pending_ready_tick: Option<u64>,
}

impl TickSnapshot {
    pub fn station(&self, id: StationId) -> Option<&StationSnapshot> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn symbol_at(&self, position: usize) -> Symbol {
        self.segments.get(position).copied().unwrap_or_default()
    }

    pub fn has_conflict(&self) -> bool {
        self.segments.iter().any(|s| *s == Symbol::Conflict)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
