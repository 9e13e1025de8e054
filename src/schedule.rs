use crate::config::{AbandonPolicy, ScheduleEntry};
use crate::medium::Symbol;
use crate::station::StationId;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_SCHEDULED_MESSAGES: usize = 256;

pub type MessageId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Completed,
    /// Abandoned after retry exhaustion, reported as a failure.
    Failed,
    /// Abandoned after retry exhaustion, never reported.
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub source: StationId,
    pub ready_tick: u64,
    pub length: u32,
    pub token: char,
    pub status: MessageStatus,
    pub claimed_by: Option<StationId>,
    pub completed_tick: Option<u64>,
}

impl Message {
    pub fn symbol(&self) -> Symbol {
        Symbol::Data(self.token)
    }

    pub fn is_completed(&self) -> bool {
        self.status == MessageStatus::Completed
    }

    pub fn is_claimable_by(&self, station: StationId, now: u64) -> bool {
        self.source == station
            && self.ready_tick <= now
            && self.status == MessageStatus::Pending
            && self.claimed_by.is_none()
    }
}

/// Misuse of the schedule that can only come from a defect in the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("message {0} does not exist")]
    UnknownMessage(MessageId),
    #[error("message {message} claimed by station {station} but already held by station {holder}")]
    AlreadyClaimed {
        message: MessageId,
        station: StationId,
        holder: StationId,
    },
    #[error("message {message} is {status:?} and cannot be claimed by station {station}")]
    NotPending {
        message: MessageId,
        station: StationId,
        status: MessageStatus,
    },
    #[error("station {station} released message {message} it does not hold")]
    NotHolder {
        message: MessageId,
        station: StationId,
    },
    #[error("schedule is full ({} messages)", MAX_SCHEDULED_MESSAGES)]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    pub total_scheduled: u32,
    pub total_claims: u32,
    pub total_completed: u32,
    pub total_failed: u32,
    pub total_dropped: u32,
}

/// Every message the stations will try to send, in schedule order.
#[derive(Debug, Default)]
pub struct TrafficSchedule {
    messages: Vec<Message, MAX_SCHEDULED_MESSAGES>,
    stats: ScheduleStats,
}

impl TrafficSchedule {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            stats: ScheduleStats::default(),
        }
    }

    /// Append a message. Entries keep their insertion order.
    pub fn push(&mut self, entry: &ScheduleEntry) -> Result<MessageId, ScheduleError> {
        let id = self.messages.len();
        let message = Message {
            id,
            source: entry.station,
            ready_tick: entry.ready_tick,
            length: entry.length,
            token: entry.symbol,
            status: MessageStatus::Pending,
            claimed_by: None,
            completed_tick: None,
        };
        self.messages.push(message).map_err(|_| ScheduleError::Full)?;
        self.stats.total_scheduled += 1;
        Ok(id)
    }

    /// First ready, unclaimed message for `station`.
    pub fn next_claimable(&self, station: StationId, now: u64) -> Option<MessageId> {
        self.messages
            .iter()
            .find(|message| message.is_claimable_by(station, now))
            .map(|message| message.id)
    }

    pub fn claim(&mut self, id: MessageId, station: StationId) -> Result<&Message, ScheduleError> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or(ScheduleError::UnknownMessage(id))?;

        if message.status != MessageStatus::Pending {
            return Err(ScheduleError::NotPending {
                message: id,
                station,
                status: message.status,
            });
        }
        if let Some(holder) = message.claimed_by {
            return Err(ScheduleError::AlreadyClaimed {
                message: id,
                station,
                holder,
            });
        }

        message.claimed_by = Some(station);
        self.stats.total_claims += 1;
        Ok(&*message)
    }

    /// Mark a held message delivered. Happens at most once per message.
    pub fn complete(&mut self, id: MessageId, station: StationId, now: u64) -> Result<(), ScheduleError> {
        let message = self.held_by(id, station)?;
        message.status = MessageStatus::Completed;
        message.claimed_by = None;
        message.completed_tick = Some(now);
        self.stats.total_completed += 1;
        Ok(())
    }

    /// Give up on a held message after too many collisions.
    pub fn abandon(
        &mut self,
        id: MessageId,
        station: StationId,
        policy: AbandonPolicy,
    ) -> Result<MessageStatus, ScheduleError> {
        let message = self.held_by(id, station)?;
        message.claimed_by = None;
        message.status = match policy {
            AbandonPolicy::MarkFailed => MessageStatus::Failed,
            AbandonPolicy::Drop => MessageStatus::Dropped,
        };
        let status = message.status;
        match status {
            MessageStatus::Failed => self.stats.total_failed += 1,
            _ => self.stats.total_dropped += 1,
        }
        Ok(status)
    }

    fn held_by(&mut self, id: MessageId, station: StationId) -> Result<&mut Message, ScheduleError> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or(ScheduleError::UnknownMessage(id))?;

        if message.status != MessageStatus::Pending {
            return Err(ScheduleError::NotPending {
                message: id,
                station,
                status: message.status,
            });
        }
        if message.claimed_by != Some(station) {
            return Err(ScheduleError::NotHolder { message: id, station });
        }
        Ok(message)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.count(MessageStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(MessageStatus::Failed)
    }

    pub fn pending_count(&self) -> usize {
        self.count(MessageStatus::Pending)
    }

    fn count(&self, status: MessageStatus) -> usize {
        self.messages.iter().filter(|m| m.status == status).count()
    }

    pub fn earliest_pending_ready_tick(&self) -> Option<u64> {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Pending)
            .map(|m| m.ready_tick)
            .min()
    }

    /// No message is waiting or in flight any more.
    pub fn all_settled(&self) -> bool {
        self.pending_count() == 0
    }

    pub fn stats(&self) -> &ScheduleStats {
        &self.stats
    }
}
