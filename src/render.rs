//! Plain-text views of a [`TickSnapshot`].
//!
//! The cable is drawn between bars, stations hang below it at their tap
//! positions:
//!
//! ```text
//! |-AA---#---BB-------|
//!   |          |
//!   A          B
//! ```

use crate::snapshot::{StationSnapshot, TickSnapshot};
use crate::station::{StationEvent, StationId};

pub fn station_label(id: StationId) -> char {
    char::from(b'A' + (id % 26) as u8)
}

pub fn cable_line(snapshot: &TickSnapshot) -> String {
    let mut line = String::with_capacity(snapshot.segments.len() + 2);
    line.push('|');
    line.extend(snapshot.segments.iter().map(|s| s.glyph()));
    line.push('|');
    line
}

pub fn tap_lines(snapshot: &TickSnapshot) -> (String, String) {
    let width = snapshot.segments.len();
    let mut taps = vec![' '; width];
    let mut labels = vec![' '; width];
    for station in &snapshot.stations {
        if station.position < width {
            taps[station.position] = '|';
            labels[station.position] = station_label(station.id);
        }
    }

    let taps: String = std::iter::once(' ').chain(taps).collect();
    let labels: String = std::iter::once(' ').chain(labels).collect();
    (taps, labels)
}

pub fn station_line(station: &StationSnapshot) -> String {
    let message = station
        .active_message
        .map_or_else(|| "-".to_string(), |m| m.to_string());
    let state = format!("{:?}", station.state);
    format!(
        "{} @{:<3} {:<12} msg={:<3} frames={:<3} tries={:<2} backoff={:<5} jam={}",
        station_label(station.id),
        station.position,
        state,
        message,
        station.frames_sent,
        station.tries,
        station.backoff_ticks,
        station.jam_ticks_remaining,
    )
}

pub fn event_line(event: &StationEvent) -> String {
    let who = station_label(event.station());
    match *event {
        StationEvent::Claimed { message, .. } => format!("{} claimed message {}", who, message),
        StationEvent::Deferred { message, observed, .. } => {
            format!("{} deferred message {} (medium carries '{}')", who, message, observed)
        }
        StationEvent::Collision {
            message,
            observed,
            frames_sent,
            ..
        } => format!(
            "{} collision on message {} after {} frames (saw '{}')",
            who, message, frames_sent, observed
        ),
        StationEvent::BackoffStarted {
            message,
            tries,
            multiplier,
            ticks,
            ..
        } => format!(
            "{} backing off message {}: try {}, k={}, {} ticks",
            who, message, tries, multiplier, ticks
        ),
        StationEvent::Resumed { message, .. } => format!("{} resumed message {}", who, message),
        StationEvent::Completed { message, .. } => format!("{} delivered message {}", who, message),
        StationEvent::Abandoned { message, status, .. } => {
            format!("{} abandoned message {} ({:?})", who, message, status)
        }
    }
}

pub fn summary_line(snapshot: &TickSnapshot) -> String {
    let next = snapshot
        .earliest_pending_ready_tick
        .map_or_else(|| "-".to_string(), |t| t.to_string());
    format!(
        "tick {} | delivered {} | failed {} | pending {} | earliest pending {}",
        snapshot.tick, snapshot.completed_count, snapshot.failed_count, snapshot.pending_count, next
    )
}

/// Full multi-line rendering.
pub fn render_table(snapshot: &TickSnapshot) -> String {
    let (taps, labels) = tap_lines(snapshot);
    let mut out = vec![summary_line(snapshot), cable_line(snapshot), taps, labels];
    out.extend(snapshot.stations.iter().map(station_line));
    out.extend(snapshot.events.iter().map(event_line));
    out.join("\n")
}

/// One line per tick.
pub fn render_compact(snapshot: &TickSnapshot) -> String {
    format!(
        "{:>6} {} done={} failed={} pending={}",
        snapshot.tick,
        cable_line(snapshot),
        snapshot.completed_count,
        snapshot.failed_count,
        snapshot.pending_count
    )
}
