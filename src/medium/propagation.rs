//! Wave propagation across the bus.
//!
//! Every non-empty segment pushes its symbol one position further in each
//! direction it is still travelling. The next state is always built into a
//! fresh buffer so the result does not depend on the order segments are
//! visited in.

use super::{Direction, Segment, Symbol};
use tracing::trace;

/// Compute the bus state one tick after `current`.
pub fn propagate(current: &[Segment]) -> Vec<Segment> {
    let length = current.len();
    let mut next = vec![Segment::EMPTY; length];

    for (index, segment) in current.iter().enumerate() {
        if segment.symbol.is_empty() {
            continue;
        }

        if segment.left_active && index > 0 {
            deposit(&mut next, index - 1, segment.symbol, Direction::Left);
        }
        if segment.right_active && index + 1 < length {
            deposit(&mut next, index + 1, segment.symbol, Direction::Right);
        }
    }

    for (index, segment) in next.iter().enumerate() {
        if segment.touched {
            trace!(position = index, symbol = %segment.symbol, "segment changed");
        }
    }

    next
}

fn deposit(next: &mut [Segment], index: usize, symbol: Symbol, direction: Direction) {
    let last = next.len() - 1;
    let slot = &mut next[index];

    if slot.symbol.is_empty() {
        slot.symbol = symbol;
    } else if slot.symbol != symbol {
        // Two different waves share one segment.
        slot.distorted = slot.symbol == Symbol::Conflict || symbol == Symbol::Conflict;
        slot.symbol = Symbol::Conflict;
    }

    slot.touched = true;

    // Waves fall off the ends of the cable.
    let off_edge = match direction {
        Direction::Left => index == 0,
        Direction::Right => index == last,
    };
    if !off_edge {
        slot.activate(direction);
    }
}
