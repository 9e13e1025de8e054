pub mod propagation;

pub use propagation::propagate;

use serde::{Deserialize, Serialize};

pub const EMPTY_GLYPH: char = '-';
pub const CONFLICT_GLYPH: char = '#';
pub const JAM_GLYPH: char = '=';

/// What a bus segment carries during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Symbol {
    #[default]
    Empty,
    Data(char),
    Conflict,
    Jam,
}

impl Symbol {
    pub fn is_empty(self) -> bool {
        matches!(self, Symbol::Empty)
    }

    pub fn glyph(self) -> char {
        match self {
            Symbol::Empty => EMPTY_GLYPH,
            Symbol::Data(token) => token,
            Symbol::Conflict => CONFLICT_GLYPH,
            Symbol::Jam => JAM_GLYPH,
        }
    }

    /// Glyphs used by the medium itself cannot be used as data tokens.
    pub fn is_reserved_token(token: char) -> bool {
        matches!(token, EMPTY_GLYPH | CONFLICT_GLYPH | JAM_GLYPH)
    }
}

impl core::fmt::Display for Symbol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.glyph())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// One addressable bus position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Segment {
    pub symbol: Symbol,
    pub left_active: bool,
    pub right_active: bool,
    /// Conflict that continues an earlier conflict. Diagnostic only.
    pub distorted: bool,
    pub touched: bool,
}

impl Segment {
    pub const EMPTY: Segment = Segment {
        symbol: Symbol::Empty,
        left_active: false,
        right_active: false,
        distorted: false,
        touched: false,
    };

    /// A signal freshly driven onto the bus, travelling both ways.
    pub fn emitted(symbol: Symbol) -> Self {
        Self {
            symbol,
            left_active: true,
            right_active: true,
            distorted: false,
            touched: true,
        }
    }

    pub fn is_active(&self, direction: Direction) -> bool {
        match direction {
            Direction::Left => self.left_active,
            Direction::Right => self.right_active,
        }
    }

    fn activate(&mut self, direction: Direction) {
        match direction {
            Direction::Left => self.left_active = true,
            Direction::Right => self.right_active = true,
        }
    }
}

/// The fixed-length segment store. Positions never change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    segments: Vec<Segment>,
}

impl Bus {
    pub fn new(length: usize) -> Self {
        Self {
            segments: vec![Segment::EMPTY; length],
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn symbol_at(&self, position: usize) -> Symbol {
        self.segments
            .get(position)
            .map_or(Symbol::Empty, |segment| segment.symbol)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.segments.iter().map(|segment| segment.symbol).collect()
    }

    /// True when no segment carries anything.
    pub fn is_quiet(&self) -> bool {
        self.segments.iter().all(|segment| segment.symbol.is_empty())
    }

    /// Phase one of a tick: compute the next state from the committed one,
    /// then swap it in.
    pub fn advance(&mut self) {
        let next = propagate(&self.segments);
        self.segments = next;
    }

    /// Drive `symbol` onto the bus at `position`, both directions active.
    pub fn emit(&mut self, position: usize, symbol: Symbol) {
        if let Some(segment) = self.segments.get_mut(position) {
            *segment = Segment::emitted(symbol);
        }
    }

    pub fn touched_positions(&self) -> Vec<usize> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, segment)| segment.touched)
            .map(|(position, _)| position)
            .collect()
    }
}
