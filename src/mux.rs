//! Addressing of the 16-way analog multiplexer in front of the metering chip.
//!
//! Slot 0 is wired straight to the front-end and bypasses the multiplexer;
//! slots `1..=16` map to multiplexer inputs `0..=15`, selected by four
//! binary-weighted lines S0..S3.

use crate::scheduler::ChannelIndex;

/// Number of select lines driving the multiplexer.
pub const SELECT_LINES: usize = 4;

/// Number of multiplexer inputs.
pub const MUX_INPUTS: usize = 1 << SELECT_LINES;

/// Multiplexer input number, `0..MUX_INPUTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MuxAddress(u8);

impl MuxAddress {
    /// Input the channel slot is wired to. The direct slot parks on input 0.
    ///
    /// Slots past the last input wrap onto the low bits, as the select lines
    /// would on hardware.
    pub fn for_channel(index: ChannelIndex) -> Self {
        let input = index.saturating_sub(1) % MUX_INPUTS;
        Self(input as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Logic level of each select line, `levels[k]` for S`k`.
    pub fn select_levels(self) -> [bool; SELECT_LINES] {
        let mut levels = [false; SELECT_LINES];
        for (bit, level) in levels.iter_mut().enumerate() {
            *level = self.0 & (1 << bit) != 0;
        }
        levels
    }
}

/// Output pins wired to the multiplexer select inputs.
pub trait SelectLines {
    fn set_level(&mut self, line: usize, high: bool);
}

/// Select-line state held in memory, for hosts without GPIO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatchedLines {
    levels: [bool; SELECT_LINES],
    writes: u64,
}

impl LatchedLines {
    pub fn levels(&self) -> [bool; SELECT_LINES] {
        self.levels
    }

    /// Total pin writes since creation.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl SelectLines for LatchedLines {
    fn set_level(&mut self, line: usize, high: bool) {
        if let Some(level) = self.levels.get_mut(line) {
            *level = high;
            self.writes += 1;
        }
    }
}

#[derive(Debug)]
pub struct Multiplexer<L> {
    lines: L,
    current: MuxAddress,
}

impl<L: SelectLines> Multiplexer<L> {
    pub fn new(lines: L) -> Self {
        Self {
            lines,
            current: MuxAddress::default(),
        }
    }

    /// Parks the multiplexer on input 0 so the first reading after boot is not
    /// taken from a floating input.
    pub fn begin(&mut self) {
        self.drive(MuxAddress::default());
    }

    /// Routes `channel` to the front-end and returns the input now selected.
    pub fn set_channel(&mut self, channel: ChannelIndex) -> MuxAddress {
        let address = MuxAddress::for_channel(channel);
        self.drive(address);
        address
    }

    pub fn current(&self) -> MuxAddress {
        self.current
    }

    pub fn lines(&self) -> &L {
        &self.lines
    }

    pub fn into_lines(self) -> L {
        self.lines
    }

    fn drive(&mut self, address: MuxAddress) {
        for (line, high) in address.select_levels().into_iter().enumerate() {
            self.lines.set_level(line, high);
        }
        self.current = address;
    }
}
