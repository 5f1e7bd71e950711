//! Single-channel readout events.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single-channel, single-time readout event from a strip module.
///
/// Channels are numbered module-wide: front-side channels first, then
/// back-side channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Digi {
    /// Detector address (at least module granularity).
    pub address: u32,
    /// Module-wide channel number.
    pub channel: u16,
    /// Time in nanoseconds.
    pub time: u32,
    /// ADC charge code.
    pub charge: u16,
}

impl Digi {
    /// Largest representable digi time (31 bits).
    pub const MAX_TIME: u64 = (1 << 31) - 1;

    /// Creates a new digi, clamping the time to [`Digi::MAX_TIME`].
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(address: u32, channel: u16, time: u64, charge: u16) -> Self {
        Self {
            address,
            channel,
            time: time.min(Self::MAX_TIME) as u32,
            charge,
        }
    }
}

/// Side of a double-sided strip sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModuleSide {
    /// Front (p-) side, channels numbered first.
    Front,
    /// Back (n-) side.
    Back,
}

impl ModuleSide {
    /// Both sides in readout order.
    pub const BOTH: [ModuleSide; 2] = [ModuleSide::Front, ModuleSide::Back];

    /// Index of the side (0 = front, 1 = back).
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ModuleSide::Front => 0,
            ModuleSide::Back => 1,
        }
    }
}
