//! Timebase quantization for the supported device families.
//!
//! A timebase code is a small integer the driver understands. Short intervals
//! map onto a power-of-two table above a family-specific floor, long
//! intervals onto a linear table. The mapping is lossy; the interval the
//! device reports after accepting a code is authoritative.

use crate::channel::{enabled_ids, Channel};
use std::fmt;
use std::ops::RangeInclusive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimebaseCode(u32);

impl TimebaseCode {
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TimebaseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// 4223, 4224, 4423 and 4424
    Ps4000,
    Ps6000,
}

impl DeviceFamily {
    pub fn policy(self) -> &'static dyn FamilyPolicy {
        match self {
            DeviceFamily::Ps4000 => &Ps4000Policy,
            DeviceFamily::Ps6000 => &Ps6000Policy,
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::Ps4000 => write!(f, "4000 series"),
            DeviceFamily::Ps6000 => write!(f, "6000 series"),
        }
    }
}

/// Constants describing a two-region timebase table. All times in picoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimebaseTable {
    /// Fastest interval; shorter requests snap to it.
    pub floor_ps: u64,
    /// Intervals at or above this use the linear region.
    pub knee_ps: u64,
    pub step_ps: u64,
    pub offset: u32,
    /// First code of the linear region when decoding.
    pub linear_from_code: u32,
}

/// Everything that differs between device generations.
pub trait FamilyPolicy: fmt::Debug + Send + Sync {
    fn family(&self) -> DeviceFamily;

    fn timebase_table(&self) -> TimebaseTable;

    /// Right shift that keeps only the significant bits of a sample when
    /// exporting, if the family pads its samples.
    fn export_shift(&self) -> Option<u32>;

    /// Frequencies accepted by the built-in square wave generator.
    fn square_wave_range(&self) -> Option<RangeInclusive<f64>>;

    fn to_code(&self, interval_ps: u64) -> TimebaseCode {
        let table = self.timebase_table();
        let interval_ps = interval_ps.max(table.floor_ps);

        if interval_ps < table.knee_ps {
            TimebaseCode((interval_ps / table.floor_ps).ilog2())
        } else {
            let steps = u32::try_from(interval_ps / table.step_ps).unwrap_or(u32::MAX);
            TimebaseCode(steps.saturating_add(table.offset))
        }
    }

    /// Exact interval of a code in picoseconds.
    fn interval_ps(&self, code: TimebaseCode) -> u64 {
        let table = self.timebase_table();
        if code.0 < table.linear_from_code {
            table.floor_ps << code.0
        } else {
            u64::from(code.0 - table.offset) * table.step_ps
        }
    }

    fn to_interval_ns(&self, code: TimebaseCode) -> f64 {
        self.interval_ps(code) as f64 / 1000.0
    }

    /// Raise `code` to the fastest timebase the enabled channel pattern allows.
    ///
    /// Channels sharing an ADC pair halve its rate, so two channels on the same
    /// half need code 2, two on different halves need code 1 and three or more
    /// need code 2. An already slower code is left alone.
    fn fix_timebase_floor(&self, code: TimebaseCode, channels: &[Channel]) -> TimebaseCode {
        let enabled = enabled_ids(channels);
        let minimum = match enabled.as_slice() {
            [] | [_] => 0,
            [first, second] if first.half() == second.half() => 2,
            [_, _] => 1,
            _ => 2,
        };

        code.max(TimebaseCode(minimum))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ps4000Policy;

impl FamilyPolicy for Ps4000Policy {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Ps4000
    }

    fn timebase_table(&self) -> TimebaseTable {
        TimebaseTable {
            floor_ps: 12_500,
            knee_ps: 100_000,
            step_ps: 50_000,
            offset: 1,
            linear_from_code: 4,
        }
    }

    fn export_shift(&self) -> Option<u32> {
        None
    }

    fn square_wave_range(&self) -> Option<RangeInclusive<f64>> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ps6000Policy;

impl Ps6000Policy {
    const MIN_FREQUENCY_HZ: f64 = 0.03;
    const SQUARE_MAX_FREQUENCY_HZ: f64 = 20_000_000.0;
}

impl FamilyPolicy for Ps6000Policy {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Ps6000
    }

    fn timebase_table(&self) -> TimebaseTable {
        TimebaseTable {
            floor_ps: 200,
            knee_ps: 6_400,
            step_ps: 6_400,
            offset: 4,
            linear_from_code: 6,
        }
    }

    // 8-bit ADC, left-aligned in a 16-bit word
    fn export_shift(&self) -> Option<u32> {
        Some(8)
    }

    fn square_wave_range(&self) -> Option<RangeInclusive<f64>> {
        Some(Self::MIN_FREQUENCY_HZ..=Self::SQUARE_MAX_FREQUENCY_HZ)
    }
}
