//! Trigger timestamps and the captured-event rate derived from them.

use std::fmt;

/// Unit the device picked for one trigger timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Femtoseconds,
    Picoseconds,
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    pub fn seconds_per_unit(self) -> f64 {
        match self {
            TimeUnit::Femtoseconds => 1e-15,
            TimeUnit::Picoseconds => 1e-12,
            TimeUnit::Nanoseconds => 1e-9,
            TimeUnit::Microseconds => 1e-6,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Seconds => 1.0,
        }
    }

    /// Decode the driver's time unit enumeration.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(TimeUnit::Femtoseconds),
            1 => Some(TimeUnit::Picoseconds),
            2 => Some(TimeUnit::Nanoseconds),
            3 => Some(TimeUnit::Microseconds),
            4 => Some(TimeUnit::Milliseconds),
            5 => Some(TimeUnit::Seconds),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Femtoseconds => "fs",
            TimeUnit::Picoseconds => "ps",
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTimestamp {
    pub value: i64,
    pub unit: TimeUnit,
}

impl TriggerTimestamp {
    pub fn new(value: i64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn as_seconds(&self) -> f64 {
        self.value as f64 * self.unit.seconds_per_unit()
    }
}

impl fmt::Display for TriggerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.as_str())
    }
}

/// Average event rate in events per second over `n_events` triggers.
///
/// Each timestamp is converted with its own unit. Fewer than two events, or
/// a span that is not positive, give 0.
pub fn estimate_rate(n_events: u64, first: TriggerTimestamp, last: TriggerTimestamp) -> f64 {
    if n_events < 2 {
        return 0.0;
    }
    if first.unit != last.unit {
        log::debug!("Time units of the first ({first}) and last ({last}) trigger differ");
    }

    let span = last.as_seconds() - first.as_seconds();
    if span <= 0.0 {
        log::debug!("Non-positive trigger span between {first} and {last}; rate set to 0");
        return 0.0;
    }

    (n_events - 1) as f64 / span
}
