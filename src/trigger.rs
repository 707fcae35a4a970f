use crate::channel::ChannelId;
use crate::error::MeasurementError;
use std::fmt;

/// Where the trigger sits inside the trace.
///
/// The unit is explicit: a fraction of the trace length or an absolute
/// number of pre-trigger samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerPosition {
    Fraction(f64),
    Samples(u64),
}

impl TriggerPosition {
    /// Number of samples captured before the trigger event.
    pub fn pre_trigger_samples(self, trace_length: u64) -> Result<u64, MeasurementError> {
        match self {
            TriggerPosition::Fraction(fraction) if (0.0..=1.0).contains(&fraction) => {
                Ok((trace_length as f64 * fraction).round() as u64)
            }
            TriggerPosition::Samples(samples) if samples <= trace_length => Ok(samples),
            _ => Err(MeasurementError::InvalidTriggerPosition {
                position: self,
                trace_length,
            }),
        }
    }
}

impl fmt::Display for TriggerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerPosition::Fraction(fraction) => write!(f, "{fraction} of the trace"),
            TriggerPosition::Samples(samples) => write!(f, "{samples} samples"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerDirection {
    #[default]
    Rising,
    Falling,
}

impl TriggerDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerDirection::Rising => "rising",
            TriggerDirection::Falling => "falling",
        }
    }
}

/// Level trigger on one input channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub source: ChannelId,
    pub position: TriggerPosition,
    /// Threshold as a fraction of the channel's full scale.
    pub level: f64,
    pub direction: TriggerDirection,
}

impl Trigger {
    pub fn new(
        source: ChannelId,
        position: TriggerPosition,
        level: f64,
        direction: TriggerDirection,
    ) -> Self {
        Self {
            source,
            position,
            level,
            direction,
        }
    }

    pub fn on_channel(source: ChannelId) -> TriggerBuilder {
        TriggerBuilder {
            source,
            level: 0.0,
            direction: TriggerDirection::Rising,
        }
    }

    /// Check the parts of the trigger that do not depend on the trace length.
    pub fn validate(&self, channel_count: usize) -> Result<(), MeasurementError> {
        if self.source.index() >= channel_count {
            return Err(MeasurementError::InvalidChannel {
                index: self.source.index(),
                count: channel_count,
            });
        }
        if !(-1.0..=1.0).contains(&self.level) {
            return Err(MeasurementError::InvalidTriggerLevel(self.level));
        }
        Ok(())
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} edge on channel {} at level {}, position {}",
            self.direction.as_str(),
            self.source,
            self.level,
            self.position
        )
    }
}

#[derive(Debug)]
pub struct TriggerBuilder {
    source: ChannelId,
    level: f64,
    direction: TriggerDirection,
}

impl TriggerBuilder {
    pub fn rising_edge(mut self, level: f64) -> Self {
        self.direction = TriggerDirection::Rising;
        self.level = level;
        self
    }

    pub fn falling_edge(mut self, level: f64) -> Self {
        self.direction = TriggerDirection::Falling;
        self.level = level;
        self
    }

    pub fn at_fraction(self, fraction: f64) -> Trigger {
        Trigger::new(
            self.source,
            TriggerPosition::Fraction(fraction),
            self.level,
            self.direction,
        )
    }

    pub fn at_sample(self, samples: u64) -> Trigger {
        Trigger::new(
            self.source,
            TriggerPosition::Samples(samples),
            self.level,
            self.direction,
        )
    }
}
