use crate::channel::ChannelId;
use crate::device::{DeviceCall, DeviceStatus};
use crate::measurement::AcquisitionMode;
use crate::timebase::{DeviceFamily, TimebaseCode};
use crate::trigger::TriggerPosition;
use polars::prelude::PolarsError;
use std::collections::TryReserveError;
use std::fmt;
use std::time::Duration;

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Resource,
    Device,
    Protocol,
}

#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("Device has {count} channels, you cannot request channel with number {index}")]
    InvalidChannel { index: usize, count: usize },

    #[error("Invalid trigger position {position} for a trace of {trace_length} samples")]
    InvalidTriggerPosition {
        position: TriggerPosition,
        trace_length: u64,
    },

    #[error("Trigger level {0} is outside the full scale [-1, 1]")]
    InvalidTriggerLevel(f64),

    #[error("Trace length must be at least one sample")]
    InvalidTraceLength,

    #[error("Trace count must be at least 1")]
    InvalidTraceCount,

    #[error("No channels are enabled")]
    NoEnabledChannels,

    #[error("Memory budget of {byte_budget} bytes does not fit a single page")]
    BudgetTooSmall { byte_budget: u64 },

    #[error("Frequency of signal generator ({frequency_hz} Hz) is not valid")]
    InvalidSignalFrequency { frequency_hz: f64 },

    #[error("{feature} is not supported by the {family}")]
    Unsupported {
        feature: &'static str,
        family: DeviceFamily,
    },

    #[error("The requested channel {0} is not enabled")]
    ChannelNotEnabled(ChannelId),

    #[error("Unable to allocate {samples} samples for channel {channel}")]
    AllocationFailed {
        channel: ChannelId,
        samples: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("Unable to get data: memory for channel {0} is not allocated")]
    BuffersNotAllocated(ChannelId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to set the requested timebase ({code}) and sample number ({trace_length}): {status}")]
    DeviceRejectedConfiguration {
        code: TimebaseCode,
        trace_length: u64,
        status: DeviceStatus,
    },

    #[error("{call} failed: {status}")]
    DeviceCommandFailed {
        call: DeviceCall,
        status: DeviceStatus,
    },

    #[error("No completed acquisition to fetch data from")]
    NotReady,

    #[error("The maximum length of trace you can get with {segments} traces is {max_samples}, but you requested {requested}")]
    TraceTooLongForSegments {
        segments: u32,
        max_samples: u64,
        requested: u64,
    },

    #[error("Cannot fetch in {expected} mode, the last run was in {actual} mode")]
    WrongAcquisitionMode {
        expected: AcquisitionMode,
        actual: AcquisitionMode,
    },

    #[error("Device was not ready after {0:?}")]
    WaitTimedOut(Duration),

    #[error("Acquisition was cancelled")]
    Cancelled,

    #[error("Failed to build data frame: {0}")]
    DataFrame(#[from] PolarsError),
}

impl MeasurementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MeasurementError::InvalidChannel { .. }
            | MeasurementError::InvalidTriggerPosition { .. }
            | MeasurementError::InvalidTriggerLevel(_)
            | MeasurementError::InvalidTraceLength
            | MeasurementError::InvalidTraceCount
            | MeasurementError::NoEnabledChannels
            | MeasurementError::BudgetTooSmall { .. }
            | MeasurementError::InvalidSignalFrequency { .. }
            | MeasurementError::Unsupported { .. }
            | MeasurementError::ChannelNotEnabled(_) => ErrorKind::Configuration,
            MeasurementError::AllocationFailed { .. }
            | MeasurementError::BuffersNotAllocated(_)
            | MeasurementError::Io(_)
            | MeasurementError::DataFrame(_) => ErrorKind::Resource,
            MeasurementError::DeviceRejectedConfiguration { .. }
            | MeasurementError::DeviceCommandFailed { .. } => ErrorKind::Device,
            MeasurementError::NotReady
            | MeasurementError::TraceTooLongForSegments { .. }
            | MeasurementError::WrongAcquisitionMode { .. }
            | MeasurementError::WaitTimedOut(_)
            | MeasurementError::Cancelled => ErrorKind::Protocol,
        }
    }

    /// Raw vendor status, if the error came from the device.
    pub fn device_status(&self) -> Option<DeviceStatus> {
        match self {
            MeasurementError::DeviceRejectedConfiguration { status, .. }
            | MeasurementError::DeviceCommandFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Non-fatal problem with fetched data. Logged and handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataQualityWarning {
    /// Input amplifier saturated; `trace` is set for rapid block pages.
    Overflow {
        channel: ChannelId,
        trace: Option<u64>,
    },
    ShortRead { requested: u64, fetched: u64 },
}

impl DataQualityWarning {
    /// Expand an overflow word (bit i set means channel i saturated).
    pub fn from_overflow_mask(mask: u16, channel_count: usize, trace: Option<u64>) -> Vec<Self> {
        (0..channel_count.min(16))
            .filter(|bit| mask & (1 << bit) != 0)
            .map(|bit| DataQualityWarning::Overflow {
                channel: ChannelId::new(bit),
                trace,
            })
            .collect()
    }
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityWarning::Overflow {
                channel,
                trace: None,
            } => write!(f, "Overflow on channel {channel}"),
            DataQualityWarning::Overflow {
                channel,
                trace: Some(trace),
            } => write!(f, "Overflow on channel {channel} of trace {trace}"),
            DataQualityWarning::ShortRead { requested, fetched } => write!(
                f,
                "The number of read samples ({fetched}) was smaller than requested ({requested})"
            ),
        }
    }
}
