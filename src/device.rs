//! The vendor-call boundary.
//!
//! [`DeviceAccess`] is the set of driver operations the acquisition core
//! needs. An implementation owns the device handle; every call reports the
//! raw driver status through `Err` when it is not [`DeviceStatus::OK`].

use crate::channel::{ChannelConfig, ChannelId};
use crate::error::MeasurementError;
use crate::rate::TriggerTimestamp;
use crate::timebase::{DeviceFamily, TimebaseCode};
use crate::trigger::Trigger;
use std::fmt;

/// Raw driver status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceStatus(u32);

impl DeviceStatus {
    pub const OK: Self = Self(0x00);
    pub const MEMORY_FAIL: Self = Self(0x02);
    pub const NOT_RESPONDING: Self = Self(0x07);
    pub const INVALID_HANDLE: Self = Self(0x0C);
    pub const INVALID_PARAMETER: Self = Self(0x0D);
    pub const INVALID_TIMEBASE: Self = Self(0x0E);
    pub const INVALID_CHANNEL: Self = Self(0x10);

    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> u32 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::OK => Some("PICO_OK"),
            Self::MEMORY_FAIL => Some("PICO_MEMORY_FAIL"),
            Self::NOT_RESPONDING => Some("PICO_NOT_RESPONDING"),
            Self::INVALID_HANDLE => Some("PICO_INVALID_HANDLE"),
            Self::INVALID_PARAMETER => Some("PICO_INVALID_PARAMETER"),
            Self::INVALID_TIMEBASE => Some("PICO_INVALID_TIMEBASE"),
            Self::INVALID_CHANNEL => Some("PICO_INVALID_CHANNEL"),
            _ => None,
        }
    }

    /// `Ok(())` for [`DeviceStatus::OK`], the status itself otherwise.
    pub fn into_result(self) -> Result<(), DeviceStatus> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08X})", self.0),
            None => write!(f, "status 0x{:08X}", self.0),
        }
    }
}

/// Driver operation a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCall {
    GetTimebase,
    SetChannel,
    SetTrigger,
    SetNoOfCaptures,
    MemorySegments,
    RunBlock,
    IsReady,
    Stop,
    SetDataBuffer,
    GetValues,
    GetValuesBulk,
    GetTriggerTimeOffsets,
    SetSigGen,
}

impl DeviceCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCall::GetTimebase => "GetTimebase2",
            DeviceCall::SetChannel => "SetChannel",
            DeviceCall::SetTrigger => "SetSimpleTrigger",
            DeviceCall::SetNoOfCaptures => "SetNoOfCaptures",
            DeviceCall::MemorySegments => "MemorySegments",
            DeviceCall::RunBlock => "RunBlock",
            DeviceCall::IsReady => "IsReady",
            DeviceCall::Stop => "Stop",
            DeviceCall::SetDataBuffer => "SetDataBuffer",
            DeviceCall::GetValues => "GetValues",
            DeviceCall::GetValuesBulk => "GetValuesBulk",
            DeviceCall::GetTriggerTimeOffsets => "GetValuesTriggerTimeOffsetBulk64",
            DeviceCall::SetSigGen => "SetSigGenBuiltIn",
        }
    }
}

impl fmt::Display for DeviceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a block (or rapid block) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRun {
    pub pre_trigger_samples: u64,
    pub post_trigger_samples: u64,
    pub timebase: TimebaseCode,
    pub segment_index: u32,
}

/// Declares a host buffer region for one channel, and for rapid block the
/// segment it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    pub channel: ChannelId,
    pub length: usize,
    pub segment: Option<u32>,
}

/// Host memory the device writes samples into. `samples.len()` equals
/// `binding.length`.
#[derive(Debug)]
pub struct SampleSink<'a> {
    pub binding: BufferBinding,
    pub samples: &'a mut [i16],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuesRead {
    pub samples: u64,
    /// Bit i set: channel i overflowed.
    pub overflow: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRead {
    pub samples_per_segment: u64,
    /// One word per segment of the requested range.
    pub overflow: Vec<u16>,
}

/// Built-in square wave generator setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalGenerator {
    pub peak_to_peak_uv: u32,
    pub frequency_hz: f64,
}

pub trait DeviceAccess {
    fn family(&self) -> DeviceFamily;

    fn channel_count(&self) -> usize;

    /// Validate `code` for `trace_length` samples; returns the realized
    /// sample interval in nanoseconds.
    fn get_timebase(&mut self, code: TimebaseCode, trace_length: u64) -> Result<f64, DeviceStatus>;

    fn set_channel(
        &mut self,
        channel: ChannelId,
        enabled: bool,
        config: &ChannelConfig,
    ) -> Result<(), DeviceStatus>;

    fn set_simple_trigger(&mut self, trigger: &Trigger) -> Result<(), DeviceStatus>;

    fn set_capture_count(&mut self, captures: u32) -> Result<(), DeviceStatus>;

    /// Split device memory into `segments`; returns the largest number of
    /// samples one segment holds.
    fn allocate_segments(&mut self, segments: u32) -> Result<u64, DeviceStatus>;

    fn run_block(&mut self, run: &BlockRun) -> Result<(), DeviceStatus>;

    fn is_ready(&mut self) -> Result<bool, DeviceStatus>;

    fn stop(&mut self) -> Result<(), DeviceStatus>;

    fn bind_buffer(&mut self, binding: &BufferBinding) -> Result<(), DeviceStatus>;

    /// Copy up to `samples` samples starting at `start_index` into the
    /// bound sinks.
    fn get_values(
        &mut self,
        start_index: u64,
        samples: u64,
        sinks: &mut [SampleSink<'_>],
    ) -> Result<ValuesRead, DeviceStatus>;

    /// Copy segments `from_segment..=to_segment` into the sinks tagged with
    /// the matching segment.
    fn get_values_bulk(
        &mut self,
        from_segment: u32,
        to_segment: u32,
        samples: u64,
        sinks: &mut [SampleSink<'_>],
    ) -> Result<BulkRead, DeviceStatus>;

    /// Trigger time of every segment in `from_segment..=to_segment`. Families
    /// without timestamp support return an empty list.
    fn get_trigger_timestamps(
        &mut self,
        from_segment: u32,
        to_segment: u32,
    ) -> Result<Vec<TriggerTimestamp>, DeviceStatus>;

    fn set_square_wave(&mut self, generator: &SignalGenerator) -> Result<(), DeviceStatus>;
}

impl<D: DeviceAccess + ?Sized> DeviceAccess for &mut D {
    fn family(&self) -> DeviceFamily {
        (**self).family()
    }

    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn get_timebase(&mut self, code: TimebaseCode, trace_length: u64) -> Result<f64, DeviceStatus> {
        (**self).get_timebase(code, trace_length)
    }

    fn set_channel(
        &mut self,
        channel: ChannelId,
        enabled: bool,
        config: &ChannelConfig,
    ) -> Result<(), DeviceStatus> {
        (**self).set_channel(channel, enabled, config)
    }

    fn set_simple_trigger(&mut self, trigger: &Trigger) -> Result<(), DeviceStatus> {
        (**self).set_simple_trigger(trigger)
    }

    fn set_capture_count(&mut self, captures: u32) -> Result<(), DeviceStatus> {
        (**self).set_capture_count(captures)
    }

    fn allocate_segments(&mut self, segments: u32) -> Result<u64, DeviceStatus> {
        (**self).allocate_segments(segments)
    }

    fn run_block(&mut self, run: &BlockRun) -> Result<(), DeviceStatus> {
        (**self).run_block(run)
    }

    fn is_ready(&mut self) -> Result<bool, DeviceStatus> {
        (**self).is_ready()
    }

    fn stop(&mut self) -> Result<(), DeviceStatus> {
        (**self).stop()
    }

    fn bind_buffer(&mut self, binding: &BufferBinding) -> Result<(), DeviceStatus> {
        (**self).bind_buffer(binding)
    }

    fn get_values(
        &mut self,
        start_index: u64,
        samples: u64,
        sinks: &mut [SampleSink<'_>],
    ) -> Result<ValuesRead, DeviceStatus> {
        (**self).get_values(start_index, samples, sinks)
    }

    fn get_values_bulk(
        &mut self,
        from_segment: u32,
        to_segment: u32,
        samples: u64,
        sinks: &mut [SampleSink<'_>],
    ) -> Result<BulkRead, DeviceStatus> {
        (**self).get_values_bulk(from_segment, to_segment, samples, sinks)
    }

    fn get_trigger_timestamps(
        &mut self,
        from_segment: u32,
        to_segment: u32,
    ) -> Result<Vec<TriggerTimestamp>, DeviceStatus> {
        (**self).get_trigger_timestamps(from_segment, to_segment)
    }

    fn set_square_wave(&mut self, generator: &SignalGenerator) -> Result<(), DeviceStatus> {
        (**self).set_square_wave(generator)
    }
}

/// Attribute a driver status to the call that produced it.
pub(crate) trait DeviceResultExt<T> {
    fn during(self, call: DeviceCall) -> Result<T, MeasurementError>;
}

impl<T> DeviceResultExt<T> for Result<T, DeviceStatus> {
    fn during(self, call: DeviceCall) -> Result<T, MeasurementError> {
        self.map_err(|status| {
            log::error!("{call} returned {status}");
            MeasurementError::DeviceCommandFailed { call, status }
        })
    }
}
