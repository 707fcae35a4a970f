//! In-memory [`DeviceAccess`] implementation.
//!
//! Produces deterministic samples, remembers every call it receives and can
//! be told to fail a specific call, report overflows or deliver short reads.
//! Used by the tests and the demo binaries when no hardware is attached.

use crate::channel::{ChannelConfig, ChannelId, MAX_CHANNELS};
use crate::device::{
    BlockRun, BufferBinding, BulkRead, DeviceAccess, DeviceCall, DeviceStatus, SampleSink,
    SignalGenerator, ValuesRead,
};
use crate::rate::{TimeUnit, TriggerTimestamp};
use crate::timebase::{DeviceFamily, TimebaseCode};
use crate::trigger::Trigger;
use std::collections::HashMap;

#[derive(Debug)]
pub struct SimulatedDevice {
    family: DeviceFamily,
    channel_count: usize,
    memory_samples: u64,
    ready_after_polls: Option<u32>,
    read_limit: Option<u64>,
    block_overflow: u16,
    segment_overflow: HashMap<u32, u16>,
    timestamps: Option<(i64, TimeUnit)>,
    pending_failures: HashMap<DeviceCall, DeviceStatus>,

    channels: Vec<(bool, ChannelConfig)>,
    trigger: Option<Trigger>,
    signal_generator: Option<SignalGenerator>,
    captures: u32,
    segments: u32,
    last_run: Option<BlockRun>,
    running: bool,
    polls: u32,

    calls: Vec<DeviceCall>,
    bindings: Vec<BufferBinding>,
}

impl SimulatedDevice {
    pub const DEFAULT_MEMORY_SAMPLES: u64 = 32 * 1024 * 1024;
    /// Trigger spacing reported for rapid block segments.
    pub const DEFAULT_TIMESTAMP_STEP_NS: i64 = 100;

    pub fn new(family: DeviceFamily) -> Self {
        // only the 6000 driver reports per-segment trigger times
        let timestamps = match family {
            DeviceFamily::Ps6000 => Some((Self::DEFAULT_TIMESTAMP_STEP_NS, TimeUnit::Nanoseconds)),
            DeviceFamily::Ps4000 => None,
        };

        Self {
            family,
            channel_count: MAX_CHANNELS,
            memory_samples: Self::DEFAULT_MEMORY_SAMPLES,
            ready_after_polls: Some(1),
            read_limit: None,
            block_overflow: 0,
            segment_overflow: HashMap::new(),
            timestamps,
            pending_failures: HashMap::new(),
            channels: vec![(false, ChannelConfig::default()); MAX_CHANNELS],
            trigger: None,
            signal_generator: None,
            captures: 1,
            segments: 1,
            last_run: None,
            running: false,
            polls: 0,
            calls: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn with_channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count.min(MAX_CHANNELS);
        self
    }

    /// Total acquisition memory in samples, shared by all segments.
    pub fn with_memory_samples(mut self, samples: u64) -> Self {
        self.memory_samples = samples;
        self
    }

    /// Report ready on the `polls`-th call to `is_ready`.
    pub fn ready_after(mut self, polls: u32) -> Self {
        self.ready_after_polls = Some(polls.max(1));
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.ready_after_polls = None;
        self
    }

    /// Deliver at most `samples` samples per read (per segment for bulk reads).
    pub fn with_read_limit(mut self, samples: u64) -> Self {
        self.read_limit = Some(samples);
        self
    }

    pub fn with_block_overflow(mut self, mask: u16) -> Self {
        self.block_overflow = mask;
        self
    }

    pub fn with_segment_overflow(mut self, segment: u32, mask: u16) -> Self {
        self.segment_overflow.insert(segment, mask);
        self
    }

    pub fn with_timestamps(mut self, step: i64, unit: TimeUnit) -> Self {
        self.timestamps = Some((step, unit));
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = None;
        self
    }

    /// Make the next invocation of `call` fail with `status`.
    pub fn fail_next(&mut self, call: DeviceCall, status: DeviceStatus) {
        self.pending_failures.insert(call, status);
    }

    /// Value of sample `index` of `segment` on `channel`.
    ///
    /// The 6000 family left-aligns its 8-bit samples, so only the upper byte
    /// carries information there.
    pub fn sample_at(&self, channel: ChannelId, segment: u32, index: u64) -> i16 {
        let phase = index + u64::from(segment) * 7 + channel.index() as u64 * 31;
        let base = (phase % 256) as i16 - 128;
        match self.family {
            DeviceFamily::Ps6000 => base << 8,
            DeviceFamily::Ps4000 => base * 16,
        }
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn call_count(&self, call: DeviceCall) -> usize {
        self.calls.iter().filter(|&&c| c == call).count()
    }

    pub fn bindings(&self) -> &[BufferBinding] {
        &self.bindings
    }

    pub fn channel_setting(&self, channel: ChannelId) -> Option<(bool, ChannelConfig)> {
        self.channels.get(channel.index()).copied()
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        self.trigger.as_ref()
    }

    pub fn signal_generator(&self) -> Option<&SignalGenerator> {
        self.signal_generator.as_ref()
    }

    pub fn captures(&self) -> u32 {
        self.captures
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn last_run(&self) -> Option<&BlockRun> {
        self.last_run.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn enter(&mut self, call: DeviceCall) -> Result<(), DeviceStatus> {
        self.calls.push(call);
        match self.pending_failures.remove(&call) {
            Some(status) => {
                log::debug!("Simulated {call} fails with {status}");
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn run_length(&self) -> Result<u64, DeviceStatus> {
        self.last_run
            .map(|run| run.pre_trigger_samples + run.post_trigger_samples)
            .ok_or(DeviceStatus::INVALID_PARAMETER)
    }

    fn check_channel(&self, channel: ChannelId) -> Result<(), DeviceStatus> {
        if channel.index() < self.channel_count {
            Ok(())
        } else {
            Err(DeviceStatus::INVALID_CHANNEL)
        }
    }
}

impl DeviceAccess for SimulatedDevice {
    fn family(&self) -> DeviceFamily {
        self.family
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn get_timebase(&mut self, code: TimebaseCode, trace_length: u64) -> Result<f64, DeviceStatus> {
        self.enter(DeviceCall::GetTimebase)?;
        if trace_length > self.memory_samples / u64::from(self.segments.max(1)) {
            return Err(DeviceStatus::INVALID_PARAMETER);
        }
        Ok(self.family.policy().to_interval_ns(code))
    }

    fn set_channel(
        &mut self,
        channel: ChannelId,
        enabled: bool,
        config: &ChannelConfig,
    ) -> Result<(), DeviceStatus> {
        self.enter(DeviceCall::SetChannel)?;
        self.check_channel(channel)?;
        self.channels[channel.index()] = (enabled, *config);
        Ok(())
    }

    fn set_simple_trigger(&mut self, trigger: &Trigger) -> Result<(), DeviceStatus> {
        self.enter(DeviceCall::SetTrigger)?;
        self.check_channel(trigger.source)?;
        self.trigger = Some(trigger.clone());
        Ok(())
    }

    fn set_capture_count(&mut self, captures: u32) -> Result<(), DeviceStatus> {
        self.enter(DeviceCall::SetNoOfCaptures)?;
        if captures == 0 {
            return Err(DeviceStatus::INVALID_PARAMETER);
        }
        self.captures = captures;
        Ok(())
    }

    fn allocate_segments(&mut self, segments: u32) -> Result<u64, DeviceStatus> {
        self.enter(DeviceCall::MemorySegments)?;
        if segments == 0 {
            return Err(DeviceStatus::INVALID_PARAMETER);
        }
        self.segments = segments;
        Ok(self.memory_samples / u64::from(segments))
    }

    fn run_block(&mut self, run: &BlockRun) -> Result<(), DeviceStatus> {
        self.enter(DeviceCall::RunBlock)?;
        if self.captures > self.segments {
            return Err(DeviceStatus::INVALID_PARAMETER);
        }
        self.last_run = Some(*run);
        self.running = true;
        self.polls = 0;
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool, DeviceStatus> {
        self.enter(DeviceCall::IsReady)?;
        if !self.running {
            return Ok(false);
        }
        self.polls += 1;
        let ready = self
            .ready_after_polls
            .is_some_and(|polls| self.polls >= polls);
        if ready {
            self.running = false;
        }
        Ok(ready)
    }

    fn stop(&mut self) -> Result<(), DeviceStatus> {
        self.enter(DeviceCall::Stop)?;
        self.running = false;
        Ok(())
    }

    fn bind_buffer(&mut self, binding: &BufferBinding) -> Result<(), DeviceStatus> {
        self.enter(DeviceCall::SetDataBuffer)?;
        self.check_channel(binding.channel)?;
        self.bindings.push(*binding);
        Ok(())
    }

    fn get_values(
        &mut self,
        start_index: u64,
        samples: u64,
        sinks: &mut [SampleSink<'_>],
    ) -> Result<ValuesRead, DeviceStatus> {
        self.enter(DeviceCall::GetValues)?;
        let available = self.run_length()?.saturating_sub(start_index);
        let mut delivered = samples.min(available);
        if let Some(limit) = self.read_limit {
            delivered = delivered.min(limit);
        }

        for sink in sinks.iter_mut() {
            let count = (delivered as usize).min(sink.samples.len());
            for (offset, sample) in sink.samples[..count].iter_mut().enumerate() {
                *sample = self.sample_at(sink.binding.channel, 0, start_index + offset as u64);
            }
        }

        Ok(ValuesRead {
            samples: delivered,
            overflow: self.block_overflow,
        })
    }

    fn get_values_bulk(
        &mut self,
        from_segment: u32,
        to_segment: u32,
        samples: u64,
        sinks: &mut [SampleSink<'_>],
    ) -> Result<BulkRead, DeviceStatus> {
        self.enter(DeviceCall::GetValuesBulk)?;
        if to_segment < from_segment || to_segment >= self.captures {
            return Err(DeviceStatus::INVALID_PARAMETER);
        }
        let mut delivered = samples.min(self.run_length()?);
        if let Some(limit) = self.read_limit {
            delivered = delivered.min(limit);
        }

        for sink in sinks.iter_mut() {
            let Some(segment) = sink.binding.segment else {
                continue;
            };
            if !(from_segment..=to_segment).contains(&segment) {
                continue;
            }
            let count = (delivered as usize).min(sink.samples.len());
            for (index, sample) in sink.samples[..count].iter_mut().enumerate() {
                *sample = self.sample_at(sink.binding.channel, segment, index as u64);
            }
        }

        let overflow = (from_segment..=to_segment)
            .map(|segment| self.segment_overflow.get(&segment).copied().unwrap_or(0))
            .collect();

        Ok(BulkRead {
            samples_per_segment: delivered,
            overflow,
        })
    }

    fn get_trigger_timestamps(
        &mut self,
        from_segment: u32,
        to_segment: u32,
    ) -> Result<Vec<TriggerTimestamp>, DeviceStatus> {
        self.enter(DeviceCall::GetTriggerTimeOffsets)?;
        if to_segment < from_segment {
            return Err(DeviceStatus::INVALID_PARAMETER);
        }
        Ok(match self.timestamps {
            Some((step, unit)) => (from_segment..=to_segment)
                .map(|segment| TriggerTimestamp::new(i64::from(segment) * step, unit))
                .collect(),
            None => Vec::new(),
        })
    }

    fn set_square_wave(&mut self, generator: &SignalGenerator) -> Result<(), DeviceStatus> {
        self.enter(DeviceCall::SetSigGen)?;
        self.signal_generator = Some(*generator);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_one_shot() {
        let mut device = SimulatedDevice::new(DeviceFamily::Ps6000);
        device.fail_next(DeviceCall::SetNoOfCaptures, DeviceStatus::MEMORY_FAIL);

        assert_eq!(device.set_capture_count(2), Err(DeviceStatus::MEMORY_FAIL));
        assert_eq!(device.set_capture_count(2), Ok(()));
        assert_eq!(device.call_count(DeviceCall::SetNoOfCaptures), 2);
    }

    #[test]
    fn test_ready_after_polls() {
        let mut device = SimulatedDevice::new(DeviceFamily::Ps4000).ready_after(3);
        let run = BlockRun {
            pre_trigger_samples: 0,
            post_trigger_samples: 10,
            timebase: TimebaseCode::new(3),
            segment_index: 0,
        };
        device.run_block(&run).unwrap();

        assert!(!device.is_ready().unwrap());
        assert!(!device.is_ready().unwrap());
        assert!(device.is_ready().unwrap());
    }

    #[test]
    fn test_get_values_fills_sinks() {
        let mut device = SimulatedDevice::new(DeviceFamily::Ps6000).with_read_limit(4);
        let run = BlockRun {
            pre_trigger_samples: 2,
            post_trigger_samples: 8,
            timebase: TimebaseCode::new(0),
            segment_index: 0,
        };
        device.run_block(&run).unwrap();

        let mut storage = vec![0i16; 6];
        let mut sinks = [SampleSink {
            binding: BufferBinding {
                channel: ChannelId::B,
                length: 6,
                segment: None,
            },
            samples: &mut storage,
        }];
        let read = device.get_values(5, 6, &mut sinks).unwrap();

        assert_eq!(read.samples, 4);
        assert_eq!(storage[0], device.sample_at(ChannelId::B, 0, 5));
        assert_eq!(storage[3], device.sample_at(ChannelId::B, 0, 8));
        assert_eq!(storage[4], 0);
    }

    #[test]
    fn test_segments_share_memory() {
        let mut device = SimulatedDevice::new(DeviceFamily::Ps6000).with_memory_samples(1_000);
        assert_eq!(device.allocate_segments(4), Ok(250));
        assert_eq!(device.allocate_segments(0), Err(DeviceStatus::INVALID_PARAMETER));
    }

    #[test]
    fn test_ps4000_reports_no_timestamps() {
        let mut device = SimulatedDevice::new(DeviceFamily::Ps4000);
        assert!(device.get_trigger_timestamps(0, 3).unwrap().is_empty());
    }
}
