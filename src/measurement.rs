//! Acquisition session: configuration, the run protocol and paged fetching.

use crate::channel::{enabled_ids, Channel, ChannelConfig, ChannelId, MAX_CHANNELS};
use crate::device::{
    BlockRun, BufferBinding, DeviceAccess, DeviceCall, DeviceResultExt, SampleSink,
    SignalGenerator,
};
use crate::error::{DataQualityWarning, MeasurementError};
use crate::memory::{format_sample_count, BufferChange, ChannelBuffer, MemoryPlan};
use crate::rate::estimate_rate;
use crate::timebase::{FamilyPolicy, TimebaseCode};
use crate::trigger::Trigger;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// One trace, fetched sample page by sample page.
    Block,
    /// Many traces in device memory segments, fetched trace page by trace page.
    RapidBlock,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Block => write!(f, "block"),
            AcquisitionMode::RapidBlock => write!(f, "rapid block"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configured,
    Running,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Configured => write!(f, "configured"),
            SessionState::Running => write!(f, "running"),
            SessionState::Ready => write!(f, "ready"),
        }
    }
}

/// Cooperative cancellation of the ready wait. Clones share the flag, so it
/// can be tripped from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How `run` waits for the device to finish an acquisition.
#[derive(Debug, Clone)]
pub struct ReadyWait {
    pub poll_interval: Duration,
    /// `None` waits for as long as the device needs.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl ReadyWait {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Default for ReadyWait {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            timeout: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Samples per trace.
    pub trace_length: u64,
    /// Traces per run; more than one selects rapid block mode.
    pub trace_count: u32,
    pub wait: ReadyWait,
}

impl AcquisitionConfig {
    pub const DEFAULT_TRACE_LENGTH: u64 = 1_000;
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            trace_length: Self::DEFAULT_TRACE_LENGTH,
            trace_count: 1,
            wait: ReadyWait::default(),
        }
    }
}

/// Result of one paged fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchReport {
    /// Samples (block) or traces (rapid block) delivered by this page.
    pub fetched: u64,
    pub warnings: Vec<DataQualityWarning>,
}

impl FetchReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// One acquisition session on one device.
///
/// Typical use: enable channels, choose a timebase and trace geometry,
/// allocate host buffers under a byte budget, `run`, then call the fetch
/// matching the run mode until it returns 0.
#[derive(Debug)]
pub struct Measurement<D: DeviceAccess> {
    device: D,
    policy: &'static dyn FamilyPolicy,
    channels: Vec<Channel>,
    buffers: Vec<ChannelBuffer>,
    trigger: Option<Trigger>,
    signal_generator: Option<SignalGenerator>,

    trace_length: u64,
    trace_count: u32,
    timebase: TimebaseCode,
    realized_interval_ns: Option<f64>,
    plan: Option<MemoryPlan>,
    wait: ReadyWait,

    state: SessionState,
    last_run_mode: Option<AcquisitionMode>,
    next_index: u64,
    length_fetched: usize,
    page_first_trace: u64,
    traces_in_page: u32,
    samples_per_trace: u64,
    rate_per_second: f64,
}

impl<D: DeviceAccess> Measurement<D> {
    pub fn new(device: D) -> Self {
        let config = AcquisitionConfig::default();
        Self::build(device, config.trace_length, config.trace_count, config.wait)
    }

    pub fn with_config(device: D, config: AcquisitionConfig) -> Result<Self, MeasurementError> {
        if config.trace_length == 0 {
            return Err(MeasurementError::InvalidTraceLength);
        }
        if config.trace_count == 0 {
            return Err(MeasurementError::InvalidTraceCount);
        }
        Ok(Self::build(
            device,
            config.trace_length,
            config.trace_count,
            config.wait,
        ))
    }

    fn build(device: D, trace_length: u64, trace_count: u32, wait: ReadyWait) -> Self {
        let policy = device.family().policy();
        let channel_count = device.channel_count().min(MAX_CHANNELS);
        log::debug!(
            "New measurement on a {} device with {channel_count} channels",
            policy.family()
        );

        Self {
            device,
            policy,
            channels: (0..channel_count)
                .map(|index| Channel::new(ChannelId::new(index)))
                .collect(),
            buffers: (0..channel_count).map(|_| ChannelBuffer::new()).collect(),
            trigger: None,
            signal_generator: None,
            trace_length,
            trace_count,
            timebase: TimebaseCode::default(),
            realized_interval_ns: None,
            plan: None,
            wait,
            state: SessionState::Idle,
            last_run_mode: None,
            next_index: 0,
            length_fetched: 0,
            page_first_trace: 0,
            traces_in_page: 0,
            samples_per_trace: 0,
            rate_per_second: 0.0,
        }
    }

    // ---- channels ----

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn enabled_channel_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_enabled()).count()
    }

    fn channel_id(&self, index: usize) -> Result<ChannelId, MeasurementError> {
        if index < self.channels.len() {
            Ok(ChannelId::new(index))
        } else {
            Err(MeasurementError::InvalidChannel {
                index,
                count: self.channels.len(),
            })
        }
    }

    /// Set every channel's enable flag from `mask`; channels past the end of
    /// the mask are disabled.
    pub fn enable_channels(&mut self, mask: &[bool]) -> Result<(), MeasurementError> {
        if mask.len() > self.channels.len() {
            return Err(MeasurementError::InvalidChannel {
                index: mask.len() - 1,
                count: self.channels.len(),
            });
        }

        for (index, channel) in self.channels.iter_mut().enumerate() {
            channel.set_enabled(mask.get(index).copied().unwrap_or(false));
        }
        log::debug!(
            "Enabled channels: {:?}",
            enabled_ids(&self.channels)
                .iter()
                .map(|id| id.letter())
                .collect::<String>()
        );

        self.configuration_changed();
        Ok(())
    }

    pub fn enable_channel(&mut self, index: usize) -> Result<(), MeasurementError> {
        let id = self.channel_id(index)?;
        self.channels[id.index()].enable();
        self.configuration_changed();
        Ok(())
    }

    pub fn disable_channel(&mut self, index: usize) -> Result<(), MeasurementError> {
        let id = self.channel_id(index)?;
        self.channels[id.index()].disable();
        self.configuration_changed();
        Ok(())
    }

    pub fn set_channel_config(
        &mut self,
        index: usize,
        config: ChannelConfig,
    ) -> Result<(), MeasurementError> {
        let id = self.channel_id(index)?;
        self.channels[id.index()].set_config(config);
        self.invalidate_run();
        Ok(())
    }

    // ---- trace geometry ----

    pub fn trace_length(&self) -> u64 {
        self.trace_length
    }

    pub fn set_trace_length(&mut self, trace_length: u64) -> Result<(), MeasurementError> {
        if trace_length == 0 {
            return Err(MeasurementError::InvalidTraceLength);
        }
        self.trace_length = trace_length;
        self.configuration_changed();
        Ok(())
    }

    pub fn trace_count(&self) -> u32 {
        self.trace_count
    }

    pub fn set_trace_count(&mut self, trace_count: u32) -> Result<(), MeasurementError> {
        if trace_count == 0 {
            return Err(MeasurementError::InvalidTraceCount);
        }
        self.trace_count = trace_count;
        self.configuration_changed();
        Ok(())
    }

    /// Mode the next `run` will use.
    pub fn acquisition_mode(&self) -> AcquisitionMode {
        if self.trace_count > 1 {
            AcquisitionMode::RapidBlock
        } else {
            AcquisitionMode::Block
        }
    }

    // ---- timebase ----

    pub fn policy(&self) -> &'static dyn FamilyPolicy {
        self.policy
    }

    pub fn timebase(&self) -> TimebaseCode {
        self.timebase
    }

    pub fn set_timebase_ps(&mut self, interval_ps: u64) {
        self.timebase = self.policy.to_code(interval_ps);
        self.realized_interval_ns = None;
        log::debug!(
            "Requested {interval_ps} ps, using timebase {} ({} ns)",
            self.timebase,
            self.policy.to_interval_ns(self.timebase)
        );
        self.invalidate_run();
    }

    pub fn set_timebase_ns(&mut self, interval_ns: u64) {
        self.set_timebase_ps(interval_ns.saturating_mul(1000));
    }

    /// Sample interval of the stored code according to the family table.
    pub fn timebase_ns(&self) -> f64 {
        self.policy.to_interval_ns(self.timebase)
    }

    /// Interval the device reported when the timebase was last applied.
    pub fn realized_interval_ns(&self) -> Option<f64> {
        self.realized_interval_ns
    }

    /// Raise the timebase to the fastest one the enabled channels allow.
    pub fn fix_timebase(&mut self) {
        let fixed = self.policy.fix_timebase_floor(self.timebase, &self.channels);
        if fixed != self.timebase {
            log::info!(
                "Timebase {} is too fast for {} enabled channels, using {fixed}",
                self.timebase,
                self.enabled_channel_count()
            );
            self.timebase = fixed;
            self.realized_interval_ns = None;
        }
    }

    pub fn apply_timebase_to_device(&mut self) -> Result<f64, MeasurementError> {
        let interval_ns = self
            .device
            .get_timebase(self.timebase, self.trace_length)
            .map_err(|status| {
                log::error!(
                    "Unable to set the requested timebase ({}) and sample number ({}): {status}",
                    self.timebase,
                    self.trace_length
                );
                MeasurementError::DeviceRejectedConfiguration {
                    code: self.timebase,
                    trace_length: self.trace_length,
                    status,
                }
            })?;

        log::debug!(
            "Timebase {} realized as {interval_ns} ns per sample",
            self.timebase
        );
        self.realized_interval_ns = Some(interval_ns);
        Ok(interval_ns)
    }

    // ---- trigger ----

    pub fn trigger(&self) -> Option<&Trigger> {
        self.trigger.as_ref()
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.is_some()
    }

    pub fn set_trigger(&mut self, trigger: Trigger) -> Result<(), MeasurementError> {
        trigger.validate(self.channels.len())?;
        log::debug!("Trigger: {trigger}");
        self.trigger = Some(trigger);
        self.invalidate_run();
        Ok(())
    }

    pub fn clear_trigger(&mut self) {
        if self.trigger.take().is_some() {
            self.invalidate_run();
        }
    }

    pub fn pre_trigger_length(&self) -> Result<u64, MeasurementError> {
        match &self.trigger {
            Some(trigger) => trigger.position.pre_trigger_samples(self.trace_length),
            None => Ok(0),
        }
    }

    pub fn post_trigger_length(&self) -> Result<u64, MeasurementError> {
        Ok(self.trace_length - self.pre_trigger_length()?)
    }

    // ---- signal generator ----

    pub fn add_signal_generator_square(&mut self, peak_to_peak_uv: u32, frequency_hz: f64) {
        self.signal_generator = Some(SignalGenerator {
            peak_to_peak_uv,
            frequency_hz,
        });
    }

    pub fn signal_generator(&self) -> Option<&SignalGenerator> {
        self.signal_generator.as_ref()
    }

    /// Push the requested square wave to the device; nothing to do when no
    /// generator was added.
    pub fn initialize_signal_generator(&mut self) -> Result<(), MeasurementError> {
        let Some(generator) = self.signal_generator else {
            log::debug!("No signal generator requested");
            return Ok(());
        };

        let family = self.policy.family();
        let range = self
            .policy
            .square_wave_range()
            .ok_or(MeasurementError::Unsupported {
                feature: "Built-in signal generator",
                family,
            })?;
        if !range.contains(&generator.frequency_hz) {
            log::error!(
                "Frequency of signal generator ({} Hz) is not valid",
                generator.frequency_hz
            );
            return Err(MeasurementError::InvalidSignalFrequency {
                frequency_hz: generator.frequency_hz,
            });
        }

        self.device
            .set_square_wave(&generator)
            .during(DeviceCall::SetSigGen)?;
        log::info!(
            "Signal generator: square wave, {} uV peak to peak at {} Hz",
            generator.peak_to_peak_uv,
            generator.frequency_hz
        );
        Ok(())
    }

    // ---- memory ----

    pub fn plan(&self) -> Option<&MemoryPlan> {
        self.plan.as_ref()
    }

    /// Recompute the fetch page sizes for a host memory budget in bytes.
    pub fn set_max_memory_consumption(&mut self, byte_budget: u64) -> MemoryPlan {
        let plan = MemoryPlan::new(
            byte_budget,
            self.enabled_channel_count(),
            self.trace_length,
            self.trace_count,
        );
        log::debug!(
            "Memory budget {byte_budget} B: {} samples or {} traces per page",
            plan.max_samples_per_page,
            plan.max_traces_per_page
        );
        self.plan = Some(plan);
        plan
    }

    /// Size the host buffers of every enabled channel for block fetching.
    pub fn allocate(&mut self, byte_budget: u64) -> Result<(), MeasurementError> {
        self.allocate_for(byte_budget, AcquisitionMode::Block)
    }

    /// Size the host buffers of every enabled channel for a page of whole
    /// traces.
    pub fn allocate_for_rapid_block(&mut self, byte_budget: u64) -> Result<(), MeasurementError> {
        self.allocate_for(byte_budget, AcquisitionMode::RapidBlock)
    }

    fn allocate_for(
        &mut self,
        byte_budget: u64,
        mode: AcquisitionMode,
    ) -> Result<(), MeasurementError> {
        let enabled = enabled_ids(&self.channels);
        if enabled.is_empty() {
            log::error!("Cannot allocate memory: no channels are enabled");
            return Err(MeasurementError::NoEnabledChannels);
        }

        let plan = self.set_max_memory_consumption(byte_budget);
        let page_len = match mode {
            AcquisitionMode::Block => plan.block_page_len(),
            AcquisitionMode::RapidBlock => plan.rapid_block_page_len(self.trace_length),
        };
        if page_len == 0 {
            log::error!("Memory budget of {byte_budget} B is too small for a single page");
            return Err(MeasurementError::BudgetTooSmall { byte_budget });
        }

        for id in enabled {
            match self.buffers[id.index()].ensure_len(page_len) {
                Ok(BufferChange::Allocated) => log::debug!(
                    "Allocated {} samples for channel {id}",
                    format_sample_count(page_len)
                ),
                Ok(BufferChange::Unchanged) => {
                    log::warn!("Memory for channel {id} is already allocated");
                }
                Ok(BufferChange::Resized { from }) => log::warn!(
                    "Memory for channel {id} resized from {} to {} samples",
                    format_sample_count(from),
                    format_sample_count(page_len)
                ),
                Err(source) => {
                    log::error!(
                        "Unable to allocate {} samples for channel {id}: {source}",
                        format_sample_count(page_len)
                    );
                    return Err(MeasurementError::AllocationFailed {
                        channel: id,
                        samples: page_len,
                        source,
                    });
                }
            }
        }

        if self.state == SessionState::Idle {
            self.state = SessionState::Configured;
        }
        Ok(())
    }

    // ---- run ----

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_run_mode(&self) -> Option<AcquisitionMode> {
        self.last_run_mode
    }

    pub fn set_ready_wait(&mut self, wait: ReadyWait) {
        self.wait = wait;
    }

    pub fn ready_wait(&self) -> &ReadyWait {
        &self.wait
    }

    /// Configure the device, start an acquisition and block until it is done.
    #[tracing::instrument(skip(self), fields(trace_length = self.trace_length, trace_count = self.trace_count))]
    pub fn run(&mut self) -> Result<(), MeasurementError> {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("Measurement::run"), 0));

        let started = Instant::now();
        self.reset_cursor();
        self.last_run_mode = None;

        match self.start_and_wait() {
            Ok(mode) => {
                self.reset_cursor();
                self.state = SessionState::Ready;
                self.last_run_mode = Some(mode);
                log::info!(
                    "{} acquisition of {} x {} samples took {:?}",
                    mode,
                    self.trace_count,
                    self.trace_length,
                    started.elapsed()
                );
                Ok(())
            }
            Err(err) => {
                self.state = if self.buffers.iter().any(ChannelBuffer::is_allocated) {
                    SessionState::Configured
                } else {
                    SessionState::Idle
                };
                Err(err)
            }
        }
    }

    fn start_and_wait(&mut self) -> Result<AcquisitionMode, MeasurementError> {
        let pre_trigger_samples = self.pre_trigger_length()?;
        let post_trigger_samples = self.trace_length - pre_trigger_samples;

        for channel in &self.channels {
            self.device
                .set_channel(channel.id(), channel.is_enabled(), channel.config())
                .during(DeviceCall::SetChannel)?;
        }

        self.fix_timebase();
        self.apply_timebase_to_device()?;

        if let Some(trigger) = &self.trigger {
            self.device
                .set_simple_trigger(trigger)
                .during(DeviceCall::SetTrigger)?;
        }

        let mode = self.acquisition_mode();
        if mode == AcquisitionMode::RapidBlock {
            self.prepare_segments()?;
        }

        self.device
            .run_block(&BlockRun {
                pre_trigger_samples,
                post_trigger_samples,
                timebase: self.timebase,
                segment_index: 0,
            })
            .during(DeviceCall::RunBlock)?;
        self.state = SessionState::Running;

        self.wait_until_ready()?;
        Ok(mode)
    }

    fn prepare_segments(&mut self) -> Result<(), MeasurementError> {
        let segments = self.trace_count;
        self.device
            .set_capture_count(segments)
            .during(DeviceCall::SetNoOfCaptures)?;

        let max_samples = self
            .device
            .allocate_segments(segments)
            .during(DeviceCall::MemorySegments)?;
        if max_samples < self.trace_length {
            log::error!(
                "The maximum length of trace you can get with {segments} traces is {max_samples}, but you requested {}",
                self.trace_length
            );
            return Err(MeasurementError::TraceTooLongForSegments {
                segments,
                max_samples,
                requested: self.trace_length,
            });
        }

        // segmenting resets the capture count on some drivers
        self.device
            .set_capture_count(segments)
            .during(DeviceCall::SetNoOfCaptures)
    }

    fn wait_until_ready(&mut self) -> Result<(), MeasurementError> {
        let started = Instant::now();
        loop {
            if self.device.is_ready().during(DeviceCall::IsReady)? {
                log::debug!("Device ready after {:?}", started.elapsed());
                return Ok(());
            }

            if self
                .wait
                .cancel
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
            {
                log::warn!("Acquisition cancelled after {:?}", started.elapsed());
                self.stop_device();
                return Err(MeasurementError::Cancelled);
            }

            if let Some(timeout) = self.wait.timeout {
                if started.elapsed() >= timeout {
                    log::warn!("Device was not ready within {timeout:?}");
                    self.stop_device();
                    return Err(MeasurementError::WaitTimedOut(timeout));
                }
            }

            std::thread::sleep(self.wait.poll_interval);
        }
    }

    fn stop_device(&mut self) {
        if let Err(status) = self.device.stop() {
            log::error!("{} failed: {status}", DeviceCall::Stop);
        }
    }

    fn reset_cursor(&mut self) {
        self.next_index = 0;
        self.length_fetched = 0;
        self.page_first_trace = 0;
        self.traces_in_page = 0;
        self.samples_per_trace = 0;
        self.rate_per_second = 0.0;
    }

    fn configuration_changed(&mut self) {
        if let Some(plan) = self.plan {
            self.set_max_memory_consumption(plan.byte_budget);
        }
        self.invalidate_run();
    }

    fn invalidate_run(&mut self) {
        if self.state == SessionState::Ready {
            log::debug!("Configuration changed, previous acquisition can no longer be fetched");
            self.state = SessionState::Configured;
            self.last_run_mode = None;
        }
    }

    fn ensure_ready(&self, expected: AcquisitionMode) -> Result<(), MeasurementError> {
        match (self.state, self.last_run_mode) {
            (SessionState::Ready, Some(actual)) if actual == expected => Ok(()),
            (SessionState::Ready, Some(actual)) => {
                Err(MeasurementError::WrongAcquisitionMode { expected, actual })
            }
            _ => Err(MeasurementError::NotReady),
        }
    }

    /// The current plan, once every enabled buffer holds at least
    /// `needed(plan)` samples.
    fn fetch_preconditions(
        &self,
        needed: impl Fn(&MemoryPlan) -> usize,
    ) -> Result<MemoryPlan, MeasurementError> {
        let enabled = enabled_ids(&self.channels);
        let Some(&first) = enabled.first() else {
            return Err(MeasurementError::NoEnabledChannels);
        };
        let plan = self
            .plan
            .ok_or(MeasurementError::BuffersNotAllocated(first))?;

        let needed = needed(&plan);
        for &id in &enabled {
            let buffer = &self.buffers[id.index()];
            if !buffer.is_allocated() || buffer.len() < needed {
                log::error!("Memory for channel {id} is not allocated");
                return Err(MeasurementError::BuffersNotAllocated(id));
            }
        }

        Ok(plan)
    }

    // ---- fetch ----

    pub fn is_exhausted(&self) -> bool {
        match self.last_run_mode {
            Some(AcquisitionMode::Block) => self.next_index >= self.trace_length,
            Some(AcquisitionMode::RapidBlock) => self.next_index >= u64::from(self.trace_count),
            None => true,
        }
    }

    /// Next unread sample (block) or trace (rapid block).
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn length_fetched(&self) -> usize {
        self.length_fetched
    }

    /// Fetch the next page of a block acquisition; returns the number of
    /// samples per channel delivered, 0 once the trace is exhausted.
    pub fn fetch_next_block(&mut self) -> Result<u64, MeasurementError> {
        Ok(self.fetch_next_block_report()?.fetched)
    }

    #[tracing::instrument(skip(self), fields(next_index = self.next_index))]
    pub fn fetch_next_block_report(&mut self) -> Result<FetchReport, MeasurementError> {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running().map(|client| {
            client.span(tracy_client::span_location!("Measurement::fetch_next_block"), 0)
        });

        self.ensure_ready(AcquisitionMode::Block)?;

        if self.next_index >= self.trace_length {
            log::debug!("All {} samples were already fetched", self.trace_length);
            return Ok(FetchReport::default());
        }

        let remaining = self.trace_length - self.next_index;
        let plan = self.fetch_preconditions(|plan| {
            plan.max_samples_per_page.min(remaining) as usize
        })?;
        let asked = plan.max_samples_per_page.min(remaining);
        if asked == 0 {
            log::error!(
                "Memory budget of {} B leaves no room for a single sample",
                plan.byte_budget
            );
            return Err(MeasurementError::BudgetTooSmall {
                byte_budget: plan.byte_budget,
            });
        }

        let mut sinks: Vec<SampleSink<'_>> = self
            .buffers
            .iter_mut()
            .zip(&self.channels)
            .filter(|(_, channel)| channel.is_enabled())
            .map(|(buffer, channel)| {
                let samples = buffer.as_mut_slice();
                SampleSink {
                    binding: BufferBinding {
                        channel: channel.id(),
                        length: samples.len(),
                        segment: None,
                    },
                    samples,
                }
            })
            .collect();

        for sink in &sinks {
            self.device
                .bind_buffer(&sink.binding)
                .during(DeviceCall::SetDataBuffer)?;
        }

        let read = self
            .device
            .get_values(self.next_index, asked, &mut sinks)
            .during(DeviceCall::GetValues)?;
        drop(sinks);

        let fetched = read.samples.min(asked);
        let mut warnings =
            DataQualityWarning::from_overflow_mask(read.overflow, self.channels.len(), None);
        if fetched < asked {
            warnings.push(DataQualityWarning::ShortRead {
                requested: asked,
                fetched,
            });
        }
        for warning in &warnings {
            log::warn!("{warning}");
        }

        log::debug!(
            "Fetched samples {}..{} of {}",
            self.next_index,
            self.next_index + fetched,
            self.trace_length
        );
        self.next_index += fetched;
        self.length_fetched = fetched as usize;
        self.samples_per_trace = fetched;

        Ok(FetchReport { fetched, warnings })
    }

    /// Fetch the next page of a rapid block acquisition; returns the number
    /// of traces delivered, 0 once all traces were fetched.
    pub fn fetch_next_rapid_block(&mut self) -> Result<u64, MeasurementError> {
        Ok(self.fetch_next_rapid_block_report()?.fetched)
    }

    #[tracing::instrument(skip(self), fields(next_index = self.next_index))]
    pub fn fetch_next_rapid_block_report(&mut self) -> Result<FetchReport, MeasurementError> {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running().map(|client| {
            client.span(
                tracy_client::span_location!("Measurement::fetch_next_rapid_block"),
                0,
            )
        });

        self.ensure_ready(AcquisitionMode::RapidBlock)?;

        let trace_count = u64::from(self.trace_count);
        if self.next_index >= trace_count {
            log::debug!("All {trace_count} traces were already fetched");
            return Ok(FetchReport::default());
        }

        let remaining = trace_count - self.next_index;
        let trace_len = self.trace_length as usize;
        let plan = self.fetch_preconditions(|plan| {
            u64::from(plan.max_traces_per_page).min(remaining) as usize * trace_len
        })?;
        let asked = u64::from(plan.max_traces_per_page).min(remaining);
        if asked == 0 {
            return Err(MeasurementError::BudgetTooSmall {
                byte_budget: plan.byte_budget,
            });
        }

        let first_segment = self.next_index as u32;
        let last_segment = first_segment + asked as u32 - 1;
        let page_len = asked as usize * trace_len;

        let mut sinks: Vec<SampleSink<'_>> = Vec::new();
        for (buffer, channel) in self
            .buffers
            .iter_mut()
            .zip(&self.channels)
            .filter(|(_, channel)| channel.is_enabled())
        {
            let page = &mut buffer.as_mut_slice()[..page_len];
            page.fill(0);
            for (offset, samples) in page.chunks_mut(trace_len).enumerate() {
                sinks.push(SampleSink {
                    binding: BufferBinding {
                        channel: channel.id(),
                        length: trace_len,
                        segment: Some(first_segment + offset as u32),
                    },
                    samples,
                });
            }
        }

        for sink in &sinks {
            self.device
                .bind_buffer(&sink.binding)
                .during(DeviceCall::SetDataBuffer)?;
        }

        let read = self
            .device
            .get_values_bulk(first_segment, last_segment, self.trace_length, &mut sinks)
            .during(DeviceCall::GetValuesBulk)?;
        drop(sinks);

        let mut warnings = Vec::new();
        for (offset, &mask) in read.overflow.iter().take(asked as usize).enumerate() {
            warnings.extend(DataQualityWarning::from_overflow_mask(
                mask,
                self.channels.len(),
                Some(self.next_index + offset as u64),
            ));
        }
        let per_trace = read.samples_per_segment.min(self.trace_length);
        if per_trace < self.trace_length {
            warnings.push(DataQualityWarning::ShortRead {
                requested: self.trace_length,
                fetched: per_trace,
            });
        }

        let timestamps = self
            .device
            .get_trigger_timestamps(first_segment, last_segment)
            .during(DeviceCall::GetTriggerTimeOffsets)?;
        self.rate_per_second = match (timestamps.first(), timestamps.last()) {
            (Some(&first), Some(&last)) => estimate_rate(asked, first, last),
            _ => {
                log::debug!("No trigger timestamps available, rate unknown");
                0.0
            }
        };

        for warning in &warnings {
            log::warn!("{warning}");
        }
        log::debug!(
            "Fetched traces {}..{} of {trace_count}, {:.1} triggers/s",
            self.next_index,
            self.next_index + asked,
            self.rate_per_second
        );

        self.page_first_trace = self.next_index;
        self.traces_in_page = asked as u32;
        self.samples_per_trace = per_trace;
        self.next_index += asked;
        self.length_fetched = (asked * per_trace) as usize;

        Ok(FetchReport {
            fetched: asked,
            warnings,
        })
    }

    // ---- results ----

    /// Samples of the last fetched page, `[0, length_fetched)` of the buffer.
    pub fn channel_data(&self, index: usize) -> Result<&[i16], MeasurementError> {
        let id = self.channel_id(index)?;
        if !self.channels[id.index()].is_enabled() {
            return Err(MeasurementError::ChannelNotEnabled(id));
        }
        let buffer = &self.buffers[id.index()];
        if !buffer.is_allocated() {
            return Err(MeasurementError::BuffersNotAllocated(id));
        }
        let len = self.length_fetched.min(buffer.len());
        Ok(&buffer.as_slice()[..len])
    }

    /// Trace `trace` of the last rapid block page on channel `index`.
    pub fn trace(&self, index: usize, trace: usize) -> Option<&[i16]> {
        if trace >= self.traces_in_page as usize {
            return None;
        }
        let channel = self.channels.get(index)?;
        if !channel.is_enabled() {
            return None;
        }
        let start = trace * self.trace_length as usize;
        let end = start + self.samples_per_trace as usize;
        self.buffers.get(index)?.as_slice().get(start..end)
    }

    /// Index of the first trace held in the last rapid block page.
    pub fn page_first_trace(&self) -> u64 {
        self.page_first_trace
    }

    pub fn traces_in_page(&self) -> u32 {
        self.traces_in_page
    }

    /// Samples per trace delivered by the last page.
    pub fn samples_per_trace(&self) -> u64 {
        self.samples_per_trace
    }

    /// Trigger rate of the last rapid block page in events per second.
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceStatus;
    use crate::rate::TimeUnit;
    use crate::simulator::SimulatedDevice;
    use crate::timebase::DeviceFamily;
    use crate::trigger::TriggerPosition;

    fn fast_wait() -> ReadyWait {
        ReadyWait::default().with_poll_interval(Duration::from_millis(1))
    }

    fn session(device: SimulatedDevice, trace_length: u64, trace_count: u32) -> Measurement<SimulatedDevice> {
        Measurement::with_config(
            device,
            AcquisitionConfig {
                trace_length,
                trace_count,
                wait: fast_wait(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_block_paging_until_exhausted() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 2_500, 1);
        m.enable_channels(&[true, false, true]).unwrap();
        // 1000 samples per channel per page
        m.allocate(4_000).unwrap();
        assert_eq!(m.state(), SessionState::Configured);

        m.run().unwrap();
        assert_eq!(m.state(), SessionState::Ready);

        assert_eq!(m.fetch_next_block().unwrap(), 1_000);
        assert_eq!(m.fetch_next_block().unwrap(), 1_000);
        assert_eq!(m.fetch_next_block().unwrap(), 500);
        assert_eq!(m.length_fetched(), 500);
        assert!(m.is_exhausted());

        let calls = m.device().calls().len();
        for _ in 0..3 {
            assert_eq!(m.fetch_next_block().unwrap(), 0);
        }
        assert_eq!(m.device().calls().len(), calls);
        assert_eq!(m.next_index(), 2_500);
    }

    #[test]
    fn test_block_data_matches_device() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps4000), 300, 1);
        m.enable_channel(1).unwrap();
        m.allocate(400).unwrap();
        m.run().unwrap();

        m.fetch_next_block().unwrap();
        m.fetch_next_block().unwrap();
        let data = m.channel_data(1).unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(data[0], m.device().sample_at(ChannelId::B, 0, 200));
        assert!(matches!(
            m.channel_data(0),
            Err(MeasurementError::ChannelNotEnabled(ChannelId::A))
        ));
    }

    #[test]
    fn test_zero_enabled_channels() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        assert!(matches!(
            m.allocate(1_000),
            Err(MeasurementError::NoEnabledChannels)
        ));
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.fetch_next_block().is_err());
    }

    #[test]
    fn test_fetch_without_buffers() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.enable_channel(0).unwrap();
        m.run().unwrap();
        assert!(matches!(
            m.fetch_next_block(),
            Err(MeasurementError::BuffersNotAllocated(ChannelId::A))
        ));
    }

    #[test]
    fn test_fetch_before_run() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.enable_channel(0).unwrap();
        m.allocate(1_000).unwrap();
        assert!(matches!(m.fetch_next_block(), Err(MeasurementError::NotReady)));
    }

    #[test]
    fn test_wrong_fetch_mode() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 4);
        m.enable_channel(0).unwrap();
        m.allocate_for_rapid_block(10_000).unwrap();
        m.run().unwrap();
        assert!(matches!(
            m.fetch_next_block(),
            Err(MeasurementError::WrongAcquisitionMode {
                expected: AcquisitionMode::Block,
                actual: AcquisitionMode::RapidBlock
            })
        ));
    }

    #[test]
    fn test_budget_too_small() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 10);
        m.enable_channels(&[true, true]).unwrap();
        assert!(matches!(
            m.allocate_for_rapid_block(300),
            Err(MeasurementError::BudgetTooSmall { byte_budget: 300 })
        ));
        assert!(matches!(
            m.allocate(3),
            Err(MeasurementError::BudgetTooSmall { byte_budget: 3 })
        ));
    }

    #[test]
    fn test_zero_sample_page_is_an_error() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.enable_channels(&[true, true]).unwrap();
        m.allocate(4).unwrap();
        m.set_max_memory_consumption(3);
        m.run().unwrap();

        assert!(matches!(
            m.fetch_next_block(),
            Err(MeasurementError::BudgetTooSmall { byte_budget: 3 })
        ));
        assert_eq!(m.next_index(), 0);
        assert!(!m.is_exhausted());
        assert_eq!(m.device().call_count(DeviceCall::GetValues), 0);

        m.set_max_memory_consumption(4);
        assert_eq!(m.fetch_next_block().unwrap(), 1);
    }

    #[test]
    fn test_failed_allocation_keeps_other_channels() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.enable_channels(&[true, true]).unwrap();
        m.allocate(8).unwrap();
        assert_eq!(m.buffers[1].len(), 2);

        let err = m.allocate(u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            MeasurementError::AllocationFailed {
                channel: ChannelId::A,
                ..
            }
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::Resource);
        assert!(m.buffers[1].is_allocated());
        assert_eq!(m.buffers[1].len(), 2);
    }

    #[test]
    fn test_reallocation() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 1_000, 1);
        m.enable_channel(0).unwrap();
        m.allocate(400).unwrap();
        m.allocate(400).unwrap();
        m.allocate(800).unwrap();
        m.run().unwrap();
        assert_eq!(m.fetch_next_block().unwrap(), 400);
    }

    #[test]
    fn test_rapid_block_pages() {
        let device = SimulatedDevice::new(DeviceFamily::Ps6000)
            .with_segment_overflow(3, 0b0001)
            .with_timestamps(100, TimeUnit::Nanoseconds);
        let mut m = session(device, 100, 5);
        m.enable_channels(&[true, true]).unwrap();
        // one trace is 400 bytes, so two traces per page
        m.allocate_for_rapid_block(1_000).unwrap();
        m.run().unwrap();
        assert_eq!(m.last_run_mode(), Some(AcquisitionMode::RapidBlock));
        assert_eq!(m.device().captures(), 5);
        assert_eq!(m.device().segments(), 5);

        let first = m.fetch_next_rapid_block_report().unwrap();
        assert_eq!(first.fetched, 2);
        assert!(first.is_clean());
        assert_eq!(m.length_fetched(), 200);
        assert!((m.rate_per_second() - 1e7).abs() < 1e-3);
        assert_eq!(
            m.trace(1, 1).unwrap()[0],
            m.device().sample_at(ChannelId::B, 1, 0)
        );

        let second = m.fetch_next_rapid_block_report().unwrap();
        assert_eq!(second.fetched, 2);
        assert_eq!(m.page_first_trace(), 2);
        assert_eq!(
            second.warnings,
            vec![DataQualityWarning::Overflow {
                channel: ChannelId::A,
                trace: Some(3)
            }]
        );

        assert_eq!(m.fetch_next_rapid_block().unwrap(), 1);
        assert_eq!(m.traces_in_page(), 1);
        assert_eq!(m.rate_per_second(), 0.0);
        assert_eq!(m.fetch_next_rapid_block().unwrap(), 0);
        assert!(m.is_exhausted());
    }

    #[test]
    fn test_rapid_block_segment_bindings() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 50, 3);
        m.enable_channels(&[false, true]).unwrap();
        m.allocate_for_rapid_block(1_000_000).unwrap();
        m.run().unwrap();
        m.fetch_next_rapid_block().unwrap();

        let segments: Vec<Option<u32>> = m
            .device()
            .bindings()
            .iter()
            .map(|binding| binding.segment)
            .collect();
        assert_eq!(segments, vec![Some(0), Some(1), Some(2)]);
        assert!(m
            .device()
            .bindings()
            .iter()
            .all(|binding| binding.channel == ChannelId::B && binding.length == 50));
    }

    #[test]
    fn test_ps4000_rapid_block_has_no_rate() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps4000), 10, 3);
        m.enable_channel(0).unwrap();
        m.allocate_for_rapid_block(1_000).unwrap();
        m.run().unwrap();
        assert_eq!(m.fetch_next_rapid_block().unwrap(), 3);
        assert_eq!(m.rate_per_second(), 0.0);
    }

    #[test]
    fn test_trace_too_long_for_segments() {
        let device = SimulatedDevice::new(DeviceFamily::Ps6000).with_memory_samples(1_000);
        let mut m = session(device, 300, 4);
        m.enable_channel(0).unwrap();
        m.allocate_for_rapid_block(100_000).unwrap();
        assert!(matches!(
            m.run(),
            Err(MeasurementError::TraceTooLongForSegments {
                segments: 4,
                max_samples: 250,
                requested: 300
            })
        ));
        assert_eq!(m.state(), SessionState::Configured);
    }

    #[test]
    fn test_device_failure_carries_status() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.enable_channel(0).unwrap();
        m.allocate(1_000).unwrap();
        m.device_mut()
            .fail_next(DeviceCall::RunBlock, DeviceStatus::NOT_RESPONDING);

        let err = m.run().unwrap_err();
        assert_eq!(err.device_status(), Some(DeviceStatus::NOT_RESPONDING));
        assert!(matches!(
            err,
            MeasurementError::DeviceCommandFailed {
                call: DeviceCall::RunBlock,
                ..
            }
        ));
        assert_eq!(m.state(), SessionState::Configured);
        assert!(matches!(m.fetch_next_block(), Err(MeasurementError::NotReady)));
    }

    #[test]
    fn test_rejected_timebase() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps4000), 100, 1);
        m.enable_channel(0).unwrap();
        m.device_mut()
            .fail_next(DeviceCall::GetTimebase, DeviceStatus::INVALID_TIMEBASE);
        assert!(matches!(
            m.run(),
            Err(MeasurementError::DeviceRejectedConfiguration {
                status: DeviceStatus::INVALID_TIMEBASE,
                trace_length: 100,
                ..
            })
        ));
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_wait_timeout_stops_device() {
        let device = SimulatedDevice::new(DeviceFamily::Ps6000).never_ready();
        let mut m = session(device, 100, 1);
        m.enable_channel(0).unwrap();
        m.set_ready_wait(fast_wait().with_timeout(Duration::from_millis(10)));

        assert!(matches!(m.run(), Err(MeasurementError::WaitTimedOut(_))));
        assert_eq!(m.device().call_count(DeviceCall::Stop), 1);
        assert!(!m.device().is_running());
    }

    #[test]
    fn test_cancelled_wait() {
        let device = SimulatedDevice::new(DeviceFamily::Ps6000).never_ready();
        let mut m = session(device, 100, 1);
        m.enable_channel(0).unwrap();
        let token = CancelToken::new();
        m.set_ready_wait(fast_wait().with_cancel_token(token.clone()));

        token.cancel();
        assert!(matches!(m.run(), Err(MeasurementError::Cancelled)));
        assert_eq!(m.device().call_count(DeviceCall::Stop), 1);
    }

    #[test]
    fn test_trigger_split() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 1_000, 1);
        assert_eq!(m.pre_trigger_length().unwrap(), 0);
        assert_eq!(m.post_trigger_length().unwrap(), 1_000);

        m.set_trigger(Trigger::on_channel(ChannelId::A).rising_edge(0.1).at_fraction(0.25))
            .unwrap();
        assert_eq!(m.pre_trigger_length().unwrap(), 250);
        assert_eq!(m.post_trigger_length().unwrap(), 750);

        m.set_trigger(Trigger::on_channel(ChannelId::A).rising_edge(0.1).at_sample(300))
            .unwrap();
        assert_eq!(m.pre_trigger_length().unwrap(), 300);

        m.clear_trigger();
        assert!(!m.is_triggered());
        assert_eq!(m.pre_trigger_length().unwrap(), 0);
    }

    #[test]
    fn test_trigger_pushed_on_run() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 1_000, 1);
        m.enable_channel(2).unwrap();
        m.set_trigger(Trigger::on_channel(ChannelId::C).falling_edge(-0.5).at_fraction(0.1))
            .unwrap();
        m.run().unwrap();

        let run = m.device().last_run().unwrap();
        assert_eq!(run.pre_trigger_samples, 100);
        assert_eq!(run.post_trigger_samples, 900);
        assert_eq!(m.device().trigger().unwrap().source, ChannelId::C);
    }

    #[test]
    fn test_invalid_trigger_position_aborts_run() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.set_trigger(Trigger::new(
            ChannelId::A,
            TriggerPosition::Samples(101),
            0.0,
            crate::trigger::TriggerDirection::Rising,
        ))
        .unwrap();
        assert!(matches!(
            m.run(),
            Err(MeasurementError::InvalidTriggerPosition { .. })
        ));
        assert!(m.device().calls().is_empty());
    }

    #[test]
    fn test_invalid_channel_index() {
        let device = SimulatedDevice::new(DeviceFamily::Ps4000).with_channel_count(2);
        let mut m = session(device, 100, 1);
        assert!(matches!(
            m.enable_channel(2),
            Err(MeasurementError::InvalidChannel { index: 2, count: 2 })
        ));
        assert!(matches!(
            m.enable_channels(&[true, true, true]),
            Err(MeasurementError::InvalidChannel { index: 2, count: 2 })
        ));
        assert!(m
            .set_trigger(Trigger::on_channel(ChannelId::C).at_fraction(0.5))
            .is_err());
    }

    #[test]
    fn test_run_fixes_timebase() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.enable_channels(&[true, true]).unwrap();
        m.set_timebase_ps(200);
        assert_eq!(m.timebase(), TimebaseCode::new(0));
        m.run().unwrap();
        assert_eq!(m.timebase(), TimebaseCode::new(2));
        assert_eq!(m.realized_interval_ns(), Some(0.8));
    }

    #[test]
    fn test_timebase_ns() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps4000), 100, 1);
        m.set_timebase_ns(100);
        assert_eq!(m.timebase(), TimebaseCode::new(3));
        assert_eq!(m.timebase_ns(), 100.0);
        m.set_timebase_ns(u64::MAX);
        assert_eq!(m.timebase(), m.policy().to_code(u64::MAX));
    }

    #[test]
    fn test_reconfiguration_invalidates_run() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.enable_channel(0).unwrap();
        m.allocate(1_000).unwrap();
        m.run().unwrap();
        let pages = m.plan().unwrap().max_samples_per_page;

        m.enable_channel(1).unwrap();
        assert_eq!(m.state(), SessionState::Configured);
        assert_eq!(m.plan().unwrap().max_samples_per_page, pages / 2);
        assert!(matches!(m.fetch_next_block(), Err(MeasurementError::NotReady)));
    }

    #[test]
    fn test_rejects_zero_geometry() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        assert!(matches!(
            m.set_trace_length(0),
            Err(MeasurementError::InvalidTraceLength)
        ));
        assert!(matches!(
            m.set_trace_count(0),
            Err(MeasurementError::InvalidTraceCount)
        ));
        assert!(Measurement::with_config(
            SimulatedDevice::new(DeviceFamily::Ps6000),
            AcquisitionConfig {
                trace_count: 0,
                ..AcquisitionConfig::default()
            }
        )
        .is_err());
    }

    #[test]
    fn test_overflow_and_short_read_warnings() {
        let device = SimulatedDevice::new(DeviceFamily::Ps6000)
            .with_block_overflow(0b0010)
            .with_read_limit(60);
        let mut m = session(device, 100, 1);
        m.enable_channels(&[true, true]).unwrap();
        m.allocate(1_000).unwrap();
        m.run().unwrap();

        let report = m.fetch_next_block_report().unwrap();
        assert_eq!(report.fetched, 60);
        assert_eq!(
            report.warnings,
            vec![
                DataQualityWarning::Overflow {
                    channel: ChannelId::B,
                    trace: None
                },
                DataQualityWarning::ShortRead {
                    requested: 100,
                    fetched: 60
                },
            ]
        );
        assert_eq!(m.fetch_next_block().unwrap(), 40);
    }

    #[test]
    fn test_signal_generator() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.initialize_signal_generator().unwrap();
        assert!(m.device().calls().is_empty());

        m.add_signal_generator_square(500_000, 1_000.0);
        m.initialize_signal_generator().unwrap();
        assert_eq!(
            m.device().signal_generator().map(|g| g.frequency_hz),
            Some(1_000.0)
        );

        m.add_signal_generator_square(500_000, 30e6);
        assert!(matches!(
            m.initialize_signal_generator(),
            Err(MeasurementError::InvalidSignalFrequency { .. })
        ));

        let mut ps4000 = session(SimulatedDevice::new(DeviceFamily::Ps4000), 100, 1);
        ps4000.add_signal_generator_square(500_000, 1_000.0);
        assert!(matches!(
            ps4000.initialize_signal_generator(),
            Err(MeasurementError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_run_leaves_signal_generator_alone() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps4000), 100, 1);
        m.enable_channel(0).unwrap();
        m.add_signal_generator_square(500_000, 1_000.0);
        m.run().unwrap();

        assert_eq!(m.state(), SessionState::Ready);
        assert_eq!(m.device().call_count(DeviceCall::SetSigGen), 0);
        assert!(m.device().signal_generator().is_none());
    }

    #[test]
    fn test_channel_settings_pushed() {
        let mut m = session(SimulatedDevice::new(DeviceFamily::Ps6000), 100, 1);
        m.enable_channel(3).unwrap();
        let config = ChannelConfig {
            coupling: crate::channel::Coupling::Ac,
            range: crate::channel::VoltageRange::Mv200,
        };
        m.set_channel_config(3, config).unwrap();
        m.run().unwrap();

        assert_eq!(m.device().call_count(DeviceCall::SetChannel), 4);
        assert_eq!(m.device().channel_setting(ChannelId::D), Some((true, config)));
        assert_eq!(
            m.device().channel_setting(ChannelId::A).map(|(enabled, _)| enabled),
            Some(false)
        );
    }
}
