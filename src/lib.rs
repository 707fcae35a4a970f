//! # PicoScope RS
//!
//! Acquisition engine for PicoScope 4000 and 6000 series oscilloscopes.
//!
//! This library derives device timebases from requested sample intervals,
//! plans host memory for fetched samples under a byte budget, runs block and
//! rapid block acquisitions and fetches the results page by page, and
//! persists traces as raw dumps, text or `polars` frames.
//!
//! ## Features
//!
//! - **Device boundary**: the [`DeviceAccess`] trait wraps the vendor driver;
//!   [`SimulatedDevice`] implements it in memory
//! - **Family policies**: timebase tables, channel-pair limits, export width
//!   and signal generator range per device generation
//! - **Memory budgeting**: fetch pages sized so host buffers stay within a
//!   byte budget, buffers reused across runs
//! - **Paged fetch**: sample pages for block mode, trace pages with trigger
//!   rate for rapid block mode
//! - **Bounded waits**: ready polling with timeout and cancellation
//! - **DataFrame output**: uses `polars` for fetched pages
//!
//! ## Examples
//!
//! ### Block acquisition
//!
//! ```rust
//! use picoscope_rs::{DeviceFamily, Measurement, ReadyWait, SimulatedDevice, Trigger, ChannelId};
//! use std::time::Duration;
//!
//! let mut measurement = Measurement::new(SimulatedDevice::new(DeviceFamily::Ps6000));
//! measurement.set_ready_wait(ReadyWait::default().with_poll_interval(Duration::from_millis(1)));
//! measurement.enable_channels(&[true, false, true, false])?;
//! measurement.set_trace_length(10_000)?;
//! measurement.set_timebase_ns(1);
//! measurement.set_trigger(Trigger::on_channel(ChannelId::A).rising_edge(0.2).at_fraction(0.1))?;
//!
//! // at most 4000 bytes of samples on the host at a time
//! measurement.allocate(4_000)?;
//! measurement.run()?;
//!
//! let mut total = 0;
//! loop {
//!     let fetched = measurement.fetch_next_block()?;
//!     if fetched == 0 {
//!         break;
//!     }
//!     total += fetched;
//!     let page = measurement.channel_data(0)?;
//!     assert_eq!(page.len() as u64, fetched);
//! }
//! assert_eq!(total, 10_000);
//! # Ok::<(), picoscope_rs::MeasurementError>(())
//! ```
//!
//! ### Rapid block acquisition
//!
//! ```rust
//! use picoscope_rs::{AcquisitionConfig, DeviceFamily, Measurement, ReadyWait, SimulatedDevice};
//! use std::time::Duration;
//!
//! let config = AcquisitionConfig {
//!     trace_length: 500,
//!     trace_count: 100,
//!     wait: ReadyWait::default()
//!         .with_poll_interval(Duration::from_millis(1))
//!         .with_timeout(Duration::from_secs(5)),
//! };
//! let mut measurement =
//!     Measurement::with_config(SimulatedDevice::new(DeviceFamily::Ps6000), config)?;
//! measurement.enable_channel(0)?;
//! measurement.allocate_for_rapid_block(40_000)?;
//! measurement.run()?;
//!
//! while measurement.fetch_next_rapid_block()? > 0 {
//!     println!(
//!         "traces from {}: {:.0} triggers/s",
//!         measurement.page_first_trace(),
//!         measurement.rate_per_second()
//!     );
//! }
//! # Ok::<(), picoscope_rs::MeasurementError>(())
//! ```

pub mod channel;
pub mod device;
pub mod error;
pub mod export;
pub mod measurement;
pub mod memory;
pub mod rate;
pub mod simulator;
pub mod timebase;
pub mod trigger;

// Re-export the main types for convenience
pub use channel::{Channel, ChannelConfig, ChannelId, Coupling, VoltageRange, MAX_CHANNELS};

pub use device::{
    BlockRun, BufferBinding, BulkRead, DeviceAccess, DeviceCall, DeviceStatus, SampleSink,
    SignalGenerator, ValuesRead,
};

pub use error::{DataQualityWarning, ErrorKind, MeasurementError};

pub use measurement::{
    AcquisitionConfig, AcquisitionMode, CancelToken, FetchReport, Measurement, ReadyWait,
    SessionState,
};

pub use memory::{ChannelBuffer, MemoryPlan};

pub use rate::{estimate_rate, TimeUnit, TriggerTimestamp};

pub use simulator::SimulatedDevice;

pub use timebase::{DeviceFamily, FamilyPolicy, Ps4000Policy, Ps6000Policy, TimebaseCode};

pub use trigger::{Trigger, TriggerDirection, TriggerPosition};
