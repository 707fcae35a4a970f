//! Host memory budgeting and the per-channel sample buffers.

use std::collections::TryReserveError;

/// Bytes per raw sample as delivered by the driver.
pub const SAMPLE_WIDTH_BYTES: u64 = std::mem::size_of::<i16>() as u64;

/// How much can be fetched per page under a byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPlan {
    pub byte_budget: u64,
    pub max_samples_per_page: u64,
    pub max_traces_per_page: u32,
}

impl MemoryPlan {
    pub fn new(
        byte_budget: u64,
        enabled_channels: usize,
        trace_length: u64,
        trace_count: u32,
    ) -> Self {
        let channels = enabled_channels as u64;
        let max_samples_per_page = byte_budget / (SAMPLE_WIDTH_BYTES * channels.max(1));

        let max_traces_per_page = if trace_count > 1 {
            match SAMPLE_WIDTH_BYTES
                .checked_mul(channels)
                .and_then(|bytes| bytes.checked_mul(trace_length))
            {
                // a single trace larger than u64::MAX bytes never fits
                None => 0,
                Some(0) => trace_count,
                Some(single_trace_bytes) => {
                    match u64::from(trace_count).checked_mul(single_trace_bytes) {
                        Some(total) if total < byte_budget => trace_count,
                        _ => u32::try_from(byte_budget / single_trace_bytes)
                            .unwrap_or(trace_count),
                    }
                }
            }
        } else {
            1
        };

        Self {
            byte_budget,
            max_samples_per_page,
            max_traces_per_page,
        }
    }

    /// Samples per channel buffer for block mode.
    pub fn block_page_len(&self) -> usize {
        usize::try_from(self.max_samples_per_page).unwrap_or(usize::MAX)
    }

    /// Samples per channel buffer for rapid block mode: a page of whole traces.
    pub fn rapid_block_page_len(&self, trace_length: u64) -> usize {
        let samples = u64::from(self.max_traces_per_page).saturating_mul(trace_length);
        usize::try_from(samples).unwrap_or(usize::MAX)
    }
}

/// Outcome of sizing a [`ChannelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferChange {
    Allocated,
    Unchanged,
    Resized { from: usize },
}

/// Host-side samples of one channel.
///
/// Keeps the storage when asked for the length it already has.
#[derive(Debug, Default)]
pub struct ChannelBuffer {
    samples: Vec<i16>,
    allocated: bool,
}

impl ChannelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_len(&mut self, len: usize) -> Result<BufferChange, TryReserveError> {
        if self.allocated && self.samples.len() == len {
            return Ok(BufferChange::Unchanged);
        }

        let previous = self.allocated.then_some(self.samples.len());
        // release the old page first so only one page per channel is alive
        self.release();

        let mut samples = Vec::new();
        samples.try_reserve_exact(len)?;
        samples.resize(len, 0);
        self.samples = samples;
        self.allocated = true;

        Ok(match previous {
            Some(from) => BufferChange::Resized { from },
            None => BufferChange::Allocated,
        })
    }

    pub fn release(&mut self) {
        self.samples = Vec::new();
        self.allocated = false;
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [i16] {
        &mut self.samples
    }
}

/// Human readable sample count for log lines (`"1.5M"`).
pub fn format_sample_count(samples: usize) -> String {
    let value = samples as f64;
    if value < 1e3 {
        format!("{samples}")
    } else if value < 5e5 {
        format!("{}k", value / 1e3)
    } else if value < 5e8 {
        format!("{}M", value / 1e6)
    } else {
        format!("{}G", value / 1e9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_plan() {
        let plan = MemoryPlan::new(4_000, 2, 10_000, 1);
        assert_eq!(plan.max_samples_per_page, 1_000);
        assert_eq!(plan.max_traces_per_page, 1);
        assert_eq!(plan.block_page_len(), 1_000);
    }

    #[test]
    fn test_zero_channels_does_not_divide_by_zero() {
        let plan = MemoryPlan::new(4_000, 0, 100, 10);
        assert_eq!(plan.max_samples_per_page, 2_000);
        assert_eq!(plan.max_traces_per_page, 10);
    }

    #[test]
    fn test_rapid_block_fits_in_one_page() {
        // one trace is 100 samples * 2 channels * 2 bytes = 400 bytes
        let plan = MemoryPlan::new(5_000, 2, 100, 10);
        assert_eq!(plan.max_traces_per_page, 10);
        assert_eq!(plan.rapid_block_page_len(100), 1_000);
    }

    #[test]
    fn test_rapid_block_split_into_pages() {
        let plan = MemoryPlan::new(1_000, 2, 100, 10);
        assert_eq!(plan.max_traces_per_page, 2);

        let exact = MemoryPlan::new(4_000, 2, 100, 10);
        assert_eq!(exact.max_traces_per_page, 10);

        let too_small = MemoryPlan::new(300, 2, 100, 10);
        assert_eq!(too_small.max_traces_per_page, 0);
    }

    #[test]
    fn test_oversized_traces_do_not_overflow() {
        let huge_trace = MemoryPlan::new(1_000, 4, 1 << 40, 1 << 30);
        assert_eq!(huge_trace.max_traces_per_page, 0);
        assert_eq!(huge_trace.rapid_block_page_len(1 << 40), 0);

        let unrepresentable = MemoryPlan::new(u64::MAX, 4, u64::MAX, 2);
        assert_eq!(unrepresentable.max_traces_per_page, 0);

        // all traces together overflow, a single one does not
        let many = MemoryPlan::new(1 << 20, 1, 1 << 40, u32::MAX);
        assert_eq!(many.max_traces_per_page, 0);
        let fits = MemoryPlan::new(u64::MAX, 1, 1 << 40, u32::MAX);
        assert_eq!(fits.max_traces_per_page, 8_388_607);
    }

    #[test]
    fn test_rapid_block_page_len_saturates() {
        let plan = MemoryPlan::new(u64::MAX, 1, 1, 3);
        assert_eq!(plan.max_traces_per_page, 3);
        assert_eq!(plan.rapid_block_page_len(u64::MAX), usize::MAX);
    }

    #[test]
    fn test_samples_per_page_never_zero() {
        for channels in 1..=4 {
            for budget in SAMPLE_WIDTH_BYTES * channels as u64..2_000 {
                let plan = MemoryPlan::new(budget, channels, 1_000, 3);
                assert!(
                    plan.max_samples_per_page > 0,
                    "budget {budget} with {channels} channels"
                );
            }
        }
    }

    #[test]
    fn test_buffer_lifecycle() {
        let mut buffer = ChannelBuffer::new();
        assert!(!buffer.is_allocated());

        assert_eq!(buffer.ensure_len(16).unwrap(), BufferChange::Allocated);
        assert_eq!(buffer.len(), 16);
        buffer.as_mut_slice()[3] = 7;

        assert_eq!(buffer.ensure_len(16).unwrap(), BufferChange::Unchanged);
        assert_eq!(buffer.as_slice()[3], 7);

        assert_eq!(
            buffer.ensure_len(32).unwrap(),
            BufferChange::Resized { from: 16 }
        );
        assert_eq!(buffer.len(), 32);
        assert!(buffer.as_slice().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_buffer_allocation_failure() {
        let mut buffer = ChannelBuffer::new();
        assert!(buffer.ensure_len(usize::MAX).is_err());
        assert!(!buffer.is_allocated());
    }

    #[test]
    fn test_format_sample_count() {
        assert_eq!(format_sample_count(512), "512");
        assert_eq!(format_sample_count(2_000), "2k");
        assert_eq!(format_sample_count(1_500_000), "1.5M");
    }
}
