//! Persisting fetched samples.

use crate::channel::{enabled_ids, ChannelId};
use crate::device::DeviceAccess;
use crate::error::MeasurementError;
use crate::measurement::{AcquisitionMode, Measurement};
use polars::prelude::*;
use std::io::{BufWriter, Write};

/// Narrowed samples are written in chunks of this many bytes.
pub const BINARY_CHUNK_BYTES: usize = 1_000_000;

pub const TIME_COLUMN_NAME: &str = "time";
pub const TRACE_COLUMN_NAME: &str = "trace";

pub fn channel_column_name(channel: ChannelId) -> String {
    format!("channel_{}", channel.letter().to_ascii_lowercase())
}

fn narrow(sample: i16, shift: Option<u32>) -> i16 {
    match shift {
        Some(shift) => sample >> shift,
        None => sample,
    }
}

impl<D: DeviceAccess> Measurement<D> {
    /// Write the last fetched page of `channel` as raw bytes.
    ///
    /// Families that pad their samples get one byte per sample, the others
    /// little-endian 16-bit words.
    pub fn write_binary<W: Write>(
        &self,
        mut writer: W,
        channel: usize,
    ) -> Result<(), MeasurementError> {
        let data = self.channel_data(channel)?;

        match self.policy().export_shift() {
            Some(shift) => {
                let mut chunk = Vec::with_capacity(BINARY_CHUNK_BYTES.min(data.len()));
                for samples in data.chunks(BINARY_CHUNK_BYTES) {
                    chunk.clear();
                    chunk.extend(samples.iter().map(|&sample| (sample >> shift) as u8));
                    writer.write_all(&chunk)?;
                }
            }
            None => {
                let mut chunk = Vec::with_capacity(BINARY_CHUNK_BYTES.min(data.len() * 2));
                for samples in data.chunks(BINARY_CHUNK_BYTES / 2) {
                    chunk.clear();
                    chunk.extend(samples.iter().flat_map(|sample| sample.to_le_bytes()));
                    writer.write_all(&chunk)?;
                }
            }
        }

        writer.flush()?;
        log::debug!(
            "Wrote {} samples of channel {} as binary",
            data.len(),
            ChannelId::new(channel)
        );
        Ok(())
    }

    /// Write the last fetched page of `channel`, one decimal value per line.
    pub fn write_text<W: Write>(&self, writer: W, channel: usize) -> Result<(), MeasurementError> {
        let data = self.channel_data(channel)?;
        let shift = self.policy().export_shift();

        let mut out = BufWriter::new(writer);
        for &sample in data {
            writeln!(out, "{}", narrow(sample, shift))?;
        }
        out.flush()?;
        Ok(())
    }

    /// The last fetched page as a frame: a `time` column in seconds, a
    /// `trace` column for rapid block pages and one raw column per enabled
    /// channel.
    pub fn to_dataframe(&self) -> Result<DataFrame, MeasurementError> {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running().map(|client| {
            client.span(tracy_client::span_location!("Measurement::to_dataframe"), 0)
        });

        let interval_s = self
            .realized_interval_ns()
            .unwrap_or_else(|| self.timebase_ns())
            * 1e-9;
        let enabled = enabled_ids(self.channels());
        let mut columns: Vec<Column> = Vec::with_capacity(enabled.len() + 2);

        if self.last_run_mode() == Some(AcquisitionMode::RapidBlock) {
            let traces = self.traces_in_page() as usize;
            let per_trace = self.samples_per_trace() as usize;
            let first = self.page_first_trace();

            let time: Vec<f64> = (0..traces)
                .flat_map(|_| (0..per_trace).map(|k| k as f64 * interval_s))
                .collect();
            let trace: Vec<u64> = (0..traces as u64)
                .flat_map(|j| std::iter::repeat(first + j).take(per_trace))
                .collect();
            columns.push(Series::new(TIME_COLUMN_NAME.into(), time).into());
            columns.push(Series::new(TRACE_COLUMN_NAME.into(), trace).into());

            for id in enabled {
                let values: Vec<i32> = (0..traces)
                    .filter_map(|j| self.trace(id.index(), j))
                    .flatten()
                    .map(|&sample| i32::from(sample))
                    .collect();
                columns.push(Series::new(channel_column_name(id).into(), values).into());
            }
        } else {
            let len = self.length_fetched();
            let page_start = self.next_index().saturating_sub(len as u64);

            let time: Vec<f64> = (0..len as u64)
                .map(|k| (page_start + k) as f64 * interval_s)
                .collect();
            columns.push(Series::new(TIME_COLUMN_NAME.into(), time).into());

            for id in enabled {
                let values: Vec<i32> = self
                    .channel_data(id.index())?
                    .iter()
                    .map(|&sample| i32::from(sample))
                    .collect();
                columns.push(Series::new(channel_column_name(id).into(), values).into());
            }
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Write [`Self::to_dataframe`] as CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), MeasurementError> {
        let mut df = self.to_dataframe()?;
        CsvWriter::new(writer)
            .include_header(true)
            .finish(&mut df)?;
        Ok(())
    }
}
