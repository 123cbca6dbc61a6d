//! Incremental extraction of variable values from consecutive file windows.

use crate::header::{Extent, NcType, NetCdfHeader, Variable};

/// Collects the values of one variable from windows visited in file order.
///
/// Elements that straddle a window edge are held back until the following
/// window completes them.
#[derive(Debug)]
pub struct VariableReader {
    nc_type: NcType,
    extent: Extent,
    fill_value: Option<f64>,
    carry: Vec<u8>,
    values: Vec<f64>,
    expected: u64,
}

impl VariableReader {
    pub fn new(header: &NetCdfHeader, var: &Variable) -> Self {
        Self {
            nc_type: var.nc_type,
            extent: header.extent(var),
            fill_value: var.fill_value(),
            carry: Vec::with_capacity(var.nc_type.size()),
            values: Vec::new(),
            expected: header.value_count(var),
        }
    }

    /// Whether any of the variable's bytes fall inside `[start, end)`.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        !self.extent.runs_within(start, end).is_empty()
    }

    /// Decode the variable's bytes found in `window`, which starts at file
    /// offset `window_start`. Returns the number of values produced.
    pub fn consume(&mut self, window: &[u8], window_start: u64) -> usize {
        let window_end = window_start + window.len() as u64;
        let before = self.values.len();

        for run in self.extent.runs_within(window_start, window_end) {
            let run_start = self.extent.run_start(run);
            let lo = run_start.max(window_start);
            let hi = (run_start + self.extent.len).min(window_end);
            if lo >= hi {
                continue;
            }
            let bytes = &window[(lo - window_start) as usize..(hi - window_start) as usize];
            self.decode_run(bytes);
        }

        self.values.len() - before
    }

    fn decode_run(&mut self, mut bytes: &[u8]) {
        let size = self.nc_type.size();

        if !self.carry.is_empty() {
            let take = (size - self.carry.len()).min(bytes.len());
            self.carry.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.carry.len() < size {
                return;
            }
            let value = self.nc_type.decode(&self.carry);
            self.push(value);
            self.carry.clear();
        }

        let mut elements = bytes.chunks_exact(size);
        for element in &mut elements {
            let value = self.nc_type.decode(element);
            self.push(value);
        }
        self.carry.extend_from_slice(elements.remainder());
    }

    fn push(&mut self, value: f64) {
        let value = match self.fill_value {
            Some(fill) if value == fill => f64::NAN,
            _ => value,
        };
        self.values.push(value);
    }

    pub fn values_read(&self) -> usize {
        self.values.len()
    }

    /// All values were read.
    pub fn is_complete(&self) -> bool {
        self.values.len() as u64 == self.expected
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}
