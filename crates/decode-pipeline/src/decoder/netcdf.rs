use std::collections::BTreeMap;

use bytes::Bytes;
use netcdf_parser::{parse_header, Attribute, AttributeValue, NetCdfError, NetCdfHeader, VariableReader};
use serde_json::Value;
use tracing::{debug, warn};

use super::{DecodeFilters, FormatAdapter, RunSummary};
use crate::error::{DecodeError, Result};
use crate::streamer::ChunkInfo;
use crate::types::{
    DecodeResult, NetCdfDecodeResult, NetCdfResultMetadata, VariableData, VariableMetadata,
};

/// Adapter for NetCDF classic and 64-bit offset files.
///
/// The header is read from a leading window before chunk iteration. Each
/// selected variable then gets a [`VariableReader`] that picks its bytes out
/// of whichever chunks overlap its data segments, so values come out in
/// file byte order even when an element straddles a chunk edge.
#[derive(Debug)]
pub struct NetCdfAdapter {
    filters: DecodeFilters,
    header_window: usize,
    header: Option<NetCdfHeader>,
    readers: Vec<(String, VariableReader)>,
}

impl NetCdfAdapter {
    pub fn new(filters: DecodeFilters, header_window: usize) -> Self {
        Self {
            filters,
            header_window: header_window.max(1),
            header: None,
            readers: Vec::new(),
        }
    }

    pub fn header(&self) -> Option<&NetCdfHeader> {
        self.header.as_ref()
    }

    /// Parse the header from `min(header_window, len)` bytes, doubling the
    /// window while the header runs past it.
    fn read_header(&self, buffer: &Bytes) -> Result<NetCdfHeader> {
        let file_len = buffer.len();
        let mut window = self.header_window.min(file_len);

        loop {
            match parse_header(&buffer[..window], file_len as u64) {
                Ok(header) => return Ok(header),
                Err(NetCdfError::Incomplete { .. }) if window < file_len => {
                    let grown = (window * 2).min(file_len);
                    debug!(from = window, to = grown, "NetCDF header exceeds window, growing");
                    window = grown;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn variable_data(header: &NetCdfHeader, name: &str, reader: VariableReader) -> Result<VariableData> {
        let var = header
            .variable(name)
            .ok_or_else(|| DecodeError::format_decode(format!("variable '{}' vanished", name)))?;

        if !reader.is_complete() {
            return Err(DecodeError::format_decode(format!(
                "variable '{}' is truncated: read {} of {} values",
                name,
                reader.values_read(),
                header.value_count(var)
            )));
        }

        let attributes = var
            .attributes
            .iter()
            .map(|a| (a.name.clone(), attribute_json(a)))
            .collect::<BTreeMap<_, _>>();

        Ok(VariableData {
            metadata: VariableMetadata {
                dimensions: header.shape(var),
                dimension_names: header.dimension_names(var),
                data_type: var.nc_type.name().to_string(),
                attributes,
            },
            data: reader
                .into_values()
                .into_iter()
                .map(|v| if v.is_nan() { None } else { Some(v) })
                .collect(),
        })
    }
}

fn attribute_json(attribute: &Attribute) -> Value {
    match &attribute.value {
        AttributeValue::Text(s) => Value::String(s.clone()),
        AttributeValue::Numbers(values) => {
            let mut numbers: Vec<Value> = values.iter().map(|v| number_json(*v)).collect();
            if numbers.len() == 1 {
                numbers.remove(0)
            } else {
                Value::Array(numbers)
            }
        }
    }
}

fn number_json(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

impl FormatAdapter for NetCdfAdapter {
    fn has_header(&self) -> bool {
        true
    }

    fn parse_header(&mut self, buffer: &Bytes) -> Result<()> {
        let header = self.read_header(buffer)?;

        let selected: Vec<String> = if self.filters.variables.is_empty() {
            header.variables.iter().map(|v| v.name.clone()).collect()
        } else {
            self.filters
                .variables
                .iter()
                .filter(|name| {
                    let present = header.variable(name).is_some();
                    if !present {
                        warn!(variable = %name, "Requested variable not in NetCDF header, skipping");
                    }
                    present
                })
                .cloned()
                .collect()
        };

        self.readers = selected
            .into_iter()
            .filter_map(|name| {
                let var = header.variable(&name)?;
                Some((name, VariableReader::new(&header, var)))
            })
            .collect();

        debug!(
            version = ?header.version,
            variables = header.variables.len(),
            selected = self.readers.len(),
            header_size = header.header_size,
            "Parsed NetCDF header"
        );

        self.header = Some(header);
        Ok(())
    }

    fn can_parse_chunk(&self, info: &ChunkInfo, variable: &str) -> bool {
        self.readers
            .iter()
            .find(|(name, _)| name == variable)
            .map(|(_, reader)| reader.overlaps(info.start, info.end))
            .unwrap_or(false)
    }

    fn extract(&mut self, chunk: &Bytes, info: &ChunkInfo) -> Result<usize> {
        if self.header.is_none() {
            return Err(DecodeError::format_decode("NetCDF chunk extracted before header"));
        }

        let mut produced = 0;
        for (_, reader) in self.readers.iter_mut() {
            if reader.overlaps(info.start, info.end) {
                produced += reader.consume(chunk, info.start);
            }
        }
        Ok(produced)
    }

    fn finish(self, summary: RunSummary) -> Result<DecodeResult> {
        let header = self
            .header
            .ok_or_else(|| DecodeError::format_decode("NetCDF header was never parsed"))?;

        let mut variables = BTreeMap::new();
        for (name, reader) in self.readers {
            let data = Self::variable_data(&header, &name, reader)?;
            variables.insert(name, data);
        }

        Ok(DecodeResult::NetCdf(NetCdfDecodeResult {
            variables,
            metadata: NetCdfResultMetadata {
                total_size: summary.total_size,
                processed_chunks: summary.processed_chunks,
                bbox: self.filters.bbox,
                time_range: self.filters.time_range,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamer::ChunkWindows;
    use test_utils::{NcKind, NetCdfBuilder};

    fn temperature_file() -> Bytes {
        let values: Vec<f64> = (0..100).map(|i| 270.0 + i as f64 * 0.5).collect();
        Bytes::from(
            NetCdfBuilder::classic()
                .dimension("lat", 10)
                .dimension("lon", 10)
                .variable("temperature", &["lat", "lon"], NcKind::Float, values)
                .text_attribute("units", "K")
                .build(),
        )
    }

    fn run(adapter: &mut NetCdfAdapter, buffer: &Bytes, chunk_size: u64) {
        adapter.parse_header(buffer).unwrap();
        for info in ChunkWindows::new(buffer.len() as u64, chunk_size).unwrap() {
            let chunk = buffer.slice(info.start as usize..info.end as usize);
            adapter.extract(&chunk, &info).unwrap();
        }
    }

    #[test]
    fn test_header_window_grows() {
        let buffer = temperature_file();
        // Window far smaller than the header
        let mut adapter = NetCdfAdapter::new(DecodeFilters::default(), 8);
        adapter.parse_header(&buffer).unwrap();
        assert!(adapter.header().unwrap().variable("temperature").is_some());
    }

    #[test]
    fn test_extracts_across_odd_chunk_edges() {
        let buffer = temperature_file();
        let mut adapter = NetCdfAdapter::new(DecodeFilters::default(), 1024 * 1024);
        // 7-byte chunks split most 4-byte floats
        run(&mut adapter, &buffer, 7);

        let summary = RunSummary {
            total_size: buffer.len() as u64,
            processed_chunks: 0,
        };
        let result = adapter.finish(summary).unwrap();
        let netcdf = result.as_netcdf().unwrap();
        let temperature = &netcdf.variables["temperature"];

        assert_eq!(temperature.metadata.dimensions, vec![10, 10]);
        assert_eq!(temperature.metadata.data_type, "float");
        assert_eq!(temperature.metadata.attributes["units"], "K");
        assert_eq!(temperature.data.len(), 100);
        assert_eq!(temperature.data[0], Some(270.0));
        assert_eq!(temperature.data[99], Some(270.0 + 99.0 * 0.5));
    }

    #[test]
    fn test_missing_variable_is_skipped() {
        let buffer = temperature_file();
        let filters = DecodeFilters {
            variables: vec!["humidity".to_string(), "temperature".to_string()],
            ..Default::default()
        };
        let mut adapter = NetCdfAdapter::new(filters, 1024);
        run(&mut adapter, &buffer, 64);

        let header_size = adapter.header().unwrap().header_size as u64;
        let before_data = ChunkInfo {
            index: 0,
            start: 0,
            end: header_size,
            total_chunks: 1,
        };
        assert!(!adapter.can_parse_chunk(&before_data, "temperature"));
        assert!(!adapter.can_parse_chunk(&before_data, "humidity"));

        let result = adapter
            .finish(RunSummary {
                total_size: buffer.len() as u64,
                processed_chunks: 1,
            })
            .unwrap();
        let names: Vec<_> = result.as_netcdf().unwrap().variables.keys().cloned().collect();
        assert_eq!(names, vec!["temperature"]);
    }

    #[test]
    fn test_truncated_file_fails() {
        let full = temperature_file();
        let buffer = full.slice(..full.len() - 8);
        let mut adapter = NetCdfAdapter::new(DecodeFilters::default(), 1024);
        run(&mut adapter, &buffer, 50);

        let result = adapter.finish(RunSummary {
            total_size: buffer.len() as u64,
            processed_chunks: 1,
        });
        assert!(matches!(result, Err(DecodeError::FormatDecode(_))));
    }

    #[test]
    fn test_hdf5_rejected() {
        let buffer = Bytes::from_static(b"\x89HDF\r\n\x1a\n\x00\x00\x00\x00");
        let mut adapter = NetCdfAdapter::new(DecodeFilters::default(), 1024);
        assert!(matches!(
            adapter.parse_header(&buffer),
            Err(DecodeError::FormatDecode(_))
        ));
    }
}
