use bytes::Bytes;
use grib2_parser::{Grib2Message, MessageScanner, RawMessage};
use tracing::{debug, warn};

use super::{DecodeFilters, FormatAdapter, RunSummary};
use crate::error::Result;
use crate::streamer::ChunkInfo;
use crate::types::{DecodeResult, Grib2DecodeResult, Grib2MessageData, Grib2ResultMetadata, MessageInfo};

/// Adapter for GRIB2 message streams.
///
/// There is no header phase. A [`MessageScanner`] frames messages across
/// chunk edges; each message is matched against the filters using sections
/// 1, 3 and 4 only, and the data section is unpacked for matches alone.
#[derive(Debug)]
pub struct Grib2Adapter {
    filters: DecodeFilters,
    scanner: MessageScanner,
    messages: Vec<Grib2MessageData>,
    discovered: u64,
    last_chunk: Option<ChunkInfo>,
}

impl Grib2Adapter {
    pub fn new(filters: DecodeFilters) -> Self {
        Self {
            filters,
            scanner: MessageScanner::new(),
            messages: Vec::new(),
            discovered: 0,
            last_chunk: None,
        }
    }

    /// Messages framed so far, matching or not.
    pub fn discovered(&self) -> u64 {
        self.discovered
    }

    /// Filter and unpack one framed message. Returns whether it was kept.
    fn accept(&mut self, raw: RawMessage, info: &ChunkInfo) -> Result<bool> {
        self.discovered += 1;
        let message = Grib2Message::parse(raw)?;

        if !self.matches(&message) {
            debug!(
                offset = message.offset,
                parameter = %message.parameter(),
                "GRIB2 message filtered out"
            );
            return Ok(false);
        }

        let data = message.unpack_data()?;
        self.messages.push(Grib2MessageData {
            message: message_info(&message),
            data,
            chunk_info: *info,
        });
        Ok(true)
    }

    fn matches(&self, message: &Grib2Message) -> bool {
        if !self.filters.variables.is_empty()
            && !self
                .filters
                .variables
                .iter()
                .any(|v| v.eq_ignore_ascii_case(message.parameter()))
        {
            return false;
        }

        // A message without a usable valid time cannot satisfy a time filter
        if let Some(range) = &self.filters.time_range {
            match message.valid_time() {
                Some(valid) if range.contains(&valid) => {}
                _ => return false,
            }
        }

        // Grids whose extent cannot be derived are kept
        if let (Some(bbox), Some(extent)) = (&self.filters.bbox, message.bounding_box()) {
            if !bbox.intersects(&extent) {
                return false;
            }
        }

        true
    }
}

fn message_info(message: &Grib2Message) -> MessageInfo {
    let product = &message.product_definition;
    let (ni, nj) = message.grid_dims();
    MessageInfo {
        offset: message.offset,
        length: message.indicator.message_length,
        discipline: message.indicator.discipline,
        parameter: message.parameter().to_string(),
        parameter_category: product.parameter_category,
        parameter_number: product.parameter_number,
        level: message.level().to_string(),
        level_type: product.level_type,
        level_value: product.level_value,
        reference_time: message.reference_time(),
        valid_time: message.valid_time(),
        forecast_hour: product.forecast_hour(),
        ni,
        nj,
        bbox: message.bounding_box(),
    }
}

impl FormatAdapter for Grib2Adapter {
    fn has_header(&self) -> bool {
        false
    }

    fn parse_header(&mut self, _buffer: &Bytes) -> Result<()> {
        Ok(())
    }

    fn can_parse_chunk(&self, _info: &ChunkInfo, _variable: &str) -> bool {
        // Any window may hold the start or rest of a message
        true
    }

    fn extract(&mut self, chunk: &Bytes, info: &ChunkInfo) -> Result<usize> {
        self.last_chunk = Some(*info);
        let mut produced = 0;

        for raw in self.scanner.push(chunk.clone()) {
            if self.accept(raw, info)? {
                produced += 1;
            }
        }

        Ok(produced)
    }

    fn finish(mut self, summary: RunSummary) -> Result<DecodeResult> {
        if self.scanner.is_mid_message() {
            warn!(
                pending_bytes = self.scanner.pending_bytes(),
                "Input ends inside a GRIB2 message, ignoring the partial message"
            );

            // Messages held behind a false match still belong to the last window
            let recovered = self.scanner.finish();
            if let Some(info) = self.last_chunk {
                for raw in recovered {
                    self.accept(raw, &info)?;
                }
            }
        }

        debug!(
            discovered = self.discovered,
            kept = self.messages.len(),
            "GRIB2 scan finished"
        );

        Ok(DecodeResult::Grib2(Grib2DecodeResult {
            metadata: Grib2ResultMetadata {
                total_size: summary.total_size,
                processed_chunks: summary.processed_chunks,
                message_count: self.messages.len() as u64,
                bbox: self.filters.bbox,
                time_range: self.filters.time_range,
                variables: self.filters.variables,
            },
            messages: self.messages,
        }))
    }
}
