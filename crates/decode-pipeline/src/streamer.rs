//! Sequential chunked processing of an in-memory buffer.
//!
//! A buffer is cut into fixed-size windows that are handed out strictly in
//! ascending order; chunk `i + 1` is not started until chunk `i` and its
//! completion hook have finished. Windows are zero-copy slices of the buffer.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DecodeError, Result};

/// Position of one window within its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u64,
    /// Byte range `[start, end)` of the window.
    pub start: u64,
    pub end: u64,
    pub total_chunks: u64,
}

impl ChunkInfo {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total_chunks
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    pub processed_chunks: u64,
    pub total_chunks: u64,
    /// `processed_chunks / total_chunks * 100`, or 100 for an empty buffer.
    pub progress: f64,
}

impl ChunkProgress {
    fn new(processed_chunks: u64, total_chunks: u64) -> Self {
        let progress = if total_chunks == 0 {
            100.0
        } else {
            processed_chunks as f64 / total_chunks as f64 * 100.0
        };
        Self {
            processed_chunks,
            total_chunks,
            progress,
        }
    }
}

/// Index-based plan of the windows over a buffer.
///
/// Iterating yields each [`ChunkInfo`] once, in order; [`ChunkWindows::seek`]
/// restarts from any index.
#[derive(Debug, Clone)]
pub struct ChunkWindows {
    total_size: u64,
    chunk_size: u64,
    next: u64,
}

impl ChunkWindows {
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DecodeError::invalid_options("chunk size must be > 0"));
        }
        Ok(Self {
            total_size,
            chunk_size,
            next: 0,
        })
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// The window at `index`, if it exists.
    pub fn get(&self, index: u64) -> Option<ChunkInfo> {
        let total_chunks = self.total_chunks();
        if index >= total_chunks {
            return None;
        }
        let start = index * self.chunk_size;
        Some(ChunkInfo {
            index,
            start,
            end: (start + self.chunk_size).min(self.total_size),
            total_chunks,
        })
    }

    /// Index of the next window the iterator will yield.
    pub fn position(&self) -> u64 {
        self.next
    }

    pub fn seek(&mut self, index: u64) {
        self.next = index.min(self.total_chunks());
    }
}

impl Iterator for ChunkWindows {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        let info = self.get(self.next)?;
        self.next += 1;
        Some(info)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total_chunks() - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkWindows {}

/// Per-chunk work driven by [`process_in_chunks`].
#[async_trait]
pub trait ChunkHandler: Send {
    type Output: Send + Sync;

    /// Produce the primary result for one window.
    async fn process(&mut self, chunk: Bytes, info: ChunkInfo) -> Result<Self::Output>;

    /// Runs after `process` succeeded and finishes before the next chunk starts.
    async fn on_chunk_complete(&mut self, _output: &Self::Output, _info: ChunkInfo) -> Result<()> {
        Ok(())
    }
}

/// Results of a completed run, one per chunk in order.
#[derive(Debug, Clone)]
pub struct ChunkedOutput<T> {
    pub results: Vec<T>,
    pub total_chunks: u64,
    pub total_size: u64,
}

/// Drive `handler` over consecutive windows of `buffer`.
///
/// Any error aborts the run: results of earlier chunks are dropped and no
/// completion hook fires for the failing chunk or any later one.
pub async fn process_in_chunks<H>(
    buffer: &Bytes,
    chunk_size: usize,
    handler: &mut H,
    on_progress: Option<&(dyn Fn(ChunkProgress) + Send + Sync)>,
) -> Result<ChunkedOutput<H::Output>>
where
    H: ChunkHandler,
{
    let windows = ChunkWindows::new(buffer.len() as u64, chunk_size as u64)?;
    let total_chunks = windows.total_chunks();
    let total_size = windows.total_size();
    let mut results = Vec::with_capacity(total_chunks as usize);

    if total_chunks == 0 {
        if let Some(report) = on_progress {
            report(ChunkProgress::new(0, 0));
        }
    }

    for info in windows {
        let chunk = buffer.slice(info.start as usize..info.end as usize);

        let output = handler.process(chunk, info).await?;
        handler.on_chunk_complete(&output, info).await?;
        results.push(output);

        debug!(
            chunk = info.index,
            total_chunks = total_chunks,
            "Processed chunk"
        );

        if let Some(report) = on_progress {
            report(ChunkProgress::new(info.index + 1, total_chunks));
        }
    }

    Ok(ChunkedOutput {
        results,
        total_chunks,
        total_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_windows_tile_buffer() {
        for (len, size) in [(0u64, 3u64), (1, 1), (9, 3), (10, 3), (11, 4), (5, 100)] {
            let windows = ChunkWindows::new(len, size).unwrap();
            let expected = (len + size - 1) / size;
            assert_eq!(windows.total_chunks(), expected);

            let infos: Vec<_> = windows.collect();
            assert_eq!(infos.len() as u64, expected);

            let mut cursor = 0;
            for (i, info) in infos.iter().enumerate() {
                assert_eq!(info.index, i as u64);
                assert_eq!(info.start, cursor);
                assert!(info.end > info.start);
                cursor = info.end;
            }
            assert_eq!(cursor, len);
        }
    }

    #[test]
    fn test_25_mib_in_10_mib_chunks() {
        let windows = ChunkWindows::new(25 * MIB, 10 * MIB).unwrap();
        let ranges: Vec<_> = windows.map(|c| (c.start, c.end)).collect();
        assert_eq!(
            ranges,
            vec![(0, 10 * MIB), (10 * MIB, 20 * MIB), (20 * MIB, 25 * MIB)]
        );
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkWindows::new(10, 0),
            Err(DecodeError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_seek_restarts_iteration() {
        let mut windows = ChunkWindows::new(10, 3).unwrap();
        windows.next();
        windows.next();
        assert_eq!(windows.position(), 2);
        assert_eq!(windows.len(), 2);

        windows.seek(1);
        assert_eq!(windows.next().map(|c| c.start), Some(3));
        windows.seek(99);
        assert!(windows.next().is_none());
    }

    struct Recorder {
        fail_at: Option<u64>,
        completed: Vec<u64>,
    }

    #[async_trait]
    impl ChunkHandler for Recorder {
        type Output = usize;

        async fn process(&mut self, chunk: Bytes, info: ChunkInfo) -> Result<usize> {
            if self.fail_at == Some(info.index) {
                return Err(DecodeError::format_decode("boom"));
            }
            Ok(chunk.len())
        }

        async fn on_chunk_complete(&mut self, _output: &usize, info: ChunkInfo) -> Result<()> {
            self.completed.push(info.index);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let buffer = Bytes::from(vec![0u8; 1000]);
        let seen = Mutex::new(Vec::new());
        let report = |p: ChunkProgress| seen.lock().unwrap().push(p.progress);

        let mut handler = Recorder {
            fail_at: None,
            completed: Vec::new(),
        };
        let output = process_in_chunks(&buffer, 300, &mut handler, Some(&report))
            .await
            .unwrap();

        assert_eq!(output.total_chunks, 4);
        assert_eq!(output.results, vec![300, 300, 300, 100]);
        assert_eq!(handler.completed, vec![0, 1, 2, 3]);

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![25.0, 50.0, 75.0, 100.0]);
    }

    #[tokio::test]
    async fn test_empty_buffer_reports_completion() {
        let seen = Mutex::new(Vec::new());
        let report = |p: ChunkProgress| seen.lock().unwrap().push(p);

        let mut handler = Recorder {
            fail_at: None,
            completed: Vec::new(),
        };
        let output = process_in_chunks(&Bytes::new(), 8, &mut handler, Some(&report))
            .await
            .unwrap();

        assert_eq!(output.total_chunks, 0);
        assert!(output.results.is_empty());
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].progress, 100.0);
    }

    #[tokio::test]
    async fn test_failure_stops_completion_hooks() {
        let buffer = Bytes::from(vec![1u8; 50]);
        let mut handler = Recorder {
            fail_at: Some(2),
            completed: Vec::new(),
        };

        let result = process_in_chunks(&buffer, 10, &mut handler, None).await;

        assert!(matches!(result, Err(DecodeError::FormatDecode(_))));
        assert_eq!(handler.completed, vec![0, 1]);
    }
}
