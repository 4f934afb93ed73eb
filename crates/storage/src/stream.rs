#![forbid(unsafe_code)]

use crate::TraceError;
use crate::ansi::{AnsiRenderer, HtmlState, RenderedHtml};
use crate::io::{LinesWithPos, SeekFrom, TraceIo};
use crate::metrics::{TraceMetrics, TraceOperation};
use jobtrace_core::coverage::CoverageRegex;
use jobtrace_core::limits::STREAM_BUFFER_SIZE;
use jobtrace_core::section::{SectionParser, TraceSection};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

/// Read/write view over any trace backend, or over nothing at all.
pub struct Stream {
    io: Option<Box<dyn TraceIo>>,
    metrics: Arc<dyn TraceMetrics>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("valid", &self.valid())
            .field("size", &self.size())
            .field("tell", &self.tell())
            .finish()
    }
}

impl Stream {
    pub fn new(io: Box<dyn TraceIo>, metrics: Arc<dyn TraceMetrics>) -> Self {
        Self {
            io: Some(io),
            metrics,
        }
    }

    /// A stream with no trace behind it.
    pub fn empty(metrics: Arc<dyn TraceMetrics>) -> Self {
        Self { io: None, metrics }
    }

    pub fn valid(&self) -> bool {
        self.io.is_some()
    }

    pub fn size(&self) -> u64 {
        self.io.as_ref().map_or(0, |io| io.size())
    }

    pub fn tell(&self) -> u64 {
        self.io.as_ref().map_or(0, |io| io.tell())
    }

    pub fn path(&self) -> Option<&Path> {
        self.io.as_ref().and_then(|io| io.path())
    }

    pub fn url(&self) -> Option<&str> {
        self.io.as_ref().and_then(|io| io.url())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, TraceError> {
        self.io_required()?.seek(pos)
    }

    pub fn truncate(&mut self, offset: u64) -> Result<(), TraceError> {
        self.io_required()?.truncate(offset)
    }

    pub fn close(&mut self) -> Result<(), TraceError> {
        match self.io.take() {
            Some(mut io) => io.close(),
            None => Ok(()),
        }
    }

    pub fn io_mut(&mut self) -> Option<&mut (dyn TraceIo + 'static)> {
        self.io.as_deref_mut()
    }

    fn io_required(&mut self) -> Result<&mut (dyn TraceIo + 'static), TraceError> {
        self.io_mut().ok_or(TraceError::NoTrace)
    }

    /// Positions the cursor so that at most `last_bytes` remain, starting on a
    /// line boundary.
    pub fn limit(&mut self, last_bytes: u64) -> Result<(), TraceError> {
        let io = self.io_required()?;
        if io.size() <= last_bytes {
            return Ok(());
        }
        let back = i64::try_from(last_bytes)
            .map_err(|_| TraceError::InvalidInput("limit is too large"))?;

        let start = io.seek(SeekFrom::End(-back))?;
        let at_line_start = if start == 0 {
            true
        } else {
            io.seek(SeekFrom::Start(start - 1))?;
            io.read(Some(1))? == b"\n"
        };
        if !at_line_start {
            io.readline()?;
        }
        Ok(())
    }

    /// Replaces everything from `offset` on with `data`.
    pub fn append(&mut self, data: &[u8], offset: u64) -> Result<(), TraceError> {
        let io = self.io_required()?;
        io.truncate(offset)?;
        io.seek(SeekFrom::End(0))?;
        io.write(data)?;
        io.flush()?;

        self.metrics
            .increment_trace_operation(TraceOperation::Streamed);
        self.metrics.increment_trace_bytes(data.len() as u64);
        Ok(())
    }

    pub fn set(&mut self, data: &[u8]) -> Result<(), TraceError> {
        self.append(data, 0)
    }

    /// Text from the cursor to the end, or only the last `last_lines` lines.
    pub fn raw(&mut self, last_lines: Option<usize>) -> Result<Option<String>, TraceError> {
        let Some(io) = self.io_mut() else {
            return Ok(None);
        };
        let bytes = match last_lines {
            Some(0) => Vec::new(),
            Some(count) => read_last_lines(io, count)?,
            None => io.read(None)?,
        };
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn html(
        &mut self,
        renderer: &dyn AnsiRenderer,
        last_lines: Option<usize>,
    ) -> Result<String, TraceError> {
        let text = self.raw(last_lines)?.unwrap_or_default();
        Ok(renderer.convert(&text))
    }

    /// Renders what was appended since `state`. A missing or stale state renders
    /// the whole trace.
    pub fn html_with_state(
        &mut self,
        renderer: &dyn AnsiRenderer,
        state: Option<HtmlState>,
    ) -> Result<RenderedHtml, TraceError> {
        let Some(io) = self.io_mut() else {
            return Ok(RenderedHtml {
                html: String::new(),
                state: HtmlState::default(),
            });
        };
        let offset = state
            .map(|state| state.offset)
            .filter(|&offset| offset <= io.size())
            .unwrap_or(0);
        io.seek(SeekFrom::Start(offset))?;
        let bytes = io.read(None)?;
        let state = HtmlState { offset: io.tell() };
        Ok(RenderedHtml {
            html: renderer.convert(&String::from_utf8_lossy(&bytes)),
            state,
        })
    }

    /// The most recent coverage figure matching `regex`.
    ///
    /// Extraction never fails the caller: a bad pattern or a read error yields `None`.
    pub fn extract_coverage(&mut self, regex: &str) -> Option<String> {
        match self.try_extract_coverage(regex) {
            Ok(coverage) => coverage,
            Err(err) => {
                tracing::debug!(error = %err, "coverage extraction failed");
                None
            }
        }
    }

    fn try_extract_coverage(&mut self, regex: &str) -> Result<Option<String>, TraceError> {
        if regex.trim().is_empty() {
            return Ok(None);
        }
        let Some(io) = self.io_mut() else {
            return Ok(None);
        };
        let regex = CoverageRegex::new(regex)?;

        let mut coverage = None;
        reverse_lines(io, |line| {
            let text = String::from_utf8_lossy(&line);
            match regex.scan_line(text.trim_end_matches(['\r', '\n'])) {
                Some(found) => {
                    coverage = Some(found);
                    ControlFlow::Break(())
                }
                None => ControlFlow::Continue(()),
            }
        })?;
        Ok(coverage)
    }

    pub fn extract_sections(&mut self) -> Result<Vec<TraceSection>, TraceError> {
        let Some(io) = self.io_mut() else {
            return Ok(Vec::new());
        };
        io.seek(SeekFrom::Start(0))?;

        let mut parser = SectionParser::new();
        for line in LinesWithPos::new(io) {
            let (line, pos) = line?;
            parser.parse_line(&line, pos);
        }
        Ok(parser.sections())
    }
}

fn read_last_lines(io: &mut dyn TraceIo, count: usize) -> Result<Vec<u8>, TraceError> {
    let mut lines = Vec::with_capacity(count);
    reverse_lines(io, |line| {
        lines.push(line);
        if lines.len() >= count {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    Ok(lines.into_iter().rev().flatten().collect())
}

/// Feeds lines to `visit` from the last one backwards, reading the trace in
/// fixed blocks from the end. The partial line at the front of each block is
/// carried over and completed by the block before it.
fn reverse_lines<F>(io: &mut dyn TraceIo, mut visit: F) -> Result<(), TraceError>
where
    F: FnMut(Vec<u8>) -> ControlFlow<()>,
{
    io.seek(SeekFrom::End(0))?;
    let mut debris: Vec<u8> = Vec::new();

    loop {
        let block = read_backward(io, STREAM_BUFFER_SIZE)?;
        if block.is_empty() {
            break;
        }
        let mut joined = block;
        joined.extend_from_slice(&debris);

        let mut pieces = joined.split_inclusive(|&byte| byte == b'\n');
        let head = pieces.next().map(<[u8]>::to_vec).unwrap_or_default();
        let lines: Vec<&[u8]> = pieces.collect();
        for line in lines.into_iter().rev() {
            if visit(line.to_vec()).is_break() {
                return Ok(());
            }
        }
        debris = head;
    }

    if !debris.is_empty() {
        let _ = visit(debris);
    }
    Ok(())
}

/// Reads up to `length` bytes before the cursor and leaves the cursor at their start.
fn read_backward(io: &mut dyn TraceIo, length: u64) -> Result<Vec<u8>, TraceError> {
    let end = io.tell();
    if end == 0 {
        return Ok(Vec::new());
    }
    let start = end.saturating_sub(length);
    io.seek(SeekFrom::Start(start))?;
    let data = io.read(Some(end - start))?;
    io.seek(SeekFrom::Start(start))?;
    Ok(data)
}
