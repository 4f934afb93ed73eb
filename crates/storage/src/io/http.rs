#![forbid(unsafe_code)]

use super::{ChunkSource, ChunkedIo, FetchedChunk};
use crate::TraceError;
use jobtrace_core::chunk::ChunkWindow;
use reqwest::header::{CONTENT_RANGE, RANGE};
use std::ops::Range;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_range: Option<String>,
}

/// Performs `GET url` with `Range: bytes=start-end_inclusive`.
pub trait RangeTransport {
    fn get_range(
        &self,
        url: &str,
        start: u64,
        end_inclusive: u64,
    ) -> Result<RangeResponse, TraceError>;
}

#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TraceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl RangeTransport for ReqwestTransport {
    fn get_range(
        &self,
        url: &str,
        start: u64,
        end_inclusive: u64,
    ) -> Result<RangeResponse, TraceError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{end_inclusive}"))
            .send()?;
        let status = response.status().as_u16();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes()?.to_vec();
        Ok(RangeResponse {
            status,
            body,
            content_range,
        })
    }
}

/// Read-only windows of an archived trace served over HTTP.
pub struct HttpChunks {
    url: String,
    buffer_size: u64,
    transport: Box<dyn RangeTransport>,
}

impl std::fmt::Debug for HttpChunks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChunks")
            .field("url", &self.url)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

pub type HttpTraceIo = ChunkedIo<HttpChunks>;

impl HttpChunks {
    pub fn new(
        url: &str,
        buffer_size: u64,
        transport: Box<dyn RangeTransport>,
    ) -> Result<Self, TraceError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|err| TraceError::InvalidUrl(format!("{url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(TraceError::InvalidUrl(url.to_string()));
        }
        if buffer_size == 0 {
            return Err(TraceError::InvalidInput("http buffer size must be positive"));
        }
        Ok(Self {
            url: url.to_string(),
            buffer_size,
            transport,
        })
    }
}

impl ChunkedIo<HttpChunks> {
    pub fn open_http(
        url: &str,
        size: u64,
        buffer_size: u64,
        transport: Box<dyn RangeTransport>,
    ) -> Result<Self, TraceError> {
        Ok(ChunkedIo::new(
            HttpChunks::new(url, buffer_size, transport)?,
            size,
        ))
    }
}

impl ChunkSource for HttpChunks {
    fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    fn fetch(&mut self, window: ChunkWindow) -> Result<FetchedChunk, TraceError> {
        let end_inclusive = window.start + self.buffer_size - 1;
        let response = self
            .transport
            .get_range(&self.url, window.start, end_inclusive)?;
        if !matches!(response.status, 200 | 206) {
            return Err(TraceError::HttpStatus(response.status));
        }

        let body_len = response.body.len() as u64;
        let range = if response.status == 200 {
            // The server ignored the range and sent the whole object.
            0..body_len
        } else {
            response
                .content_range
                .as_deref()
                .and_then(parse_content_range)
                .filter(|range| range.end - range.start == body_len)
                .unwrap_or(window.start..window.start + body_len)
        };
        tracing::trace!(url = %self.url, start = range.start, end = range.end, "trace range fetched");
        Ok(FetchedChunk {
            data: response.body,
            range,
        })
    }

    fn url(&self) -> Option<&str> {
        Some(&self.url)
    }
}

/// Parses `bytes <first>-<last>/<total>` into a half-open range.
fn parse_content_range(value: &str) -> Option<Range<u64>> {
    let ranges = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, _total) = ranges.split_once('/')?;
    let (first, last) = span.split_once('-')?;
    let first = first.trim().parse::<u64>().ok()?;
    let last = last.trim().parse::<u64>().ok()?;
    (first <= last).then(|| first..last + 1)
}
