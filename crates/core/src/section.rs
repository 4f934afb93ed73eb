#![forbid(unsafe_code)]

//! Collapsible sections embedded in raw trace text.
//!
//! A runner brackets a region with `section_start:<unix_ts>:<name>\r\e[0K` and
//! `section_end:<unix_ts>:<name>\r\e[0K`. The start offset of a section points
//! just past its start marker and the end offset points at the first byte of
//! its end marker, so the range covers the enclosed content only.

use serde::Serialize;
use std::collections::HashMap;

const MARKER_PREFIX: &[u8] = b"section_";
const MARKER_SUFFIX: &[u8] = b"\r\x1b[0K";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TraceSection {
    pub name: String,
    pub byte_start: u64,
    pub byte_end: u64,
    pub date_start: u64,
    pub date_end: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SectionAction {
    Start,
    End,
}

#[derive(Clone, Copy, Debug)]
struct Marker {
    action: SectionAction,
    timestamp: u64,
    offset: u64,
}

struct MatchedMarker<'a> {
    action: SectionAction,
    timestamp: u64,
    name: &'a [u8],
    len: usize,
}

#[derive(Debug, Default)]
pub struct SectionParser {
    order: Vec<String>,
    markers: HashMap<String, Vec<Marker>>,
}

impl SectionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every marker found in `line`, which starts at byte `line_start` of the trace.
    pub fn parse_line(&mut self, line: &[u8], line_start: u64) {
        let mut pos = 0;
        while let Some(found) = find(&line[pos..], MARKER_PREFIX) {
            let begin = pos + found;
            let Some(marker) = match_marker(&line[begin..]) else {
                pos = begin + MARKER_PREFIX.len();
                continue;
            };

            let offset = match marker.action {
                SectionAction::Start => line_start + (begin + marker.len) as u64,
                SectionAction::End => line_start + begin as u64,
            };
            let name = String::from_utf8_lossy(marker.name).into_owned();
            self.add_marker(
                name,
                Marker {
                    action: marker.action,
                    timestamp: marker.timestamp,
                    offset,
                },
            );
            pos = begin + marker.len;
        }
    }

    pub fn parse<I, L>(&mut self, lines: I)
    where
        I: IntoIterator<Item = (L, u64)>,
        L: AsRef<[u8]>,
    {
        for (line, line_start) in lines {
            self.parse_line(line.as_ref(), line_start);
        }
    }

    /// Sections whose markers form exactly one `start` followed by one `end`.
    pub fn sections(&self) -> Vec<TraceSection> {
        self.order
            .iter()
            .filter_map(|name| {
                let markers = self.markers.get(name)?;
                let [start, end] = markers.as_slice() else {
                    return None;
                };
                if start.action != SectionAction::Start || end.action != SectionAction::End {
                    return None;
                }
                Some(TraceSection {
                    name: name.clone(),
                    byte_start: start.offset,
                    byte_end: end.offset,
                    date_start: start.timestamp,
                    date_end: end.timestamp,
                })
            })
            .collect()
    }

    fn add_marker(&mut self, name: String, marker: Marker) {
        match self.markers.get_mut(&name) {
            Some(markers) => markers.push(marker),
            None => {
                self.order.push(name.clone());
                self.markers.insert(name, vec![marker]);
            }
        }
    }
}

pub fn parse_sections<I, L>(lines: I) -> Vec<TraceSection>
where
    I: IntoIterator<Item = (L, u64)>,
    L: AsRef<[u8]>,
{
    let mut parser = SectionParser::new();
    parser.parse(lines);
    parser.sections()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Matches `section_(start|end):<digits>:<name>\r\e[0K` at the beginning of `bytes`.
fn match_marker(bytes: &[u8]) -> Option<MatchedMarker<'_>> {
    let rest = bytes.strip_prefix(MARKER_PREFIX)?;
    let (action, rest) = if let Some(rest) = rest.strip_prefix(b"start:") {
        (SectionAction::Start, rest)
    } else if let Some(rest) = rest.strip_prefix(b"end:") {
        (SectionAction::End, rest)
    } else {
        return None;
    };

    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let timestamp = std::str::from_utf8(&rest[..digits]).ok()?.parse::<u64>().ok()?;
    let rest = rest[digits..].strip_prefix(b":")?;

    let name_len = rest
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        .count();
    if name_len == 0 {
        return None;
    }
    let name = &rest[..name_len];
    let tail = rest[name_len..].strip_prefix(MARKER_SUFFIX)?;

    Some(MatchedMarker {
        action,
        timestamp,
        name,
        len: bytes.len() - tail.len(),
    })
}
