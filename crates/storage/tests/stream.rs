#![forbid(unsafe_code)]

mod support;

use jobtrace_core::model::JobStatus;
use jobtrace_storage::ansi::{EscapingRenderer, HtmlState};
use jobtrace_storage::io::{ChunkedIo, FileTraceIo, SeekFrom};
use jobtrace_storage::{CounterMetrics, DataStore, Stream, TraceMetrics, TraceOperation};
use std::sync::Arc;
use support::{config, create_job, setup};
use tempfile::TempDir;

fn file_stream(content: &[u8]) -> (TempDir, Stream, Arc<CounterMetrics>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("job.log");
    let mut io = FileTraceIo::create(&path).expect("create");
    jobtrace_storage::io::TraceIo::write(&mut io, content).expect("write");
    let metrics = Arc::new(CounterMetrics::new());
    let sink: Arc<dyn TraceMetrics> = metrics.clone();
    let stream = Stream::new(Box::new(FileTraceIo::open(&path).expect("open")), sink);
    (dir, stream, metrics)
}

fn numbered_lines(count: usize) -> String {
    (0..count)
        .map(|i| format!("line {i:04} {}\n", "x".repeat(i % 37)))
        .collect()
}

#[test]
fn limit_skips_the_partial_first_line() {
    let (_dir, mut stream, _) = file_stream(b"line one\nline two\nline three\n");
    stream.limit(12).expect("limit");
    assert_eq!(stream.raw(None).expect("raw").as_deref(), Some("line three\n"));
}

#[test]
fn limit_keeps_a_line_that_starts_exactly_at_the_cut() {
    let (_dir, mut stream, _) = file_stream(b"line one\nline two\nline three\n");
    stream.limit(11).expect("limit");
    assert_eq!(stream.raw(None).expect("raw").as_deref(), Some("line three\n"));

    stream.seek(SeekFrom::Start(0)).expect("rewind");
    stream.limit(20).expect("limit");
    assert_eq!(
        stream.raw(None).expect("raw").as_deref(),
        Some("line two\nline three\n")
    );
}

#[test]
fn limit_larger_than_trace_keeps_everything() {
    let (_dir, mut stream, _) = file_stream(b"short\ntrace\n");
    stream.limit(500 * 1024).expect("limit");
    assert_eq!(stream.raw(None).expect("raw").as_deref(), Some("short\ntrace\n"));
}

#[test]
fn last_lines_survive_block_boundaries() {
    let text = numbered_lines(1200);
    assert!(text.len() > 3 * 4096);
    let (_dir, mut stream, _) = file_stream(text.as_bytes());

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    for count in [1usize, 3, 150, 1199] {
        let expected: String = lines[lines.len() - count..].concat();
        assert_eq!(stream.raw(Some(count)).expect("raw").as_deref(), Some(expected.as_str()));
    }
    assert_eq!(stream.raw(Some(5000)).expect("raw").as_deref(), Some(text.as_str()));
}

#[test]
fn last_lines_include_an_unterminated_tail() {
    let (_dir, mut stream, _) = file_stream(b"a\nb\nc");
    assert_eq!(stream.raw(Some(2)).expect("raw").as_deref(), Some("b\nc"));
    assert_eq!(stream.raw(Some(3)).expect("raw").as_deref(), Some("a\nb\nc"));
}

#[test]
fn zero_last_lines_is_empty() {
    let (_dir, mut stream, _) = file_stream(b"a\nb\nc\n");
    assert_eq!(stream.raw(Some(0)).expect("raw").as_deref(), Some(""));
    assert_eq!(stream.raw(None).expect("raw").as_deref(), Some("a\nb\nc\n"));
}

#[test]
fn coverage_prefers_the_most_recent_report() {
    let (_dir, mut stream, _) = file_stream(
        b"Coverage: 50.00%\nrunning more tests\nCoverage: 87.50%\nJob succeeded\n",
    );
    assert_eq!(
        stream.extract_coverage(r"Coverage: \d+\.\d+%").as_deref(),
        Some("87.50")
    );
    assert_eq!(
        stream.extract_coverage(r"(\d+\.\d+)% covered").as_deref(),
        None
    );
}

#[test]
fn coverage_failures_yield_nothing() {
    let (_dir, mut stream, _) = file_stream(b"Coverage: 50.00%\n");
    assert_eq!(stream.extract_coverage("(unclosed"), None);
    assert_eq!(stream.extract_coverage("   "), None);

    let mut empty = Stream::empty(Arc::new(CounterMetrics::new()));
    assert_eq!(empty.extract_coverage(r"Coverage: \d+"), None);
}

#[test]
fn coverage_far_from_the_end_is_found() {
    let mut text = String::from("Total coverage: 91.3%\n");
    text.push_str(&numbered_lines(800));
    let (_dir, mut stream, _) = file_stream(text.as_bytes());
    assert_eq!(
        stream.extract_coverage(r"Total coverage: \d+\.\d+").as_deref(),
        Some("91.3")
    );
}

#[test]
fn sections_carry_content_offsets() {
    let start = "section_start:1700000000:build\r\x1b[0K";
    let end = "section_end:1700000042:build\r\x1b[0K";
    let text = format!("{start}make all\ncc main.c\n{end}done\n{start}");
    let (_dir, mut stream, _) = file_stream(text.as_bytes());

    let sections = stream.extract_sections().expect("sections");
    assert!(sections.is_empty(), "three markers for one name are dropped");

    let text = format!("prep\n{start}make all\ncc main.c\n{end}done\n");
    let (_dir, mut stream, _) = file_stream(text.as_bytes());
    let sections = stream.extract_sections().expect("sections");
    assert_eq!(sections.len(), 1);
    let section = &sections[0];
    assert_eq!(section.name, "build");
    assert_eq!(section.byte_start as usize, "prep\n".len() + start.len());
    assert_eq!(
        section.byte_end as usize,
        "prep\n".len() + start.len() + "make all\ncc main.c\n".len()
    );
    assert_eq!(section.date_start, 1_700_000_000);
    assert_eq!(section.date_end, 1_700_000_042);
    assert_eq!(
        &text[section.byte_start as usize..section.byte_end as usize],
        "make all\ncc main.c\n"
    );
}

#[test]
fn html_renders_the_raw_text() {
    let (_dir, mut stream, _) = file_stream(b"\x1b[32mok\x1b[0m\n<done>\n");
    assert_eq!(
        stream.html(&EscapingRenderer, None).expect("html"),
        "ok<br>&lt;done&gt;<br>"
    );
    assert_eq!(
        stream.html(&EscapingRenderer, Some(1)).expect("html"),
        "&lt;done&gt;<br>"
    );
}

#[test]
fn live_stream_append_and_incremental_html() {
    let mut fx = setup(config(8, DataStore::Cache));
    let job = create_job(&mut fx.store, JobStatus::Running);
    let io = ChunkedIo::open_live(fx.store.try_clone().expect("clone"), job).expect("open");
    let mut stream = Stream::new(Box::new(io), fx.store.metrics());

    stream.append(b"first line\n", 0).expect("append");
    let first = stream
        .html_with_state(&EscapingRenderer, None)
        .expect("render");
    assert_eq!(first.html, "first line<br>");
    assert_eq!(first.state, HtmlState { offset: 11 });

    stream.append(b"second\n", 11).expect("append");
    let second = stream
        .html_with_state(&EscapingRenderer, Some(first.state))
        .expect("render");
    assert_eq!(second.html, "second<br>");
    assert_eq!(second.state.offset, 18);

    stream.append(b"redo\n", 6).expect("rewrite tail");
    stream.seek(SeekFrom::Start(0)).expect("rewind");
    assert_eq!(stream.raw(None).expect("raw").as_deref(), Some("first redo\n"));
    let stale = stream
        .html_with_state(&EscapingRenderer, Some(second.state))
        .expect("render");
    assert_eq!(stale.html, "first redo<br>");

    assert_eq!(fx.metrics.operation_count(TraceOperation::Streamed), 3);
    assert_eq!(fx.metrics.trace_bytes(), 11 + 7 + 5);
}

#[test]
fn set_replaces_the_trace() {
    let mut fx = setup(config(8, DataStore::Database));
    let job = create_job(&mut fx.store, JobStatus::Running);
    let io = ChunkedIo::open_live(fx.store.try_clone().expect("clone"), job).expect("open");
    let mut stream = Stream::new(Box::new(io), fx.store.metrics());

    stream.append(b"0123456789abcdef", 0).expect("append");
    stream.set(b"new").expect("set");
    assert_eq!(stream.size(), 3);
    stream.seek(SeekFrom::Start(0)).expect("rewind");
    assert_eq!(stream.raw(None).expect("raw").as_deref(), Some("new"));
    assert_eq!(fx.store.chunks_list(job).expect("chunks").len(), 1);
}

#[test]
fn empty_stream_is_invalid() {
    let mut stream = Stream::empty(Arc::new(CounterMetrics::new()));
    assert!(!stream.valid());
    assert_eq!(stream.size(), 0);
    assert_eq!(stream.raw(None).expect("raw"), None);
    assert!(stream.extract_sections().expect("sections").is_empty());
    assert_eq!(stream.html(&EscapingRenderer, None).expect("html"), "");
    assert!(stream.append(b"x", 0).is_err());
}
