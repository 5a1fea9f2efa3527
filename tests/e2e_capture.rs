// DbgMux - tests/e2e_capture.rs
//
// End-to-end tests for the capture pipeline.
//
// These tests exercise real threads, real files (tempfile), real UDP sockets
// and, on Unix, real child processes: no mocks, no stubs. They cover the path
// from a producer to ordered, reassembled lines returned by `get_lines`, with
// update notifications delivered on a host-loop executor.

use dbgmux::app::executor::{ActiveExecutor, Executor};
use dbgmux::app::host_executor::HostExecutor;
use dbgmux::app::log_sources::{LogSources, LogSourcesConfig};
use dbgmux::core::model::{Line, SourceKind};
use dbgmux::platform::config::TransportKind;
use std::io::Write;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// =============================================================================
// Helpers
// =============================================================================

const TIMEOUT: Duration = Duration::from_secs(10);

fn host_sources(config: LogSourcesConfig) -> (Arc<HostExecutor>, LogSources) {
    let host = Arc::new(HostExecutor::new());
    let executor: Arc<dyn Executor> = host.clone();
    let sources = LogSources::new(executor, config).unwrap();
    (host, sources)
}

/// Pump the host loop until `want` lines were collected (or timeout).
fn collect(host: &HostExecutor, sources: &LogSources, want: usize) -> Vec<Line> {
    let mut lines = Vec::new();
    host.run_until(
        || {
            lines.extend(sources.get_lines());
            lines.len() >= want
        },
        TIMEOUT,
    )
    .unwrap();
    lines
}

/// Pump the host loop until every source ended, collecting all lines.
fn collect_until_idle(host: &HostExecutor, sources: &LogSources) -> Vec<Line> {
    let mut lines = Vec::new();
    let idle = host
        .run_until(
            || {
                lines.extend(sources.get_lines());
                sources.is_idle()
            },
            TIMEOUT,
        )
        .unwrap();
    assert!(idle, "sources did not end in time");
    lines.extend(sources.get_lines());
    lines
}

fn messages(lines: &[Line]) -> Vec<&str> {
    lines.iter().map(|l| l.message.as_str()).collect()
}

// =============================================================================
// Merge and reassembly
// =============================================================================

/// Two sources with interleaved timestamps come out in global time order.
#[test]
fn e2e_interleaved_sources_are_merged() {
    let (host, sources) = host_sources(LogSourcesConfig::default());
    let (_, a) = sources.add_test_source("A");
    let (_, b) = sources.add_test_source("B");

    for t in [1.0, 3.0, 5.0] {
        a.push_at(t, 10, "a", &format!("a{t}\n")).unwrap();
    }
    for t in [2.0, 4.0] {
        b.push_at(t, 20, "b", &format!("b{t}\n")).unwrap();
    }
    a.finish();
    b.finish();

    let lines = collect_until_idle(&host, &sources);
    let times: Vec<f64> = lines.iter().map(|l| l.time).collect();
    assert_eq!(times, [1.0, 2.0, 3.0, 4.0, 5.0]);
}

/// Fragments from one pid are joined; a run longer than the threshold is
/// force-emitted.
#[test]
fn e2e_fragments_reassembled_and_threshold_enforced() {
    let config = LogSourcesConfig {
        newline_flush_threshold: 256,
        ..LogSourcesConfig::default()
    };
    let (host, sources) = host_sources(config);
    let (_, src) = sources.add_test_source("fragments");

    src.push_at(1.0, 5, "p", "abc").unwrap();
    src.push_at(2.0, 5, "p", "def\n").unwrap();
    src.push_at(3.0, 6, "q", &"z".repeat(300)).unwrap();

    let lines = collect(&host, &sources, 2);
    assert_eq!(lines[0].message, "abcdef");
    assert_eq!(lines[1].message.len(), 300);
    assert_eq!(lines[1].pid, 6);
}

// =============================================================================
// Topology changes
// =============================================================================

/// Adds and removes from many threads while the listener is blocked leave a
/// consistent registry.
#[test]
fn e2e_concurrent_add_and_remove() {
    let executor: Arc<dyn Executor> = Arc::new(ActiveExecutor::new().unwrap());
    let sources = Arc::new(LogSources::new(executor, LogSourcesConfig::default()).unwrap());

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let sources = Arc::clone(&sources);
            thread::spawn(move || {
                for i in 0..10 {
                    let (id, handle) = sources.add_test_source(&format!("w{w}-{i}"));
                    handle.push(1, "p", "line\n").unwrap();
                    if i % 2 == 1 {
                        assert!(sources.remove(id));
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(sources.sources().len(), 20);
    assert!(sources.sources().iter().all(|i| i.kind == SourceKind::Test));

    // Every removal is announced once the listener has applied it.
    let mut removed = 0;
    let deadline = std::time::Instant::now() + TIMEOUT;
    while removed < 20 && std::time::Instant::now() < deadline {
        removed += sources
            .get_lines()
            .iter()
            .filter(|l| l.message.ends_with("was removed."))
            .count();
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(removed, 20);
}

// =============================================================================
// Throttling
// =============================================================================

/// A burst of 1000 updates inside one throttle interval notifies once.
#[test]
fn e2e_burst_yields_single_update() {
    let config = LogSourcesConfig {
        updates_per_second: 4,
        ..LogSourcesConfig::default()
    };
    let (host, sources) = host_sources(config);
    let updates = Arc::new(AtomicUsize::new(0));
    {
        let updates = Arc::clone(&updates);
        sources.subscribe_to_update(move || {
            updates.fetch_add(1, Ordering::SeqCst);
        });
    }

    let (_, src) = sources.add_test_source("burst");
    for i in 0..1000 {
        src.push_at(i as f64, 1, "p", "x\n").unwrap();
    }

    host.run_until(|| false, Duration::from_millis(600)).unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(sources.get_lines().len(), 1000);
}

// =============================================================================
// Concrete sources
// =============================================================================

/// A file read from the start without following ends after its content.
#[test]
fn e2e_file_tail_from_start() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "first\nsecond\n\nlast").unwrap();
    file.flush().unwrap();

    let (host, sources) = host_sources(LogSourcesConfig::default());
    let id = sources.add_file_tail(file.path(), true, false).unwrap();

    let lines = collect_until_idle(&host, &sources);
    assert_eq!(messages(&lines), ["first", "second", "", "last"]);
    assert!(lines.iter().all(|l| l.source == id));
    assert!(sources.source_info(id).unwrap().ended);
}

/// Lines travel through the ring transport when configured.
#[test]
fn e2e_ring_transport_delivers_udp_datagrams() {
    let config = LogSourcesConfig {
        transport: TransportKind::Ring,
        ring_buffer_capacity: 4096,
        ..LogSourcesConfig::default()
    };
    let (host, sources) = host_sources(config);
    let id = sources.add_udp_reader(0).unwrap();
    let address = sources.source_info(id).unwrap().address.unwrap();
    let port: u16 = address.rsplit(':').next().unwrap().parse().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    // The receive thread starts on the listener's next iteration; resend
    // until the first datagram lands.
    let mut lines = Vec::new();
    for _ in 0..50 {
        client.send_to(b"ping", ("127.0.0.1", port)).unwrap();
        host.run_until(
            || {
                lines.extend(sources.get_lines());
                !lines.is_empty()
            },
            Duration::from_millis(100),
        )
        .unwrap();
        if !lines.is_empty() {
            break;
        }
    }
    assert_eq!(lines[0].message, "ping");
    assert_eq!(lines[0].process_name, "127.0.0.1");
}

/// A child's trailing unterminated output is flushed before the
/// termination notice.
#[cfg(unix)]
#[test]
fn e2e_child_process_output_and_termination() {
    let (host, sources) = host_sources(LogSourcesConfig::default());
    sources
        .add_process_reader(
            "sh",
            &[
                "-c".to_string(),
                "printf 'hello\\nwor'; printf 'ld'; exit 2".to_string(),
            ],
        )
        .unwrap();

    let lines = collect_until_idle(&host, &sources);
    assert_eq!(messages(&lines[..2]), ["hello", "world"]);
    let notice = &lines[2].message;
    assert!(notice.starts_with("<process started at "), "{notice}");
    assert!(notice.ends_with("has terminated with exit code 2>"), "{notice}");
    assert_eq!(lines[2].process_name, "sh");
    assert_eq!(lines.len(), 3);
}

/// A child that prints nothing still gets a termination notice.
#[cfg(unix)]
#[test]
fn e2e_silent_child_is_reported() {
    let (host, sources) = host_sources(LogSourcesConfig::default());
    sources.add_process_reader("true", &[]).unwrap();
    let lines = collect_until_idle(&host, &sources);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].message.ends_with("has terminated with exit code 0>"));
}
