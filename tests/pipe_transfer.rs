//! Bulk-transfer behavior of the non-blocking pipe endpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use procpipe::{ignore_sigpipe, pipe};

#[test]
fn read_to_end_finishes_at_eof() {
    let (reader, writer) = pipe().unwrap();
    let written = writer.write(b"test data", 0, 9);
    assert!(written.status.is_ok());
    assert_eq!(written.bytes_written, 9);
    drop(writer);

    let outcome = reader.read_to_end(None);
    assert!(outcome.status.is_ok());
    assert_eq!(outcome.data, b"test data");
}

#[test]
fn bulk_round_trip_preserves_order() {
    let (reader, writer) = pipe().unwrap();
    let payload: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();

    thread::scope(|scope| {
        let producer = scope.spawn(|| {
            let outcome = writer.write_all(&payload, 0, None);
            assert!(outcome.status.is_ok());
            assert_eq!(outcome.bytes_written, payload.len());
            drop(writer);
        });

        let drained = reader.read_to_end(None);
        producer.join().unwrap();
        assert!(drained.status.is_ok());
        assert_eq!(drained.data, payload);
    });
}

#[test]
fn read_to_end_cancel_returns_accumulation() {
    let (reader, writer) = pipe().unwrap();
    let written = writer.write(b"held", 0, 4);
    assert_eq!(written.bytes_written, 4);

    let cancel = AtomicBool::new(false);
    thread::scope(|scope| {
        let drainer = scope.spawn(|| reader.read_to_end(Some(&cancel)));

        // The writer stays open, so only the flag can end the loop.
        thread::sleep(Duration::from_millis(250));
        cancel.store(true, Ordering::Release);

        let outcome = drainer.join().unwrap();
        assert!(outcome.status.is_ok());
        assert_eq!(outcome.data, b"held");
    });
    drop(writer);
}

#[test]
fn write_all_cancel_reports_partial_count() {
    let (reader, writer) = pipe().unwrap();
    let payload = vec![b'b'; 1024 * 1024];

    let cancel = AtomicBool::new(false);
    thread::scope(|scope| {
        let producer = scope.spawn(|| writer.write_all(&payload, 0, Some(&cancel)));

        thread::sleep(Duration::from_millis(150));
        cancel.store(true, Ordering::Release);

        let outcome = producer.join().unwrap();
        assert!(outcome.status.is_ok());
        assert!(outcome.bytes_written > 0);
        assert!(outcome.bytes_written < payload.len());

        // Exactly the accepted bytes are sitting in the kernel buffer.
        let mut drained = Vec::new();
        loop {
            let chunk = reader.read(4096);
            let empty = chunk.data.is_empty();
            drained.extend_from_slice(&chunk.data);
            if chunk.status.is_eof() || (empty && chunk.status.is_transient()) {
                break;
            }
        }
        assert_eq!(drained.len(), outcome.bytes_written);
    });
}

#[test]
fn writer_sees_epipe_when_reader_closes() {
    ignore_sigpipe().unwrap();

    let (reader, writer) = pipe().unwrap();
    let payload = vec![b'c'; 1024 * 1024];

    thread::scope(|scope| {
        let producer = scope.spawn(|| writer.write_all(&payload, 0, None));

        thread::sleep(Duration::from_millis(50));
        drop(reader);

        let outcome = producer.join().unwrap();
        assert!(outcome.status.is_broken_pipe(), "got {:?}", outcome.status);
        assert!(outcome.bytes_written < payload.len());
    });
}

#[test]
fn concurrent_writers_stay_chunk_atomic() {
    const WRITERS: usize = 5;
    const PER_WRITER: usize = 1000;

    let (reader, writer) = pipe().unwrap();
    let writer = Arc::new(writer);

    let drained = thread::scope(|scope| {
        let drainer = scope.spawn(|| reader.read_to_end(None));

        let producers: Vec<_> = (0..WRITERS)
            .map(|tag| {
                let writer = Arc::clone(&writer);
                scope.spawn(move || {
                    let data = vec![tag as u8; PER_WRITER];
                    let outcome = writer.write_all(&data, 0, None);
                    assert!(outcome.status.is_ok());
                    assert_eq!(outcome.bytes_written, PER_WRITER);
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        // Last strong handle: closing it lets the drainer see EOF.
        drop(writer);

        drainer.join().unwrap()
    });

    assert!(drained.status.is_ok());
    assert_eq!(drained.data.len(), WRITERS * PER_WRITER);

    // Inter-buffer order is unspecified; the per-writer byte counts are not.
    let mut counts = [0usize; WRITERS];
    for byte in &drained.data {
        counts[*byte as usize] += 1;
    }
    assert!(counts.iter().all(|&count| count == PER_WRITER));
}
