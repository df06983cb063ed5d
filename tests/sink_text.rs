// Интеграционные свойства sink'а: position после N put'ов равен N,
// текстовый листинг содержит ровно N значений с переносом каждые 32.

use oorandom::Rand64;

use mksnap::{SinkError, SnapshotSink};

#[test]
fn position_tracks_put_count_randomized() {
    let mut rng = Rand64::new(0x51_4B_2026);
    for _ in 0..20 {
        let n = (rng.rand_range(0..500)) as usize;
        let mut sink = SnapshotSink::new();
        for i in 0..n {
            sink.put((rng.rand_u64() & 0xFF) as u8, "payload");
            assert_eq!(sink.position(), i + 1);
        }
        assert_eq!(sink.position(), n);
    }
}

#[test]
fn listing_has_n_values_wrapped_every_32() {
    let mut rng = Rand64::new(0xC0FFEE);
    for _ in 0..20 {
        let n = (rng.rand_range(0..300)) as usize;
        let mut sink = SnapshotSink::new();
        let mut expect = Vec::with_capacity(n);
        for _ in 0..n {
            let b = (rng.rand_u64() & 0xFF) as u8;
            expect.push(b);
            sink.put(b, "payload");
        }

        let mut buf = Vec::new();
        sink.render_as_text(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        if n == 0 {
            assert!(text.is_empty());
            continue;
        }

        let values: Vec<u8> = text
            .split(',')
            .map(|t| t.trim().parse::<u8>().unwrap())
            .collect();
        assert_eq!(values, expect, "listing must reproduce the bytes, n={}", n);

        // Переносы: каждая полная строка несет ровно 32 значения.
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), (n + 31) / 32);
        for line in &lines[..lines.len() - 1] {
            assert_eq!(line.split(',').filter(|t| !t.is_empty()).count(), 32);
        }
    }
}

#[test]
fn second_compress_is_rejected_not_silently_absorbed() {
    let mut sink = SnapshotSink::new();
    for b in b"once only" {
        sink.put(*b, "payload");
    }
    let mut c = mksnap::IdentityCompressor::new();
    sink.compress(&mut c).unwrap();
    let recorded = sink.raw_size();

    match sink.compress(&mut c) {
        Err(SinkError::AlreadyCompressed(n)) => assert_eq!(Some(n), recorded),
        other => panic!("expected AlreadyCompressed, got {:?}", other),
    }
    // raw_size не перезаписан.
    assert_eq!(sink.raw_size(), recorded);
}
