// Round-trip компрессии: zstd-компрессор + парный decompress() возвращают
// исходные байты в точности; пустой вход сжимается успешно.

use oorandom::Rand64;

use mksnap::{decompress, Compressor, IdentityCompressor, ZstdCompressor};

#[test]
fn zstd_roundtrip_compressible_payload() {
    // Повторяющиеся байты: сжатый результат обязан быть меньше исходного.
    let data: Vec<u8> = (0..64 * 1024).map(|i| ((i / 512) & 0xFF) as u8).collect();
    let mut c = ZstdCompressor::new();
    c.compress(&data).unwrap();
    assert!(c.output().len() < data.len());

    let back = decompress(c.output(), data.len()).unwrap();
    assert_eq!(back, data);
}

#[test]
fn zstd_roundtrip_incompressible_payload() {
    // Псевдослучайный вход: сжатие может раздуть результат, но round-trip
    // обязан сойтись, а рабочий буфер — вместить расширение.
    let mut rng = Rand64::new(0xFACE_FEED);
    let data: Vec<u8> = (0..32 * 1024).map(|_| (rng.rand_u64() & 0xFF) as u8).collect();

    let mut c = ZstdCompressor::new();
    c.compress(&data).unwrap();
    let back = decompress(c.output(), data.len()).unwrap();
    assert_eq!(back, data);
}

#[test]
fn zstd_empty_input_succeeds() {
    let mut c = ZstdCompressor::new();
    c.compress(&[]).unwrap();
    // Пустой вход дает служебный фрейм; round-trip в пустой буфер.
    let back = decompress(c.output(), 0).unwrap();
    assert!(back.is_empty());
}

#[test]
fn zstd_roundtrip_randomized_sizes() {
    let mut rng = Rand64::new(0xAB_2026);
    for _ in 0..25 {
        let n = rng.rand_range(0..4096) as usize;
        let data: Vec<u8> = (0..n).map(|_| (rng.rand_u64() & 0x0F) as u8).collect();
        let mut c = ZstdCompressor::new();
        c.compress(&data).unwrap();
        let back = decompress(c.output(), n).unwrap();
        assert_eq!(back, data, "roundtrip mismatch at n={}", n);
    }
}

#[test]
fn compressor_does_not_mutate_its_input() {
    let data = vec![7u8; 1000];
    let snapshot = data.clone();
    let mut c = ZstdCompressor::new();
    c.compress(&data).unwrap();
    assert_eq!(data, snapshot);

    let mut id = IdentityCompressor::new();
    id.compress(&data).unwrap();
    assert_eq!(data, snapshot);
    assert_eq!(id.output(), &snapshot[..]);
}

#[test]
fn decompress_rejects_wrong_raw_size() {
    let data = b"sized exactly as recorded, not otherwise".to_vec();
    let mut c = ZstdCompressor::new();
    c.compress(&data).unwrap();
    // raw_size больше фактического: декомпрессия обязана отказать, а не
    // молча вернуть буфер с мусорным хвостом.
    assert!(decompress(c.output(), data.len() + 1).is_err());
}
