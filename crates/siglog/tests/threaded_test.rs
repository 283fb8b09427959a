//! Threaded writer integration tests: end-to-end writes through the
//! command ring, flush semantics, error capture, and drop-on-overflow.

use siglog::def::{AnnotationType, SignalDef, SignalKind, SourceDef, StorageType};
use siglog::threaded::{ThreadedWriter, FLAG_DROP_ON_OVERFLOW};
use siglog::{DataType, LogError, Reader};
use tempfile::TempDir;

fn source_1() -> SourceDef {
    SourceDef {
        source_id: 1,
        name: "source 1".into(),
        ..Default::default()
    }
}

fn signal_1() -> SignalDef {
    SignalDef {
        signal_id: 1,
        source_id: 1,
        kind: SignalKind::Fsr,
        data_type: DataType::F32,
        sample_rate: 100_000,
        samples_per_data: 1000,
        sample_decimate_factor: 100,
        entries_per_summary: 200,
        summary_decimate_factor: 100,
        annotation_decimate_factor: 100,
        utc_decimate_factor: 100,
        name: "current".into(),
        units: "A".into(),
        ..Default::default()
    }
}

#[test]
fn test_threaded_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("threaded.sgl");
    let data: Vec<f32> = (0..50_000).map(|i| (i as f32 * 0.01).cos()).collect();

    let mut writer = ThreadedWriter::open(&path).unwrap();
    writer.source_def(&source_1()).unwrap();
    writer.signal_def(&signal_1()).unwrap();
    for (i, block) in data.chunks(1000).enumerate() {
        writer.fsr_f32(1, (i * 1000) as i64, block).unwrap();
    }
    writer.utc(1, 0, siglog::time::YEAR).unwrap();
    writer
        .annotation(1, 10, 0.5, AnnotationType::Text, 0, StorageType::String, b"spike")
        .unwrap();
    writer.user_data(7, StorageType::Binary, &[1, 2, 3]).unwrap();
    writer.flush().unwrap();
    writer.close().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    assert_eq!(50_000, reader.fsr_length(1).unwrap());
    assert_eq!(data, reader.fsr_f32(1, 0, 50_000).unwrap());
    assert_eq!(1, reader.tmap_length(1).unwrap());
    let mut annotations = 0;
    reader
        .annotations(1, 0, |_| {
            annotations += 1;
            true
        })
        .unwrap();
    assert_eq!(1, annotations);
}

#[test]
fn test_threaded_error_propagates_to_producer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("error.sgl");
    let mut writer = ThreadedWriter::open(&path).unwrap();
    // Signal 9 was never defined; the worker captures NotFound.
    writer.fsr_f32(9, 0, &[0.0; 16]).unwrap();
    assert!(matches!(writer.flush(), Err(LogError::NotFound(_))));
    // Subsequent submissions fail fast with the captured error.
    assert!(matches!(
        writer.fsr_f32(9, 16, &[0.0; 16]),
        Err(LogError::NotFound(_))
    ));
    assert!(matches!(writer.close(), Err(LogError::NotFound(_))));
}

#[test]
fn test_drop_on_overflow_never_drops_control() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("overflow.sgl");
    // A tiny ring so the producer can outrun the disk.
    let mut writer = ThreadedWriter::open_with_capacity(&path, 4).unwrap();
    writer.set_flags(FLAG_DROP_ON_OVERFLOW).unwrap();
    assert_eq!(FLAG_DROP_ON_OVERFLOW, writer.flags());

    writer.source_def(&source_1()).unwrap();
    writer.signal_def(&signal_1()).unwrap();

    let block = vec![1.0f32; 1000];
    let blocks = 500i64;
    for i in 0..blocks - 1 {
        writer.fsr_f32(1, i * 1000, &block).unwrap();
    }
    writer
        .annotation(1, 0, 0.0, AnnotationType::Text, 0, StorageType::String, b"end")
        .unwrap();
    // Clear the flag so the final block is guaranteed to arrive and pin
    // the full span.
    writer.set_flags(0).unwrap();
    writer.fsr_f32(1, (blocks - 1) * 1000, &block).unwrap();
    let dropped = writer.dropped();
    writer.close().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    // Dropped sample blocks become skip-fill; the span stays complete and
    // control messages (defs, annotation, flags) all arrived.
    assert_eq!(blocks * 1000, reader.fsr_length(1).unwrap());
    assert_eq!(2, reader.signals().len());
    let mut annotations = 0;
    reader
        .annotations(1, 0, |_| {
            annotations += 1;
            true
        })
        .unwrap();
    assert_eq!(1, annotations);

    let data = reader.fsr_f32(1, 0, blocks * 1000).unwrap();
    let nan_blocks = data.chunks(1000).filter(|c| c[0].is_nan()).count() as u64;
    assert_eq!(dropped, nan_blocks, "each dropped block reads back as fill");
    // Every block is either fully present or fully fill.
    for chunk in data.chunks(1000) {
        assert!(chunk.iter().all(|v| *v == 1.0) || chunk.iter().all(|v| v.is_nan()));
    }
}

#[test]
fn test_flush_waits_for_writes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flush.sgl");
    let mut writer = ThreadedWriter::open(&path).unwrap();
    writer.source_def(&source_1()).unwrap();
    writer.signal_def(&signal_1()).unwrap();
    writer.fsr_f32(1, 0, &[3.0f32; 2080]).unwrap();
    writer.flush().unwrap();

    // After flush, the flushed chunks are on disk even before close; the
    // file is not yet complete, so the reader takes the scan path.
    let mut reader = Reader::open(&path).unwrap();
    assert_eq!(2080, reader.fsr_length(1).unwrap());
    assert_eq!(vec![3.0f32; 2080], reader.fsr_f32(1, 0, 2080).unwrap());
    writer.close().unwrap();
}
