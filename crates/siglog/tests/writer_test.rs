//! Writer façade integration tests: sources, signals, annotations, user
//! data and UTC anchors, including the ordering and duplicate rules.

use siglog::def::{AnnotationType, SignalDef, SignalKind, SourceDef, StorageType, UtcEntry};
use siglog::{time, DataType, LogError, Reader, Writer};
use tempfile::TempDir;

const USER_DATA_1: [u8; 11] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
const STRING_1: &str = "hello world";
const JSON_1: &str = "{\"hello\": \"world\"}";

fn source(id: u16) -> SourceDef {
    SourceDef {
        source_id: id,
        name: format!("source {id}"),
        vendor: format!("vendor {id}"),
        model: format!("model {id}"),
        version: format!("version {id}"),
        serial_number: format!("serial_number {id}"),
    }
}

fn signal_5() -> SignalDef {
    SignalDef {
        signal_id: 5,
        source_id: 3,
        kind: SignalKind::Fsr,
        data_type: DataType::F32,
        sample_rate: 100_000,
        samples_per_data: 1000,
        sample_decimate_factor: 100,
        entries_per_summary: 200,
        summary_decimate_factor: 100,
        annotation_decimate_factor: 100,
        utc_decimate_factor: 100,
        name: "signal 5".into(),
        units: "A".into(),
        ..Default::default()
    }
}

fn signal_6_vsr() -> SignalDef {
    SignalDef {
        signal_id: 6,
        source_id: 3,
        kind: SignalKind::Vsr,
        data_type: DataType::F32,
        sample_rate: 0,
        name: "signal 6".into(),
        units: "V".into(),
        ..Default::default()
    }
}

#[test]
fn test_sources() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sources.sgl");
    let mut writer = Writer::open(&path).unwrap();
    writer.source_def(&source(3)).unwrap();
    writer.source_def(&source(1)).unwrap();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap();
    let sources = reader.sources();
    assert_eq!(3, sources.len());
    assert_eq!(0, sources[0].source_id);
    assert_eq!(1, sources[1].source_id);
    assert_eq!(3, sources[2].source_id);
    assert_eq!("source 1", sources[1].name);
    assert_eq!("vendor 1", sources[1].vendor);
    assert_eq!("model 1", sources[1].model);
    assert_eq!("version 1", sources[1].version);
    assert_eq!("serial_number 1", sources[1].serial_number);
    assert_eq!("source 3", sources[2].name);
}

#[test]
fn test_source_with_empty_strings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.sgl");
    let src = SourceDef {
        source_id: 1,
        name: "s".into(),
        serial_number: "serial_number".into(),
        ..Default::default()
    };
    let mut writer = Writer::open(&path).unwrap();
    writer.source_def(&src).unwrap();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap();
    let sources = reader.sources();
    assert_eq!(2, sources.len());
    assert_eq!("s", sources[1].name);
    assert_eq!("", sources[1].vendor);
    assert_eq!("", sources[1].model);
    assert_eq!("", sources[1].version);
    assert_eq!("serial_number", sources[1].serial_number);
}

#[test]
fn test_source_duplicate_and_reserved() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dup.sgl");
    let mut writer = Writer::open(&path).unwrap();
    writer.source_def(&source(1)).unwrap();
    assert!(matches!(
        writer.source_def(&source(1)),
        Err(LogError::AlreadyExists(_))
    ));
    assert!(matches!(
        writer.source_def(&source(0)),
        Err(LogError::ParameterInvalid(_))
    ));
    writer.close().unwrap();
}

#[test]
fn test_signals_aligned_and_sorted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("signals.sgl");
    let mut writer = Writer::open(&path).unwrap();
    writer.source_def(&source(3)).unwrap();
    writer.signal_def(&signal_6_vsr()).unwrap();
    writer.signal_def(&signal_5()).unwrap();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap();
    let signals = reader.signals();
    assert_eq!(3, signals.len());
    assert_eq!(0, signals[0].signal_id);
    assert_eq!(5, signals[1].signal_id);
    assert_eq!(6, signals[2].signal_id);
    assert_eq!(3, signals[1].source_id);
    assert_eq!(SignalKind::Fsr, signals[1].kind);
    assert_eq!(DataType::F32, signals[1].data_type);
    assert_eq!(100_000, signals[1].sample_rate);
    // Structural parameters come back aligned.
    assert_eq!(0x410, signals[1].samples_per_data);
    assert_eq!(0x68, signals[1].sample_decimate_factor);
    assert_eq!(200, signals[1].entries_per_summary);
    assert_eq!(100, signals[1].annotation_decimate_factor);
    assert_eq!(100, signals[1].utc_decimate_factor);
    assert_eq!("signal 5", signals[1].name);
    assert_eq!("A", signals[1].units);
    assert_eq!("signal 6", signals[2].name);
}

#[test]
fn test_signal_without_source() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nosource.sgl");
    let mut writer = Writer::open(&path).unwrap();
    assert!(matches!(
        writer.signal_def(&signal_6_vsr()),
        Err(LogError::NotFound(_))
    ));
    writer.close().unwrap();
}

#[test]
fn test_signal_duplicate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sigdup.sgl");
    let mut writer = Writer::open(&path).unwrap();
    writer.source_def(&source(3)).unwrap();
    writer.signal_def(&signal_6_vsr()).unwrap();
    assert!(matches!(
        writer.signal_def(&signal_6_vsr()),
        Err(LogError::AlreadyExists(_))
    ));
    writer.close().unwrap();
}

#[test]
fn test_signal_auto_defaults_accepted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auto.sgl");
    let mut writer = Writer::open(&path).unwrap();
    writer.source_def(&source(1)).unwrap();
    for (id, dt, name) in [(1u16, DataType::F32, "current"), (2, DataType::U1, "gpi[1]")] {
        writer
            .signal_def(&SignalDef {
                signal_id: id,
                source_id: 1,
                data_type: dt,
                sample_rate: 100_000,
                name: name.into(),
                ..Default::default()
            })
            .unwrap();
    }
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap();
    let sig = &reader.signals()[1];
    assert!(sig.samples_per_data >= sig.sample_decimate_factor);
    assert_eq!(0, sig.samples_per_data % sig.sample_decimate_factor);
    assert_eq!(0, sig.entries_per_summary % sig.summary_decimate_factor);
    assert_eq!(0, sig.sample_decimate_factor % 8);
}

#[test]
fn test_annotations_global_signal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("anno.sgl");
    let now = time::now();
    let mut writer = Writer::open(&path).unwrap();
    let ms = time::MILLISECOND;
    writer
        .annotation(0, now, f32::NAN, AnnotationType::Text, 0, StorageType::String, STRING_1.as_bytes())
        .unwrap();
    writer
        .annotation(0, now + ms, 1.0, AnnotationType::VerticalMarker, 1, StorageType::String, b"1")
        .unwrap();
    writer
        .annotation(0, now + 2 * ms, 2.0, AnnotationType::User, 2, StorageType::Binary, &USER_DATA_1)
        .unwrap();
    writer
        .annotation(0, now + 3 * ms, 3.0, AnnotationType::User, 3, StorageType::String, STRING_1.as_bytes())
        .unwrap();
    writer
        .annotation(0, now + 4 * ms, 4.0, AnnotationType::User, 4, StorageType::Json, JSON_1.as_bytes())
        .unwrap();
    writer.close().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    let mut got = Vec::new();
    reader
        .annotations(0, 0, |a| {
            got.push(a.clone());
            true
        })
        .unwrap();
    assert_eq!(5, got.len());
    assert_eq!(now, got[0].timestamp);
    assert!(got[0].y.is_nan());
    assert_eq!(AnnotationType::Text, got[0].annotation_type);
    assert_eq!(StorageType::String, got[0].storage_type);
    assert_eq!(STRING_1.as_bytes(), &got[0].data[..]);
    assert_eq!(AnnotationType::VerticalMarker, got[1].annotation_type);
    assert_eq!(1, got[1].group_id);
    assert_eq!(b"1", &got[1].data[..]);
    assert_eq!(StorageType::Binary, got[2].storage_type);
    assert_eq!(&USER_DATA_1[..], &got[2].data[..]);
    assert_eq!(StorageType::Json, got[4].storage_type);
    assert_eq!(JSON_1.as_bytes(), &got[4].data[..]);

    // Seek: only annotations at or after `from` are delivered.
    let mut later = Vec::new();
    reader
        .annotations(0, now + 4 * ms, |a| {
            later.push(a.timestamp);
            true
        })
        .unwrap();
    assert_eq!(vec![now + 4 * ms], later);

    // Early stop.
    let mut count = 0;
    reader
        .annotations(0, 0, |_| {
            count += 1;
            count < 2
        })
        .unwrap();
    assert_eq!(2, count);
}

#[test]
fn test_annotation_seek() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("seek.sgl");
    let mut writer = Writer::open(&path).unwrap();
    for ts in [0, 1, time::SECOND] {
        writer
            .annotation(0, ts, f32::NAN, AnnotationType::Text, 0, StorageType::String, STRING_1.as_bytes())
            .unwrap();
    }
    writer.close().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    let mut got = Vec::new();
    reader
        .annotations(0, time::SECOND, |a| {
            got.push(a.timestamp);
            true
        })
        .unwrap();
    assert_eq!(vec![time::SECOND], got);
}

#[test]
fn test_horizontal_markers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hmarker.sgl");
    let mut writer = Writer::open(&path).unwrap();
    writer
        .annotation(0, 0, 0.0, AnnotationType::HorizontalMarker, 0, StorageType::String, b"1a")
        .unwrap();
    writer
        .annotation(0, 0, 1.0, AnnotationType::HorizontalMarker, 1, StorageType::String, b"1b")
        .unwrap();
    writer.close().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    let mut got = Vec::new();
    reader
        .annotations(0, 0, |a| {
            got.push(a.clone());
            true
        })
        .unwrap();
    assert_eq!(2, got.len());
    assert_eq!(0.0, got[0].y);
    assert_eq!(1.0, got[1].y);
    assert_eq!(AnnotationType::HorizontalMarker, got[0].annotation_type);
    assert_eq!(1, got[1].group_id);
    assert_eq!(b"1b", &got[1].data[..]);
}

#[test]
fn test_annotation_undefined_signal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("annobad.sgl");
    let mut writer = Writer::open(&path).unwrap();
    assert!(matches!(
        writer.annotation(7, 0, 0.0, AnnotationType::Text, 0, StorageType::String, b"x"),
        Err(LogError::NotFound(_))
    ));
    writer.close().unwrap();
}

#[test]
fn test_user_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("userdata.sgl");
    let mut writer = Writer::open(&path).unwrap();
    writer.user_data(0x0123, StorageType::Binary, &USER_DATA_1).unwrap();
    writer.user_data(0x0bee, StorageType::String, STRING_1.as_bytes()).unwrap();
    writer.user_data(0x0abc, StorageType::Json, JSON_1.as_bytes()).unwrap();
    assert!(matches!(
        writer.user_data(0x1000, StorageType::Binary, b"x"),
        Err(LogError::ParameterInvalid(_))
    ));
    writer.close().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    let mut got: Vec<(u16, StorageType, Vec<u8>)> = Vec::new();
    reader
        .user_data(|meta, storage, data| {
            got.push((meta, storage, data.to_vec()));
            true
        })
        .unwrap();
    assert_eq!(3, got.len());
    assert_eq!((0x0123, StorageType::Binary), (got[0].0, got[0].1));
    assert_eq!(&USER_DATA_1[..], &got[0].2[..]);
    assert_eq!((0x0bee, StorageType::String), (got[1].0, got[1].1));
    assert_eq!(STRING_1.as_bytes(), &got[1].2[..]);
    assert_eq!((0x0abc, StorageType::Json), (got[2].0, got[2].1));
    assert_eq!(JSON_1.as_bytes(), &got[2].2[..]);
}

#[test]
fn test_utc_stream_and_seek() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("utc.sgl");
    let count = 510i64; // five full chunks of 100 plus a partial tail
    let mut writer = Writer::open(&path).unwrap();
    writer.source_def(&source(3)).unwrap();
    writer.signal_def(&signal_5()).unwrap();
    for i in 0..count {
        writer.utc(5, i * 10, i * time::SECOND).unwrap();
    }
    writer.close().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    assert_eq!(count, reader.tmap_length(5).unwrap());

    let collect_from = |reader: &mut Reader, from: i64| {
        let mut got: Vec<UtcEntry> = Vec::new();
        reader
            .utc(5, from, |entries| {
                got.extend_from_slice(entries);
                true
            })
            .unwrap();
        got
    };

    let all = collect_from(&mut reader, 0);
    assert_eq!(count as usize, all.len());
    for (i, e) in all.iter().enumerate() {
        assert_eq!(i as i64 * 10, e.sample_id);
        assert_eq!(i as i64 * time::SECOND, e.timestamp);
    }

    // Seek into the first chunk, to a chunk boundary, and mid-chunk.
    for from in [500i64, 1000, 1500] {
        let got = collect_from(&mut reader, from);
        assert_eq!(all.iter().filter(|e| e.sample_id >= from).count(), got.len(), "from {from}");
        assert_eq!(from, got[0].sample_id);
    }
}

#[test]
fn test_utc_duplicate_sample_id_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("utcdup.sgl");
    let mut writer = Writer::open(&path).unwrap();
    writer.source_def(&source(3)).unwrap();
    writer.signal_def(&signal_5()).unwrap();
    writer.utc(5, 0, 0).unwrap();
    writer.utc(5, 10, time::SECOND).unwrap();
    assert!(matches!(
        writer.utc(5, 10, 2 * time::SECOND),
        Err(LogError::ParameterInvalid(_))
    ));
    assert!(matches!(
        writer.utc(5, 5, 2 * time::SECOND),
        Err(LogError::ParameterInvalid(_))
    ));
    writer.utc(5, 11, 2 * time::SECOND).unwrap();
    writer.close().unwrap();

    let mut reader = Reader::open(&path).unwrap();
    assert_eq!(3, reader.tmap_length(5).unwrap());
}

#[test]
fn test_utc_undefined_signal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("utcbad.sgl");
    let mut writer = Writer::open(&path).unwrap();
    assert!(matches!(writer.utc(5, 0, 0), Err(LogError::NotFound(_))));
    writer.close().unwrap();
}
