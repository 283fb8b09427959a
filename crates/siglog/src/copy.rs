//! File copy: rewrites a log by replaying reads into a fresh writer.
//!
//! Copying regenerates every summary level and index from the source
//! samples, which also compacts files whose chains grew interleaved.

use crate::def::{SignalKind, UtcEntry};
use crate::error::Result;
use crate::reader::Reader;
use crate::writer::Writer;
use std::path::Path;
use tracing::debug;

/// Copies the log at `src` to a new file at `dst`.
///
/// `progress` receives fractions in [0, 1]; `message` receives occasional
/// human-readable notes (e.g. a signal whose raw data was not stored).
pub fn copy<P: AsRef<Path>, Q: AsRef<Path>>(
    src: P,
    dst: Q,
    mut progress: Option<&mut dyn FnMut(f64)>,
    mut message: Option<&mut dyn FnMut(&str)>,
) -> Result<()> {
    let mut reader = Reader::open(src)?;
    let mut writer = Writer::open(dst)?;

    let mut report = |fraction: f64| {
        if let Some(cbk) = progress.as_mut() {
            cbk(fraction.clamp(0.0, 1.0));
        }
    };
    report(0.0);

    for source in reader.sources().to_vec() {
        if source.source_id == 0 {
            continue;
        }
        writer.source_def(&source)?;
    }
    let signals = reader.signals().to_vec();
    for def in &signals {
        if def.signal_id == 0 {
            continue;
        }
        writer.signal_def(def)?;
    }

    reader.user_data(|meta, storage_type, data| {
        writer.user_data(meta, storage_type, data).is_ok()
    })?;

    let total_samples: i64 = signals
        .iter()
        .filter(|d| d.kind == SignalKind::Fsr && d.signal_id != 0)
        .map(|d| reader.fsr_length(d.signal_id).unwrap_or(0))
        .sum();
    let mut copied_samples = 0i64;

    for def in &signals {
        if def.signal_id == 0 {
            continue;
        }
        let signal_id = def.signal_id;

        if def.kind == SignalKind::Fsr {
            let length = reader.fsr_length(signal_id)?;
            let block = def.samples_per_data as i64;
            let mut sample_id = def.sample_id_offset;
            let end = def.sample_id_offset + length;
            let mut data_stored = true;
            while sample_id < end {
                let n = block.min(end - sample_id);
                match reader.fsr(signal_id, sample_id, n) {
                    Ok(bytes) => {
                        writer.fsr(signal_id, sample_id, &bytes, n as u32)?;
                    }
                    Err(crate::error::LogError::Unsupported(_)) => {
                        data_stored = false;
                        break;
                    }
                    Err(e) => return Err(e),
                }
                sample_id += n;
                copied_samples += n;
                if total_samples > 0 {
                    report(copied_samples as f64 / total_samples as f64);
                }
            }
            if !data_stored {
                writer.fsr_omit_data(signal_id, true)?;
                if let Some(cbk) = message.as_mut() {
                    cbk(&format!(
                        "signal {signal_id}: raw data not stored in source, omitted in copy"
                    ));
                }
            }

            let mut anchors: Vec<UtcEntry> = Vec::new();
            reader.utc(signal_id, i64::MIN, |entries| {
                anchors.extend_from_slice(entries);
                true
            })?;
            for anchor in anchors {
                writer.utc(signal_id, anchor.sample_id, anchor.timestamp)?;
            }
        }

        let mut annotations = Vec::new();
        reader.annotations(signal_id, i64::MIN, |a| {
            annotations.push(a.clone());
            true
        })?;
        for a in annotations {
            writer.annotation(
                signal_id,
                a.timestamp,
                a.y,
                a.annotation_type,
                a.group_id,
                a.storage_type,
                &a.data,
            )?;
        }
    }

    // Global annotations (signal 0).
    let mut globals = Vec::new();
    reader.annotations(0, i64::MIN, |a| {
        globals.push(a.clone());
        true
    })?;
    for a in globals {
        writer.annotation(0, a.timestamp, a.y, a.annotation_type, a.group_id, a.storage_type, &a.data)?;
    }

    writer.close()?;
    report(1.0);
    debug!(samples = copied_samples, "copy complete");
    Ok(())
}
