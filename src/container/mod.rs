//! Binary container format (§4.5): magic, version, flags, a postcard-encoded
//! body (header / template table / per-template column blocks / metadata
//! indexes), and a trailing CRC32 over the body bytes. Optionally
//! entropy-coded as one final pass over the whole body (§4.4a).
//!
//! The body carries two metadata indexes alongside the column blocks
//! (§3 "Compressed artifact"): `template_index` (template→logid) and
//! `severity_index` (severity→logid). Per-column timestamp/numeric min/max
//! lives on `EncodedColumn` itself. The query engine resolves template and
//! severity predicates from these indexes without decoding any column, and
//! prunes timestamp-range predicates by min/max before decoding (§4.6,
//! §8 property 6).
//!
//! Layout on disk, all integers little-endian:
//!
//! ```text
//! [0..4)   magic "LPR1"
//! [4..6)   format version (u16)
//! [6..8)   flags (u16, see `Flags`)
//! [8..12)  payload length in bytes (u32)
//! [12..16) crc32 of the payload bytes (u32)
//! [16..)   payload (postcard body, optionally brotli-compressed)
//! ```
//!
//! The 16-byte header keeps the payload 8-byte aligned for `memmap2`-mapped
//! reads (§4.5 expansion).

pub mod entropy;

use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use bitflags::bitflags;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::column::{decode_column, Codec, EncodedColumn};
use crate::error::ContainerError;
use crate::semantic::SemanticType;
use crate::template::Template;
use entropy::{BrotliCodec, EntropyCodec};

pub const MAGIC: [u8; 4] = *b"LPR1";
pub const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u16 {
        const ENTROPY_CODED = 0b0000_0001;
        /// At least one column carries a usable timestamp min/max (§3
        /// "Compressed artifact" metadata indexes).
        const HAS_TIMESTAMP_INDEX = 0b0000_0010;
        /// `ContainerBody::severity_index` is non-empty.
        const HAS_SEVERITY_INDEX = 0b0000_0100;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ContainerBody {
    log_count: u64,
    templates: Vec<Template>,
    /// Template id for each log, in log-id order; `columns[t]` rows line up
    /// with the subsequence of this array equal to `t`, in the same order.
    log_template_ids: Vec<u32>,
    columns: Vec<Vec<EncodedColumn>>,
    /// `template→logid` index (§3, §4.5): log ids carrying each template,
    /// ascending. `template_index[t]` is the row order for `columns[t]`.
    template_index: Vec<Vec<u64>>,
    /// `severity→logid` index (§3, §4.5): rendered severity value to the
    /// ascending log ids whose severity column holds that value, across
    /// every template. Empty when no template has a severity column.
    severity_index: HashMap<String, Vec<u64>>,
}

/// Groups `log_template_ids` by template id, without assuming the input is
/// already sorted by template.
fn build_template_index(log_template_ids: &[u32], template_count: usize) -> Vec<Vec<u64>> {
    let mut index = vec![Vec::new(); template_count];
    for (log_id, &template_id) in log_template_ids.iter().enumerate() {
        index[template_id as usize].push(log_id as u64);
    }
    index
}

/// Builds the severity→logid index by decoding every severity column once
/// at write time, so query time never has to decode a severity column at
/// all (§4.6 "severity in {S...} — resolved via the severity index").
fn build_severity_index(
    columns: &[Vec<EncodedColumn>],
    template_index: &[Vec<u64>],
) -> Result<HashMap<String, Vec<u64>>, ContainerError> {
    let mut index: HashMap<String, Vec<u64>> = HashMap::new();
    for (template_id, template_columns) in columns.iter().enumerate() {
        for column in template_columns {
            if column.semantic_type != SemanticType::Severity {
                continue;
            }
            let decoded = decode_column(column).map_err(ContainerError::Encode)?;
            let log_ids = &template_index[template_id];
            for (row, value) in decoded.iter().enumerate() {
                index.entry(value.render()).or_default().push(log_ids[row]);
            }
        }
    }
    for ids in index.values_mut() {
        ids.sort_unstable();
    }
    Ok(index)
}

/// Everything needed to write or query a compressed artifact, decoded once
/// at open time.
pub struct Container {
    pub log_count: u64,
    pub templates: Vec<Template>,
    log_template_ids: Vec<u32>,
    columns: Vec<Vec<EncodedColumn>>,
    template_index: Vec<Vec<u64>>,
    severity_index: HashMap<String, Vec<u64>>,
    /// Keeps the backing mmap alive for the lifetime of the container when
    /// opened read-only; unused once the body has been deserialized, but
    /// kept so the mapping doesn't get dropped mid-read on some platforms.
    _mmap: Option<Mmap>,
}

impl Container {
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn template_id_for_log(&self, log_id: u64) -> Option<u32> {
        self.log_template_ids.get(log_id as usize).copied()
    }

    pub fn log_template_ids(&self) -> &[u32] {
        &self.log_template_ids
    }

    pub fn columns_for_template(&self, template_id: u32) -> &[EncodedColumn] {
        self.columns
            .get(template_id as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Log ids carrying `template_id`, ascending — a direct index lookup,
    /// not a scan (§8 property 6, template predicate pushdown).
    pub fn log_ids_for_template(&self, template_id: u32) -> &[u64] {
        self.template_index
            .get(template_id as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Log ids whose severity column holds `value`, ascending, without
    /// decoding anything (§8 property 6, severity predicate pushdown).
    pub fn log_ids_for_severity(&self, value: &str) -> Option<&[u64]> {
        self.severity_index.get(value).map(Vec::as_slice)
    }

    pub fn severity_values(&self) -> impl Iterator<Item = &str> {
        self.severity_index.keys().map(String::as_str)
    }

    /// Row index of `log_id` within its template's column arrays: its
    /// position in the ascending per-template log-id index.
    pub fn row_index_for_log(&self, log_id: u64) -> Option<(u32, usize)> {
        let template_id = self.template_id_for_log(log_id)?;
        let row = self.log_ids_for_template(template_id).binary_search(&log_id).ok()?;
        Some((template_id, row))
    }
}

/// Serializes templates/assignments/columns into artifact bytes (header +
/// optionally entropy-coded postcard body), without touching the
/// filesystem. [`write_container`] is a thin wrapper around this for the
/// common file-backed case; [`crate::engine::compress`] uses this directly
/// to hand back in-memory artifact bytes (§6 "compress").
pub fn build_artifact_bytes(
    templates: Vec<Template>,
    log_template_ids: Vec<u32>,
    columns: Vec<Vec<EncodedColumn>>,
    entropy_level: Option<u8>,
) -> Result<Vec<u8>, ContainerError> {
    let template_index = build_template_index(&log_template_ids, templates.len());
    let severity_index = build_severity_index(&columns, &template_index)?;

    let mut flags = Flags::empty();
    if !severity_index.is_empty() {
        flags |= Flags::HAS_SEVERITY_INDEX;
    }
    if columns
        .iter()
        .flatten()
        .any(|c| matches!(c.codec, Codec::TimestampDeltaVarint(_)) && c.min_max.is_some())
    {
        flags |= Flags::HAS_TIMESTAMP_INDEX;
    }

    let body = ContainerBody {
        log_count: log_template_ids.len() as u64,
        templates,
        log_template_ids,
        columns,
        template_index,
        severity_index,
    };

    let serialized = postcard::to_allocvec(&body)?;

    let (payload, flags) = match entropy_level {
        Some(level) => (BrotliCodec.compress(level, &serialized), flags | Flags::ENTROPY_CODED),
        None => (serialized, flags),
    };

    let crc = crc32fast::hash(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&flags.bits().to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&payload);

    Ok(out)
}

/// Writes a complete artifact to `path` atomically: builds the file at
/// `<path>.tmp-<pid>` then renames into place (§5 expansion), so a reader
/// never observes a partially written container.
pub fn write_container(
    path: &Path,
    templates: Vec<Template>,
    log_template_ids: Vec<u32>,
    columns: Vec<Vec<EncodedColumn>>,
    entropy_level: Option<u8>,
) -> Result<(), ContainerError> {
    let bytes = build_artifact_bytes(templates, log_template_ids, columns, entropy_level)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    let tmp_path = std::path::PathBuf::from(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    Ok(())
}

/// Opens an artifact read-only via `memmap2`, validates the framing, and
/// eagerly decodes the body (§4.6 "open").
pub fn open_container(path: &Path) -> Result<Container, ContainerError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < HEADER_LEN {
        return Err(ContainerError::TruncatedSection {
            name: "header",
            expected: HEADER_LEN,
            found: mmap.len(),
        });
    }

    let mut found_magic = [0u8; 4];
    found_magic.copy_from_slice(&mmap[0..4]);
    if found_magic != MAGIC {
        return Err(ContainerError::BadMagic {
            expected: MAGIC,
            found: found_magic,
        });
    }

    let version = u16::from_le_bytes([mmap[4], mmap[5]]);
    if version > FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion {
            found: version,
            max_supported: FORMAT_VERSION,
        });
    }

    let flags = Flags::from_bits_truncate(u16::from_le_bytes([mmap[6], mmap[7]]));
    let payload_len = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]) as usize;
    let expected_crc = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]);

    let payload = mmap
        .get(HEADER_LEN..HEADER_LEN + payload_len)
        .ok_or(ContainerError::TruncatedSection {
            name: "payload",
            expected: payload_len,
            found: mmap.len().saturating_sub(HEADER_LEN),
        })?;

    if crc32fast::hash(payload) != expected_crc {
        return Err(ContainerError::CrcMismatch);
    }

    let decoded = if flags.contains(Flags::ENTROPY_CODED) {
        BrotliCodec
            .decompress(payload)
            .map_err(ContainerError::Encode)?
    } else {
        payload.to_vec()
    };

    let body: ContainerBody = postcard::from_bytes(&decoded)?;

    Ok(Container {
        log_count: body.log_count,
        templates: body.templates,
        log_template_ids: body.log_template_ids,
        columns: body.columns,
        template_index: body.template_index,
        severity_index: body.severity_index,
        _mmap: Some(mmap),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::encode_column;
    use crate::semantic::SemanticType;
    use crate::template::Slot;
    use tempfile::tempdir;

    fn sample_template(id: u32) -> Template {
        Template {
            template_id: id,
            slots: vec![
                Slot::Literal {
                    text: "user".into(),
                    tag: crate::token::TypeTag::Word,
                },
                Slot::Variable {
                    semantic_type: SemanticType::NumericId,
                    column_id: 0,
                },
            ],
            match_count: 3,
            example_log_id: 0,
            is_synthetic: false,
        }
    }

    #[test]
    fn write_then_open_round_trips_without_entropy_coding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.lpr");

        let column = encode_column(0, SemanticType::NumericId, &["1".into(), "2".into(), "3".into()])
            .unwrap();
        write_container(
            &path,
            vec![sample_template(0)],
            vec![0, 0, 0],
            vec![vec![column]],
            None,
        )
        .unwrap();

        let container = open_container(&path).unwrap();
        assert_eq!(container.log_count, 3);
        assert_eq!(container.templates().len(), 1);
        assert_eq!(container.template_id_for_log(1), Some(0));
        assert_eq!(container.row_index_for_log(2), Some((0, 2)));
    }

    #[test]
    fn write_then_open_round_trips_with_entropy_coding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.lpr");

        let column = encode_column(0, SemanticType::NumericId, &["1".into(), "2".into(), "3".into()])
            .unwrap();
        write_container(
            &path,
            vec![sample_template(0)],
            vec![0, 0, 0],
            vec![vec![column]],
            Some(9),
        )
        .unwrap();

        let container = open_container(&path).unwrap();
        assert_eq!(container.log_count, 3);
        assert_eq!(container.columns_for_template(0).len(), 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.lpr");
        fs::write(&path, b"not-a-container-at-all").unwrap();
        let err = open_container(&path).unwrap_err();
        assert!(matches!(err, ContainerError::BadMagic { .. }));
    }

    #[test]
    fn corrupted_payload_fails_crc_check() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.lpr");
        let column = encode_column(0, SemanticType::NumericId, &["1".into()]).unwrap();
        write_container(&path, vec![sample_template(0)], vec![0], vec![vec![column]], None).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = open_container(&path).unwrap_err();
        assert!(matches!(err, ContainerError::CrcMismatch));
    }
}
