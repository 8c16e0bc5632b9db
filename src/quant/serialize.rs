//! Persisted artifact for [`QuantizedWeight`]
//!
//! The file is a valid SafeTensors container, so generic tooling can inspect it:
//!
//! ```text
//! [8 bytes] header_size (little-endian u64)
//! [header_size bytes] JSON header, space-padded to a multiple of 8:
//!   - "__metadata__": bits, group_size, rows, cols, table_mode, format_version
//!   - "codes":  U32 [num_words]        packed code stream
//!   - "scales": F32 [rows, groups]     group scales
//!   - "table":  F32 [2^bits]           lookup table
//! [remaining bytes] raw little-endian tensor data
//! ```
//!
//! Codes, scales and table are stored verbatim, so a round trip reproduces
//! bit-identical dequantized values.

use super::format::{BitWidth, GroupSize};
use super::layout::PackedCodes;
use super::tables::{LookupTable, TableMode};
use super::tensor::QuantizedWeight;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Current artifact layout version
pub const FORMAT_VERSION: u32 = 1;

const METADATA_KEY: &str = "__metadata__";
const FORMAT_TAG: &str = "lutr";

#[derive(Debug, Serialize, Deserialize)]
struct TensorEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

fn format_err(reason: impl Into<String>) -> Error {
    Error::FormatError {
        reason: reason.into(),
    }
}

/// Serialize to an in-memory byte buffer.
pub fn to_bytes(weight: &QuantizedWeight) -> Result<Vec<u8>> {
    let words = weight.codes().words();
    let scales = weight.scales();
    let table = weight.table().values();

    let codes_len = words.len() * 4;
    let scales_len = scales.len() * 4;
    let table_len = table.len() * 4;

    let mut metadata = BTreeMap::new();
    metadata.insert("format", FORMAT_TAG.to_string());
    metadata.insert("format_version", FORMAT_VERSION.to_string());
    metadata.insert("bits", weight.bits().bits().to_string());
    metadata.insert("group_size", weight.group_size().get().to_string());
    metadata.insert("rows", weight.rows().to_string());
    metadata.insert("cols", weight.cols().to_string());
    metadata.insert(
        "table_mode",
        serde_json::to_string(&weight.table().mode()).map_err(|e| format_err(e.to_string()))?,
    );

    let mut header = serde_json::Map::new();
    header.insert(
        METADATA_KEY.into(),
        serde_json::to_value(&metadata).map_err(|e| format_err(e.to_string()))?,
    );
    let entries = [
        ("codes", "U32", vec![words.len()], 0, codes_len),
        (
            "scales",
            "F32",
            vec![weight.rows(), weight.groups_per_row()],
            codes_len,
            codes_len + scales_len,
        ),
        (
            "table",
            "F32",
            vec![table.len()],
            codes_len + scales_len,
            codes_len + scales_len + table_len,
        ),
    ];
    for (name, dtype, shape, start, end) in entries {
        let entry = TensorEntry {
            dtype: dtype.into(),
            shape,
            data_offsets: [start, end],
        };
        header.insert(
            name.into(),
            serde_json::to_value(entry).map_err(|e| format_err(e.to_string()))?,
        );
    }

    let mut header_bytes = serde_json::to_vec(&serde_json::Value::Object(header))
        .map_err(|e| format_err(e.to_string()))?;
    // Keep the data section 8-byte aligned
    while header_bytes.len() % 8 != 0 {
        header_bytes.push(b' ');
    }

    let mut out = Vec::with_capacity(8 + header_bytes.len() + codes_len + scales_len + table_len);
    out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    for v in scales.iter().chain(table) {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

/// Deserialize from a byte buffer produced by [`to_bytes`].
///
/// # Errors
///
/// `FormatError` for any structural problem: truncated buffer, bad header,
/// missing or inconsistent tensors, unsupported version.
pub fn from_bytes(bytes: &[u8]) -> Result<QuantizedWeight> {
    if bytes.len() < 8 {
        return Err(format_err("buffer shorter than the 8-byte header length"));
    }
    let mut len_buf = [0u8; 8];
    len_buf.copy_from_slice(&bytes[..8]);
    let header_size = u64::from_le_bytes(len_buf) as usize;
    let data_offset = 8usize
        .checked_add(header_size)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            format_err(format!(
                "header size {header_size} exceeds buffer size {}",
                bytes.len()
            ))
        })?;

    let header_str = std::str::from_utf8(&bytes[8..data_offset])
        .map_err(|e| format_err(format!("invalid UTF-8 in header: {e}")))?;
    let mut header: HashMap<String, serde_json::Value> = serde_json::from_str(header_str.trim_end())
        .map_err(|e| format_err(format!("JSON parse error: {e}")))?;

    let metadata: HashMap<String, String> = header
        .remove(METADATA_KEY)
        .ok_or_else(|| format_err("missing __metadata__"))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| format_err(format!("bad __metadata__: {e}")))
        })?;

    if meta(&metadata, "format")? != FORMAT_TAG {
        return Err(format_err(format!("not a {FORMAT_TAG} artifact")));
    }
    let version = meta_num(&metadata, "format_version")?;
    if version != FORMAT_VERSION as usize {
        return Err(format_err(format!(
            "unsupported format_version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let bits = u32::try_from(meta_num(&metadata, "bits")?)
        .map_err(|e| format_err(format!("metadata 'bits': {e}")))?;
    let bits = BitWidth::from_bits(bits).map_err(|e| format_err(e.to_string()))?;
    let group_size =
        GroupSize::new(meta_num(&metadata, "group_size")?).map_err(|e| format_err(e.to_string()))?;
    let rows = meta_num(&metadata, "rows")?;
    let cols = meta_num(&metadata, "cols")?;
    let mode: TableMode = serde_json::from_str(meta(&metadata, "table_mode")?)
        .map_err(|e| format_err(format!("metadata 'table_mode': {e}")))?;

    let data = &bytes[data_offset..];
    let (_, codes_raw) = take_tensor(&mut header, data, "codes", "U32")?;
    let (scales_shape, scales_raw) = take_tensor(&mut header, data, "scales", "F32")?;
    let (_, table_raw) = take_tensor(&mut header, data, "table", "F32")?;

    let groups = group_size.num_groups(cols);
    if scales_shape != [rows, groups] {
        return Err(format_err(format!(
            "scales shape {scales_shape:?} does not match [{rows}, {groups}]"
        )));
    }

    let words = read_u32(codes_raw);
    let scales = read_f32(scales_raw);
    let table_values = read_f32(table_raw);

    let numel = rows
        .checked_mul(cols)
        .ok_or_else(|| format_err(format!("shape [{rows}, {cols}] overflows")))?;
    let build = || -> Result<QuantizedWeight> {
        let codes = PackedCodes::from_words(words, bits, numel)?;
        let table = LookupTable::from_parts(bits, mode, table_values)?;
        QuantizedWeight::from_parts(codes, scales, table, rows, cols, group_size)
    };
    build().map_err(|e| match e {
        Error::FormatError { .. } => e,
        other => format_err(other.to_string()),
    })
}

/// Write an artifact to disk.
pub fn save<P: AsRef<Path>>(weight: &QuantizedWeight, path: P) -> Result<()> {
    let bytes = to_bytes(weight)?;
    std::fs::write(path.as_ref(), bytes)?;
    log::debug!(
        "saved {:?} quantized weight to {}",
        weight.shape(),
        path.as_ref().display()
    );
    Ok(())
}

/// Read an artifact from disk.
pub fn load<P: AsRef<Path>>(path: P) -> Result<QuantizedWeight> {
    let bytes = std::fs::read(path.as_ref())?;
    from_bytes(&bytes)
}

fn meta<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    metadata
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| format_err(format!("metadata missing '{key}'")))
}

fn meta_num(metadata: &HashMap<String, String>, key: &str) -> Result<usize> {
    meta(metadata, key)?
        .parse::<usize>()
        .map_err(|e| format_err(format!("metadata '{key}': {e}")))
}

/// Remove tensor `name` from the header and return its shape and raw bytes.
fn take_tensor<'a>(
    header: &mut HashMap<String, serde_json::Value>,
    data: &'a [u8],
    name: &str,
    dtype: &str,
) -> Result<(Vec<usize>, &'a [u8])> {
    let value = header
        .remove(name)
        .ok_or_else(|| format_err(format!("tensor '{name}' not found")))?;
    let entry: TensorEntry = serde_json::from_value(value)
        .map_err(|e| format_err(format!("tensor '{name}': {e}")))?;
    if entry.dtype != dtype {
        return Err(format_err(format!(
            "tensor '{name}' has dtype {}, expected {dtype}",
            entry.dtype
        )));
    }
    let [start, end] = entry.data_offsets;
    let nbytes = entry
        .shape
        .iter()
        .try_fold(4usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| format_err(format!("tensor '{name}' shape {:?} overflows", entry.shape)))?;
    if start > end || end > data.len() || end - start != nbytes {
        return Err(format_err(format!(
            "tensor '{name}' data_offsets [{start}, {end}] inconsistent with shape {:?}",
            entry.shape
        )));
    }
    Ok((entry.shape, &data[start..end]))
}

fn read_u32(raw: &[u8]) -> Vec<u32> {
    raw.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn read_f32(raw: &[u8]) -> Vec<f32> {
    raw.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
