//! GGUF header parsing: magic, version, tensor/metadata counts, and the
//! key-value records needed to populate `GgufMetadata` (spec §4.3.1).
//!
//! This reads only the header and metadata key-value section, never tensor
//! data; decoding tensor payloads is out of scope for a catalog scanner.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::model::{bits_per_weight, is_chat_model, quantization_from_file_type, GgufMetadata};

const GGUF_MAGIC: u32 = 0x4655_4747; // "GGUF" little-endian
const MIN_SUPPORTED_VERSION: u32 = 3;

#[derive(Debug, Clone)]
enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Array(Vec<Value>),
}

impl Value {
    fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U8(v) => Some(*v as u32),
            Value::U16(v) => Some(*v as u32),
            Value::U32(v) => Some(*v),
            Value::I32(v) => Some(*v as u32),
            Value::I64(v) => Some(*v as u32),
            Value::U64(v) => Some(*v as u32),
            _ => None,
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            Value::I64(v) => Some(*v as u64),
            Value::U32(v) => Some(*v as u64),
            _ => None,
        }
    }

    fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            Value::F64(v) => Some(*v as f32),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Parse a GGUF file's header and metadata key-value table. Reads only as
/// much as needed to resolve the fields `GgufMetadata` exposes; a truncated
/// or non-GGUF file yields an error keyed to the offending path, not a panic.
pub fn parse_metadata(path: &Path) -> Result<GgufMetadata> {
    let file = File::open(path).map_err(|e| Error::GgufInvalid {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut reader = BufReader::new(file);

    let magic = read_u32(&mut reader, path)?;
    if magic != GGUF_MAGIC {
        return Err(Error::GgufInvalid {
            path: path.to_path_buf(),
            message: "bad magic".to_string(),
        });
    }
    let version = read_u32(&mut reader, path)?;
    if version < MIN_SUPPORTED_VERSION {
        return Err(Error::GgufInvalid {
            path: path.to_path_buf(),
            message: format!("unsupported GGUF version {version}"),
        });
    }

    let tensor_count = read_u64(&mut reader, path)?;
    let metadata_kv_count = read_u64(&mut reader, path)?;
    let _ = tensor_count;

    let mut kv: HashMap<String, Value> = HashMap::with_capacity(metadata_kv_count as usize);
    for _ in 0..metadata_kv_count {
        let key = read_string(&mut reader, path)?;
        let value = read_value(&mut reader, path)?;
        kv.insert(key, value);
    }

    let architecture = kv.get("general.architecture").and_then(Value::as_str).map(str::to_string);
    let lookup = |suffix: &str| -> Option<&Value> {
        if let Some(arch) = &architecture {
            if let Some(v) = kv.get(&format!("{arch}.{suffix}")) {
                return Some(v);
            }
        }
        kv.get(&format!("llama.{suffix}"))
    };

    let name = kv.get("general.name").and_then(Value::as_str).map(str::to_string);
    let file_type = kv.get("general.file_type").and_then(Value::as_u32);
    let quantization = file_type.map(quantization_from_file_type);
    let resolved_name = name.clone().unwrap_or_default();
    let chat_marker = resolved_name.to_string()
        + path.file_stem().and_then(|s| s.to_str()).unwrap_or("");

    Ok(GgufMetadata {
        name: name.clone(),
        architecture: architecture.clone(),
        bits_per_weight: quantization.as_deref().map(bits_per_weight),
        quantization,
        file_type,
        parameter_count: lookup("parameter_count").and_then(Value::as_u64),
        context_length: lookup("context_length").and_then(Value::as_u32),
        embedding_length: lookup("embedding_length").and_then(Value::as_u32),
        block_count: lookup("block_count").and_then(Value::as_u32),
        head_count: lookup("attention.head_count").and_then(Value::as_u32),
        head_count_kv: lookup("attention.head_count_kv").and_then(Value::as_u32),
        rope_freq_base: lookup("rope.freq_base").and_then(Value::as_f32),
        rope_dimension_count: lookup("rope.dimension_count").and_then(Value::as_u32),
        tokenizer_model: kv.get("tokenizer.ggml.model").and_then(Value::as_str).map(str::to_string),
        bos_token_id: kv.get("tokenizer.ggml.bos_token_id").and_then(Value::as_u32),
        eos_token_id: kv.get("tokenizer.ggml.eos_token_id").and_then(Value::as_u32),
        pad_token_id: kv.get("tokenizer.ggml.padding_token_id").and_then(Value::as_u32),
        unk_token_id: kv.get("tokenizer.ggml.unknown_token_id").and_then(Value::as_u32),
        vocab_size: lookup("vocab_size").and_then(Value::as_u32),
        file_size: Some(file_size),
        model_size: None,
        is_chat_model: is_chat_model(&chat_marker),
    })
}

fn read_u32(r: &mut impl Read, path: &Path) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|_| truncated(path))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32(r: &mut impl Read, path: &Path) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|_| truncated(path))?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read, path: &Path) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|_| truncated(path))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read, path: &Path) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|_| truncated(path))?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f32(r: &mut impl Read, path: &Path) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|_| truncated(path))?;
    Ok(f32::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read, path: &Path) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|_| truncated(path))?;
    Ok(f64::from_le_bytes(buf))
}

fn read_u8(r: &mut impl Read, path: &Path) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(|_| truncated(path))?;
    Ok(buf[0])
}

fn read_string(r: &mut impl Read, path: &Path) -> Result<String> {
    let len = read_u64(r, path)?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).map_err(|_| truncated(path))?;
    String::from_utf8(buf).map_err(|e| Error::GgufInvalid {
        path: path.to_path_buf(),
        message: format!("non-utf8 string: {e}"),
    })
}

fn read_value(r: &mut impl Read, path: &Path) -> Result<Value> {
    let type_id = read_u32(r, path)?;
    read_value_of_type(r, path, type_id)
}

fn read_value_of_type(r: &mut impl Read, path: &Path, type_id: u32) -> Result<Value> {
    Ok(match type_id {
        0 => Value::U8(read_u8(r, path)?),
        1 => Value::I8(read_u8(r, path)? as i8),
        2 => Value::U16({
            let mut buf = [0u8; 2];
            r.read_exact(&mut buf).map_err(|_| truncated(path))?;
            u16::from_le_bytes(buf)
        }),
        3 => Value::I16({
            let mut buf = [0u8; 2];
            r.read_exact(&mut buf).map_err(|_| truncated(path))?;
            i16::from_le_bytes(buf)
        }),
        4 => Value::U32(read_u32(r, path)?),
        5 => Value::I32(read_i32(r, path)?),
        6 => Value::F32(read_f32(r, path)?),
        7 => Value::Bool(read_u8(r, path)? != 0),
        8 => Value::String(read_string(r, path)?),
        9 => {
            let elem_type = read_u32(r, path)?;
            let count = read_u64(r, path)?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(read_value_of_type(r, path, elem_type)?);
            }
            Value::Array(items)
        }
        10 => Value::U64(read_u64(r, path)?),
        11 => Value::I64(read_i64(r, path)?),
        12 => Value::F64(read_f64(r, path)?),
        other => {
            return Err(Error::GgufInvalid {
                path: path.to_path_buf(),
                message: format!("unknown metadata value type {other}"),
            })
        }
    })
}

fn truncated(path: &Path) -> Error {
    Error::GgufTruncated { path: path.to_path_buf() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_minimal_gguf(path: &Path, arch: &str, name: &str, file_type: u32) {
        let mut buf = Vec::new();
        buf.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes()); // version
        buf.extend_from_slice(&0u64.to_le_bytes()); // tensor_count
        buf.extend_from_slice(&3u64.to_le_bytes()); // metadata_kv_count

        write_kv_string(&mut buf, "general.architecture", arch);
        write_kv_string(&mut buf, "general.name", name);
        write_kv_u32(&mut buf, "general.file_type", file_type);

        std::fs::write(path, buf).unwrap();
    }

    fn write_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn write_kv_string(buf: &mut Vec<u8>, key: &str, value: &str) {
        write_string(buf, key);
        buf.extend_from_slice(&8u32.to_le_bytes());
        write_string(buf, value);
    }

    fn write_kv_u32(buf: &mut Vec<u8>, key: &str, value: u32) {
        write_string(buf, key);
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn test_parse_minimal_header() {
        let dir = std::env::temp_dir().join(format!("shepherd-gguf-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model-instruct.gguf");
        write_minimal_gguf(&path, "llama", "TestModel-Instruct", 15);

        let meta = parse_metadata(&path).unwrap();
        assert_eq!(meta.architecture.as_deref(), Some("llama"));
        assert_eq!(meta.name.as_deref(), Some("TestModel-Instruct"));
        assert_eq!(meta.quantization.as_deref(), Some("Q4_K_M"));
        assert!(meta.is_chat_model);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let dir = std::env::temp_dir().join(format!("shepherd-gguf-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("not-gguf.gguf");
        std::fs::write(&path, b"not a gguf file at all").unwrap();

        let err = parse_metadata(&path).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::GgufInvalid);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_parse_rejects_truncated_file() {
        let dir = std::env::temp_dir().join(format!("shepherd-gguf-trunc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("truncated.gguf");
        let mut buf = Vec::new();
        buf.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        std::fs::write(&path, buf).unwrap();

        let err = parse_metadata(&path).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::GgufTruncated);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
