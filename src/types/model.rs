//! Catalog types: `Model`, `ModelStatus`, GGUF-derived `Metadata` (spec §3, §4.3.1).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a catalog entry (spec §3 Model lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatusState {
    Discovered,
    Loading,
    Loaded,
    Unloading,
    Failed,
}

/// Live load state for a catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub state: ModelStatusState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}

impl Default for ModelStatus {
    fn default() -> Self {
        Self {
            state: ModelStatusState::Discovered,
            port: None,
            process_id: None,
            ctx_size: None,
            last_error: None,
            loaded_at: None,
        }
    }
}

/// A catalog entry: one model, possibly backed by a multi-file shard set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Stable hash over the canonical file path(s).
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    pub path: PathBuf,
    pub path_prefix: PathBuf,
    /// Representative file's size in bytes.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_files: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mmproj_path: Option<PathBuf>,
    #[serde(default)]
    pub favourite: bool,
    #[serde(default)]
    pub metadata: GgufMetadata,
    pub scanned_at: DateTime<Utc>,
}

impl Model {
    /// Sum of all bytes backing this catalog entry (shard set aware).
    pub fn effective_size(&self) -> u64 {
        self.total_size.unwrap_or(self.size)
    }

    pub fn is_shard_set(&self) -> bool {
        self.shard_count.map(|c| c > 1).unwrap_or(false)
    }
}

/// Metadata extracted from a GGUF header (spec §4.3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GgufMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    /// Quantization string resolved from the fixed `fileType` table (e.g. "Q4_K_M").
    #[serde(default)]
    pub quantization: Option<String>,
    #[serde(default)]
    pub file_type: Option<u32>,
    #[serde(default)]
    pub parameter_count: Option<u64>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub embedding_length: Option<u32>,
    #[serde(default)]
    pub block_count: Option<u32>,
    #[serde(default)]
    pub head_count: Option<u32>,
    #[serde(default)]
    pub head_count_kv: Option<u32>,
    #[serde(default)]
    pub rope_freq_base: Option<f32>,
    #[serde(default)]
    pub rope_dimension_count: Option<u32>,
    #[serde(default)]
    pub tokenizer_model: Option<String>,
    #[serde(default)]
    pub bos_token_id: Option<u32>,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
    #[serde(default)]
    pub pad_token_id: Option<u32>,
    #[serde(default)]
    pub unk_token_id: Option<u32>,
    #[serde(default)]
    pub vocab_size: Option<u32>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub model_size: Option<u64>,
    #[serde(default)]
    pub bits_per_weight: Option<f32>,
    /// Heuristic: model name contains a chat/instruct-style marker.
    #[serde(default)]
    pub is_chat_model: bool,
}

/// Resolve a GGUF `fileType` code to its quantization string (spec §4.3.1).
/// Unknown codes render as `Type_<n>`.
pub fn quantization_from_file_type(file_type: u32) -> String {
    match file_type {
        0 => "F32".to_string(),
        1 => "F16".to_string(),
        2 => "Q4_0".to_string(),
        3 => "Q4_1".to_string(),
        7 => "Q8_0".to_string(),
        8 => "Q5_0".to_string(),
        9 => "Q5_1".to_string(),
        10 => "Q2_K".to_string(),
        11 => "Q3_K_S".to_string(),
        12 => "Q3_K_M".to_string(),
        13 => "Q3_K_L".to_string(),
        14 => "Q4_K_S".to_string(),
        15 => "Q4_K_M".to_string(),
        16 => "Q5_K_S".to_string(),
        17 => "Q5_K_M".to_string(),
        18 => "Q6_K".to_string(),
        19 => "IQ2_XXS".to_string(),
        20 => "IQ2_XS".to_string(),
        21 => "Q2_K_S".to_string(),
        22 => "IQ3_XS".to_string(),
        23 => "IQ3_XXS".to_string(),
        24 => "IQ1_S".to_string(),
        25 => "IQ4_NL".to_string(),
        26 => "IQ3_S".to_string(),
        27 => "IQ3_M".to_string(),
        28 => "IQ2_S".to_string(),
        29 => "IQ2_M".to_string(),
        30 => "IQ4_XS".to_string(),
        31 => "IQ1_M".to_string(),
        32 => "BF16".to_string(),
        41 => "MXFP4".to_string(),
        n => format!("Type_{n}"),
    }
}

/// Approximate bits-per-weight for a resolved quantization string.
pub fn bits_per_weight(quant: &str) -> f32 {
    match quant {
        "F32" => 32.0,
        "F16" | "BF16" => 16.0,
        "Q8_0" => 8.0,
        "Q6_K" => 6.5,
        "Q5_K_M" | "Q5_K_S" | "Q5_0" | "Q5_1" => 5.5,
        "Q4_K_M" | "Q4_K_S" | "IQ4_NL" | "IQ4_XS" | "MXFP4" => 4.5,
        "Q4_0" | "Q4_1" => 4.0,
        "Q3_K_M" | "Q3_K_S" | "Q3_K_L" | "IQ3_S" | "IQ3_M" | "IQ3_XS" | "IQ3_XXS" => 3.5,
        "Q2_K" | "Q2_K_S" | "IQ2_S" | "IQ2_M" | "IQ2_XS" | "IQ2_XXS" => 2.5,
        "IQ1_S" | "IQ1_M" => 1.5,
        _ => 4.5,
    }
}

/// Heuristic for `isChatModel` (spec §4.3.1): case-insensitive marker match in the model name.
pub fn is_chat_model(name: &str) -> bool {
    const MARKERS: [&str; 7] = ["chat", "instruct", "sft", "conversation", "dialogue", "lora", "adapter"];
    let lower = name.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}
