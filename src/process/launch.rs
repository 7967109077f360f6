//! Launch command synthesis (spec §4.2.1) and argv splitting (spec §4.2).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Exterior fields a caller sets when requesting a model load (spec §6/§4.2.1).
/// Only fields with non-zero/non-empty values are emitted onto the argv.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadRequest {
    pub model_id: String,
    pub model_path: PathBuf,

    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub threads: Option<u32>,
    #[serde(default)]
    pub gpu_layers: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub repeat_penalty: Option<f32>,
    #[serde(default)]
    pub n_predict: Option<i32>,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub mmproj_path: Option<PathBuf>,
    #[serde(default)]
    pub flash_attention: bool,
    #[serde(default)]
    pub no_mmap: bool,
    #[serde(default)]
    pub lock_memory: bool,
    #[serde(default)]
    pub no_webui: bool,
    #[serde(default)]
    pub enable_metrics: bool,
    #[serde(default)]
    pub chat_template_file: Option<PathBuf>,
    #[serde(default)]
    pub chat_template: Option<String>,
    #[serde(default)]
    pub disable_jinja: bool,
    #[serde(default)]
    pub context_shift: bool,
    #[serde(default)]
    pub u_batch_size: Option<u32>,
    #[serde(default)]
    pub parallel_slots: Option<u32>,
    #[serde(default)]
    pub kv_cache_type_k: Option<String>,
    #[serde(default)]
    pub kv_cache_type_v: Option<String>,
    /// Independent of `kv_cache_size` (spec §9A decision 2): emits `--kv-unified` with no value.
    #[serde(default)]
    pub kv_cache_unified: bool,
    /// Independent of `kv_cache_unified` (spec §9A decision 2): emits `--kv-cache-size N`.
    #[serde(default)]
    pub kv_cache_size: Option<u64>,
    #[serde(default)]
    pub slot_save_path: Option<PathBuf>,
    #[serde(default)]
    pub cache_ram: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub reranking: bool,
    #[serde(default)]
    pub min_p: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub custom_cmd: Option<String>,
    #[serde(default)]
    pub extra_params: Vec<String>,
}

/// Quote an argument if it contains whitespace, quotes, or backslashes,
/// escaping embedded `"` and `\` with a backslash (spec §4.2.1).
fn quote_if_needed(arg: &str) -> String {
    if arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        arg.to_string()
    }
}

/// Build `<binDir>/llama-server -m <modelPath> --port <p> --host 0.0.0.0 ...`.
pub fn synthesize_argv(req: &LoadRequest, bin_dir: &std::path::Path, port: u16) -> Vec<String> {
    let mut argv = vec![
        bin_dir.join("llama-server").to_string_lossy().into_owned(),
        "-m".to_string(),
        req.model_path.to_string_lossy().into_owned(),
        "--port".to_string(),
        port.to_string(),
        "--host".to_string(),
        "0.0.0.0".to_string(),
    ];

    macro_rules! push_val {
        ($flag:expr, $val:expr) => {
            if let Some(v) = &$val {
                argv.push($flag.to_string());
                argv.push(v.to_string());
            }
        };
    }

    push_val!("-c", req.ctx_size);
    push_val!("-b", req.batch_size);
    push_val!("-t", req.threads);
    push_val!("-ngl", req.gpu_layers);
    if let Some(t) = req.temperature {
        argv.push("--temp".to_string());
        argv.push(format!("{:.2}", t));
    }
    push_val!("--top-p", req.top_p);
    push_val!("--top-k", req.top_k);
    if let Some(r) = req.repeat_penalty {
        argv.push("--repeat-penalty".to_string());
        argv.push(format!("{:.2}", r));
    }
    push_val!("-n", req.n_predict);

    if !req.devices.is_empty() {
        argv.push("-dev".to_string());
        argv.push(req.devices.join(","));
        if req.devices.len() == 1 {
            argv.push("-sm".to_string());
            argv.push("none".to_string());
            argv.push("-mg".to_string());
            argv.push(req.devices[0].clone());
        }
    }

    if let Some(p) = &req.mmproj_path {
        argv.push("--mmproj".to_string());
        argv.push(p.to_string_lossy().into_owned());
    }

    if req.flash_attention {
        argv.push("-fa".to_string());
    }
    if req.no_mmap {
        argv.push("--no-mmap".to_string());
    }
    if req.lock_memory {
        argv.push("--mlock".to_string());
    }
    if req.no_webui {
        argv.push("--no-webui".to_string());
    }
    if req.enable_metrics {
        argv.push("--metrics".to_string());
    }

    if let Some(p) = &req.chat_template_file {
        argv.push("--chat-template-file".to_string());
        argv.push(p.to_string_lossy().into_owned());
    }
    if let Some(t) = &req.chat_template {
        argv.push("--chat-template".to_string());
        argv.push(t.clone());
    }
    if req.disable_jinja {
        argv.push("--no-jinja".to_string());
    }
    if req.context_shift {
        argv.push("--context-shift".to_string());
    }

    push_val!("--ubatch-size", req.u_batch_size);
    push_val!("--parallel", req.parallel_slots);
    push_val!("--kv-cache-type-k", req.kv_cache_type_k);
    push_val!("--kv-cache-type-v", req.kv_cache_type_v);

    if req.kv_cache_unified {
        argv.push("--kv-unified".to_string());
    }
    push_val!("--kv-cache-size", req.kv_cache_size);

    if let Some(p) = &req.slot_save_path {
        argv.push("--slot-save-path".to_string());
        argv.push(p.to_string_lossy().into_owned());
    }
    push_val!("--cache-ram", req.cache_ram);
    push_val!("--timeout", req.timeout);
    push_val!("--alias", req.alias);

    if req.reranking {
        argv.push("--reranking".to_string());
    }
    push_val!("--min-p", req.min_p);
    push_val!("--presence-penalty", req.presence_penalty);
    push_val!("--frequency-penalty", req.frequency_penalty);

    if let Some(cmd) = &req.custom_cmd {
        if let Ok(parts) = split_command_line(cmd) {
            argv.extend(parts);
        }
    }
    argv.extend(req.extra_params.iter().cloned());

    argv.iter().map(|s| quote_if_needed(s)).collect()
}

/// Split a command-line string into argv, honoring double quotes everywhere,
/// single quotes on non-Windows, and backslash escaping of quotes. Whitespace
/// outside quotes separates arguments. Empty input yields an empty argv
/// (spec §4.2).
pub fn split_command_line(input: &str) -> crate::error::Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_double = false;
    let mut in_single = false;
    let mut has_current = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_double || (!in_single) => {
                if let Some(&next) = chars.peek() {
                    if next == '"' || next == '\\' {
                        current.push(next);
                        chars.next();
                        has_current = true;
                        continue;
                    }
                }
                current.push(c);
                has_current = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_current = true;
            }
            '\'' if !in_double && !cfg!(windows) => {
                in_single = !in_single;
                has_current = true;
            }
            c if c.is_whitespace() && !in_double && !in_single => {
                if has_current {
                    args.push(std::mem::take(&mut current));
                    has_current = false;
                }
            }
            c => {
                current.push(c);
                has_current = true;
            }
        }
    }
    if has_current {
        args.push(current);
    }
    Ok(args)
}
