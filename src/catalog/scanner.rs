//! Directory walk, shard grouping, and mmproj pairing (spec §4.3 steps 1-4).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::catalog::gguf::parse_metadata;
use crate::types::model::Model;

/// Matches `<stem>-00001-of-00003.gguf` style shard filenames.
static SHARD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<stem>.+)-(?P<index>\d{5})-of-(?P<total>\d{5})$").unwrap());

/// Output of a catalog scan (spec §4.3 step 5).
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub models: Vec<Model>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug)]
struct Group {
    stem: String,
    dir: PathBuf,
    shard_total: Option<u32>,
    files: BTreeMap<u32, PathBuf>,
}

/// Walk `paths`, follow each symlink once, group shard sets, pair mmproj
/// files, and parse GGUF metadata for each resulting model.
pub fn scan_paths(paths: &[PathBuf]) -> ScanResult {
    let started = Instant::now();
    let mut errors = Vec::new();
    let mut groups: BTreeMap<(PathBuf, String), Group> = BTreeMap::new();
    let mut mmproj_by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

    for root in paths {
        let walker = WalkDir::new(root).follow_links(true).into_iter();
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
            if ext != "gguf" {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s,
                None => continue,
            };
            let dir = path.parent().unwrap_or(Path::new("")).to_path_buf();

            if stem.to_lowercase().contains("mmproj") {
                mmproj_by_dir.entry(dir).or_default().push(path.to_path_buf());
                continue;
            }

            if let Some(caps) = SHARD_PATTERN.captures(stem) {
                let base = caps["stem"].to_string();
                let index: u32 = caps["index"].parse().unwrap_or(1);
                let total: u32 = caps["total"].parse().unwrap_or(1);
                let key = (dir.clone(), base.clone());
                let group = groups.entry(key).or_insert_with(|| Group {
                    stem: base,
                    dir: dir.clone(),
                    shard_total: Some(total),
                    files: BTreeMap::new(),
                });
                group.files.insert(index, path.to_path_buf());
            } else {
                let key = (dir.clone(), stem.to_string());
                groups.entry(key).or_insert_with(|| Group {
                    stem: stem.to_string(),
                    dir,
                    shard_total: None,
                    files: BTreeMap::from([(1, path.to_path_buf())]),
                });
            }
        }
    }

    let mut models = Vec::new();
    for ((dir, stem), group) in groups {
        let representative = match group.files.values().next() {
            Some(p) => p.clone(),
            None => continue,
        };

        let metadata = match parse_metadata(&representative) {
            Ok(m) => m,
            Err(e) => {
                errors.push(format!("{}: {e}", representative.display()));
                continue;
            }
        };

        let shard_files: Vec<PathBuf> = group.files.values().cloned().collect();
        let total_size: u64 = shard_files.iter().filter_map(|p| std::fs::metadata(p).ok()).map(|m| m.len()).sum();
        let size = std::fs::metadata(&representative).map(|m| m.len()).unwrap_or(0);

        let mmproj_path = mmproj_by_dir.get(&dir).and_then(|candidates| {
            candidates.iter().find(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_lowercase().contains(&stem.to_lowercase()))
                    .unwrap_or(false)
            })
            .or_else(|| candidates.first())
            .cloned()
        });

        let id = stable_id(&shard_files);
        let is_shard_set = group.shard_total.map(|t| t > 1).unwrap_or(false);

        models.push(Model {
            id,
            name: stem.clone(),
            display_name: None,
            alias: None,
            path: representative,
            path_prefix: dir,
            size,
            total_size: if is_shard_set { Some(total_size) } else { None },
            shard_count: group.shard_total,
            shard_files: if is_shard_set { Some(shard_files) } else { None },
            mmproj_path,
            favourite: false,
            metadata,
            scanned_at: Utc::now(),
        });
    }

    ScanResult { models, errors, duration_ms: started.elapsed().as_millis() as u64 }
}

/// Stable id derived from the canonical path(s) backing a model, so rescans
/// assign the same id to the same files.
fn stable_id(paths: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    for p in paths {
        hasher.update(p.to_string_lossy().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_gguf(path: &Path) {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x4655_4747u32.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        let key = "general.architecture";
        buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());
        let val = "llama";
        buf.extend_from_slice(&(val.len() as u64).to_le_bytes());
        buf.extend_from_slice(val.as_bytes());
        std::fs::write(path, buf).unwrap();
    }

    #[test]
    fn test_recognizes_shard_set() {
        let dir = std::env::temp_dir().join(format!("shepherd-scan-shards-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for i in 1..=3u32 {
            let path = dir.join(format!("mixtral-{:05}-of-{:05}.gguf", i, 3));
            write_gguf(&path);
        }
        let result = scan_paths(&[dir.clone()]);
        assert_eq!(result.models.len(), 1);
        assert_eq!(result.models[0].shard_count, Some(3));
        assert!(result.models[0].is_shard_set());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_single_file_model_not_shard_set() {
        let dir = std::env::temp_dir().join(format!("shepherd-scan-single-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        write_gguf(&dir.join("phi3-mini.gguf"));
        let result = scan_paths(&[dir.clone()]);
        assert_eq!(result.models.len(), 1);
        assert!(!result.models[0].is_shard_set());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_mmproj_pairing() {
        let dir = std::env::temp_dir().join(format!("shepherd-scan-mmproj-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        write_gguf(&dir.join("llava-7b.gguf"));
        write_gguf(&dir.join("mmproj-llava-7b.gguf"));
        let result = scan_paths(&[dir.clone()]);
        let model = result.models.iter().find(|m| m.name == "llava-7b").unwrap();
        assert!(model.mmproj_path.is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
