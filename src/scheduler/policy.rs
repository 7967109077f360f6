//! Node-selection policies (spec §4.5, §9 design note: `Policy{Pick}`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::node::NodeInfo;

/// Minimum resource/capability shape a task requires of a candidate node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequirements {
    #[serde(default)]
    pub min_memory_gb: Option<f64>,
    #[serde(default)]
    pub min_cpu_cores: Option<f64>,
    #[serde(default)]
    pub requires_gpu: bool,
    #[serde(default)]
    pub min_gpu_memory_gb: Option<f64>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskRequirements {
    pub fn is_satisfied_by(&self, node: &NodeInfo) -> bool {
        if self.requires_gpu && !node.capabilities.gpu {
            return false;
        }
        if let Some(min_mem) = self.min_memory_gb {
            if node.resources.memory_available_gb() < min_mem {
                return false;
            }
        }
        if let Some(min_cpu) = self.min_cpu_cores {
            if node.resources.cpu_available_cores() < min_cpu {
                return false;
            }
        }
        if let Some(min_gpu_mem) = self.min_gpu_memory_gb {
            if node.resources.gpu_memory_available_gb() < min_gpu_mem {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().all(|t| node.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// Weights for the `resource_aware`/`ResourceBased` scoring formula
/// (spec §4.5): score = w1*cpu_avail + w2*mem_avail_gb + gpu_count*10 + w3*gpu_mem_avail_gb.
#[derive(Debug, Clone, Copy)]
pub struct ResourceWeights {
    pub cpu: f64,
    pub memory: f64,
    pub gpu_memory: f64,
}

impl Default for ResourceWeights {
    fn default() -> Self {
        Self { cpu: 1.0, memory: 1.0, gpu_memory: 2.0 }
    }
}

/// Selects a node from a pre-filtered candidate set (spec §9 design note).
pub trait Policy: Send + Sync {
    fn pick(&self, candidates: &[NodeInfo], req: &TaskRequirements) -> Result<String>;
}

fn tie_break_smallest_id<'a>(tied: impl Iterator<Item = &'a NodeInfo>) -> Option<String> {
    tied.map(|n| n.id.clone()).min()
}

/// Picks the candidate maximizing a weighted sum of available resources.
pub struct ResourceBased {
    pub weights: ResourceWeights,
}

impl Default for ResourceBased {
    fn default() -> Self {
        Self { weights: ResourceWeights::default() }
    }
}

impl Policy for ResourceBased {
    fn pick(&self, candidates: &[NodeInfo], _req: &TaskRequirements) -> Result<String> {
        let best = candidates
            .iter()
            .map(|n| {
                let score = self.weights.cpu * n.resources.cpu_available_cores()
                    + self.weights.memory * n.resources.memory_available_gb()
                    + n.capabilities.gpu_count as f64 * 10.0
                    + self.weights.gpu_memory * n.resources.gpu_memory_available_gb();
                (n, score)
            })
            .fold(None::<(&NodeInfo, f64)>, |acc, (n, score)| match acc {
                None => Some((n, score)),
                Some((best_n, best_score)) => {
                    if score > best_score || (score == best_score && n.id < best_n.id) {
                        Some((n, score))
                    } else {
                        Some((best_n, best_score))
                    }
                }
            });
        best.map(|(n, _)| n.id.clone())
            .ok_or_else(|| Error::NoSuitableNode { task_id: String::new() })
    }
}

/// Default policy (spec §4.5): picks the candidate with the lowest weighted
/// load score: 0.4*CPU utilization + 0.4*memory utilization + 0.2*normalized
/// 1-minute load average.
#[derive(Default)]
pub struct LoadBalanced;

impl LoadBalanced {
    fn load_score(node: &NodeInfo) -> f64 {
        0.4 * node.resources.cpu_utilization()
            + 0.4 * node.resources.memory_utilization()
            + 0.2 * node.resources.normalized_load_average()
    }
}

impl Policy for LoadBalanced {
    fn pick(&self, candidates: &[NodeInfo], _req: &TaskRequirements) -> Result<String> {
        let mut best: Option<(&NodeInfo, f64)> = None;
        for n in candidates {
            let score = Self::load_score(n);
            best = match best {
                None => Some((n, score)),
                Some((best_n, best_score)) => {
                    if score < best_score || (score == best_score && n.id < best_n.id) {
                        Some((n, score))
                    } else {
                        Some((best_n, best_score))
                    }
                }
            };
        }
        best.map(|(n, _)| n.id.clone())
            .ok_or_else(|| Error::NoSuitableNode { task_id: String::new() })
    }
}

/// Prefers nodes that already have the requested model loaded, deferring to
/// `LoadBalanced` when no cache hit exists or the cached node isn't a
/// current candidate.
pub struct Locality {
    cache: parking_lot::Mutex<HashMap<String, Vec<String>>>,
    fallback: LoadBalanced,
}

impl Default for Locality {
    fn default() -> Self {
        Self { cache: parking_lot::Mutex::new(HashMap::new()), fallback: LoadBalanced }
    }
}

impl Locality {
    pub fn record_loaded(&self, model_name: &str, node_id: &str) {
        let mut cache = self.cache.lock();
        let entry = cache.entry(model_name.to_string()).or_default();
        if !entry.contains(&node_id.to_string()) {
            entry.push(node_id.to_string());
        }
    }
}

impl Policy for Locality {
    fn pick(&self, candidates: &[NodeInfo], req: &TaskRequirements) -> Result<String> {
        if let Some(model_name) = &req.model_name {
            let cached_ids = self.cache.lock().get(model_name).cloned().unwrap_or_default();
            let hits: Vec<&NodeInfo> = candidates.iter().filter(|n| cached_ids.contains(&n.id)).collect();
            if let Some(id) = tie_break_smallest_id(hits.into_iter()) {
                return Ok(id);
            }
        }
        self.fallback.pick(candidates, req)
    }
}

/// Fourth, genuinely distinct policy: cycles through candidates in a fixed
/// round-robin order independent of load or locality.
#[derive(Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl Policy for RoundRobin {
    fn pick(&self, candidates: &[NodeInfo], _req: &TaskRequirements) -> Result<String> {
        if candidates.is_empty() {
            return Err(Error::NoSuitableNode { task_id: String::new() });
        }
        let mut sorted: Vec<&NodeInfo> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % sorted.len();
        Ok(sorted[idx].id.clone())
    }
}
