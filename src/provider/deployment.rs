//! Deployment name resolution
//!
//! Hosted deployments carry operator-chosen names ("prod-gpt4o-eastus",
//! "gpt-4o-2024-11-20", ...). Pricing needs the canonical model id, so the
//! resolver lower-cases the name and runs it through an ordered list of
//! model-family rules. Results are cached per input string; a name no rule
//! recognizes resolves to itself and is warned about exactly once.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

struct FamilyRule {
    pattern: Regex,
    canonical: &'static str,
}

lazy_static! {
    /// Most specific families first: "gpt-4o-mini" must win over "gpt-4o",
    /// and "gpt-4o" over "gpt-4".
    static ref FAMILY_RULES: Vec<FamilyRule> = {
        let defs: &[(&str, &str)] = &[
            (r"gpt-?4o-?mini", "gpt-4o-mini"),
            (r"gpt-?4o", "gpt-4o"),
            (r"gpt-?4\.1-?nano", "gpt-4.1-nano"),
            (r"gpt-?4\.1-?mini", "gpt-4.1-mini"),
            (r"gpt-?4\.1", "gpt-4.1"),
            (r"gpt-?4-?turbo", "gpt-4-turbo"),
            (r"gpt-?4-?32k", "gpt-4-32k"),
            (r"gpt-?4", "gpt-4"),
            (r"gpt-?35-?turbo-?16k|gpt-?3\.5-?turbo-?16k", "gpt-3.5-turbo-16k"),
            (r"gpt-?35-?turbo|gpt-?3\.5-?turbo", "gpt-3.5-turbo"),
            (r"gpt-?5-?mini", "gpt-5-mini"),
            (r"gpt-?5-?nano", "gpt-5-nano"),
            (r"gpt-?5", "gpt-5"),
            (r"(^|[^a-z0-9])o1-?mini", "o1-mini"),
            (r"(^|[^a-z0-9])o1", "o1"),
            (r"(^|[^a-z0-9])o3-?mini", "o3-mini"),
            (r"(^|[^a-z0-9])o3", "o3"),
            (r"(^|[^a-z0-9])o4-?mini", "o4-mini"),
            (r"text-?embedding-?3-?large|embedding-?3-?large", "text-embedding-3-large"),
            (r"text-?embedding-?3-?small|embedding-?3-?small", "text-embedding-3-small"),
            (r"text-?embedding-?ada-?002|ada-?002", "text-embedding-ada-002"),
            (r"dall-?e-?3", "dall-e-3"),
            (r"dall-?e-?2", "dall-e-2"),
            (r"gpt-?image-?1", "gpt-image-1"),
            (r"whisper", "whisper-1"),
            (r"(^|[^a-z])tts-?1-?hd", "tts-1-hd"),
            (r"(^|[^a-z])tts", "tts-1"),
        ];
        defs.iter()
            .map(|(pattern, canonical)| FamilyRule {
                pattern: Regex::new(pattern).expect("family rule must compile"),
                canonical,
            })
            .collect()
    };
}

/// Snapshot of resolver activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub cached: usize,
    pub warned: usize,
    /// Number of times the rule list actually ran
    pub heuristic_runs: u64,
}

/// Process-wide deployment → model cache.
#[derive(Debug, Default)]
pub struct DeploymentResolver {
    cache: RwLock<HashMap<String, String>>,
    warned: Mutex<HashSet<String>>,
    heuristic_runs: AtomicU64,
}

impl DeploymentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a deployment identifier to a canonical model id. Falls back to
    /// the input unchanged.
    pub fn resolve(&self, deployment: &str) -> String {
        if let Some(hit) = self.cache.read().ok().and_then(|c| c.get(deployment).cloned()) {
            return hit;
        }

        self.heuristic_runs.fetch_add(1, Ordering::Relaxed);
        let resolved = match match_family(deployment) {
            Some(canonical) => {
                tracing::debug!(deployment, model = canonical, "Resolved deployment name");
                canonical.to_string()
            }
            None => {
                self.warn_once(deployment);
                deployment.to_string()
            }
        };

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(deployment.to_string(), resolved.clone());
        }
        resolved
    }

    /// Drop all cached resolutions and warn-once state.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
        if let Ok(mut warned) = self.warned.lock() {
            warned.clear();
        }
        self.heuristic_runs.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cached: self.cache.read().map(|c| c.len()).unwrap_or_default(),
            warned: self.warned.lock().map(|w| w.len()).unwrap_or_default(),
            heuristic_runs: self.heuristic_runs.load(Ordering::Relaxed),
        }
    }

    fn warn_once(&self, deployment: &str) {
        let first = self
            .warned
            .lock()
            .map(|mut w| w.insert(deployment.to_string()))
            .unwrap_or(false);
        if first {
            tracing::warn!(
                deployment,
                "Could not resolve deployment name to a known model; using it as-is for pricing"
            );
        }
    }
}

/// Match a deployment name against the model-family rules.
pub fn match_family(deployment: &str) -> Option<&'static str> {
    let lower = deployment.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }
    FAMILY_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(&lower))
        .map(|rule| rule.canonical)
}
