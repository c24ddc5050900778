/// Concurrent upsert stress proofs for the path concealment registry
///
/// Many writers insert disjoint key sets, each key several times, while
/// readers poll the lock-free reverse index. A pass requires:
/// - no lost updates: every key is stored once with its id
/// - no torn reads: an id a reader has seen stays visible
use crate::config::types::PathRecord;
use crate::registry::PathRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Race proof configuration
#[derive(Debug, Clone)]
pub struct RaceProofConfig {
    /// Concurrent writer threads
    pub writers: usize,

    /// Distinct keys each writer owns
    pub keys_per_writer: usize,

    /// Times each writer re-inserts its whole key set
    pub repeats: usize,

    /// Threads polling the reverse index while writers run
    pub readers: usize,

    /// Paths are `<prefix>/w<writer>/k<key>`
    pub path_prefix: String,

    /// First numeric id handed out
    pub id_base: u64,
}

impl Default for RaceProofConfig {
    fn default() -> Self {
        RaceProofConfig {
            writers: 8,
            keys_per_writer: 64,
            repeats: 4,
            readers: 2,
            path_prefix: "/race".to_string(),
            id_base: 1 << 32,
        }
    }
}

impl RaceProofConfig {
    pub fn distinct_keys(&self) -> usize {
        self.writers * self.keys_per_writer
    }

    fn key(&self, writer: usize, key: usize) -> (String, u64) {
        let path = format!("{}/w{}/k{}", self.path_prefix, writer, key);
        let id = self.id_base + (writer * self.keys_per_writer + key) as u64;
        (path, id)
    }
}

/// Race proof result
#[derive(Debug, Clone)]
pub struct RaceProofResult {
    /// Upsert calls issued
    pub iterations: usize,

    /// Upsert calls that returned Ok
    pub successes: usize,

    /// Upsert calls that returned an error
    pub failures: usize,

    /// Keys missing or holding the wrong id afterwards
    pub lost_updates: Vec<String>,

    /// Ids that disappeared from the reverse index after being seen
    pub torn_reads: Vec<String>,

    /// Records counted beyond the distinct keys inserted
    pub extra_records: usize,
}

impl RaceProofResult {
    pub fn new(iterations: usize) -> Self {
        RaceProofResult {
            iterations,
            successes: 0,
            failures: 0,
            lost_updates: Vec::new(),
            torn_reads: Vec::new(),
            extra_records: 0,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.failures == 0
            && self.lost_updates.is_empty()
            && self.torn_reads.is_empty()
            && self.extra_records == 0
    }
}

/// Check one key against both indexes
pub fn verify_path_indexed(registry: &PathRegistry, path: &str, numeric_id: u64) -> bool {
    registry.id_of(path) == Some(numeric_id) && registry.lookup_by_id(numeric_id)
}

/// Run the suite against `registry`, which should not already hold any of
/// the keys the configuration generates
pub fn run_race_proof_suite(registry: &PathRegistry, config: &RaceProofConfig) -> RaceProofResult {
    let baseline = registry.len();
    let mut result = RaceProofResult::new(config.distinct_keys() * config.repeats);
    let done = AtomicBool::new(false);

    log::info!(
        "Starting race proof suite: {} writers x {} keys x {} repeats, {} readers",
        config.writers,
        config.keys_per_writer,
        config.repeats,
        config.readers
    );

    thread::scope(|scope| {
        let readers: Vec<_> = (0..config.readers)
            .map(|_| scope.spawn(|| poll_reverse_index(registry, config, &done)))
            .collect();

        let writers: Vec<_> = (0..config.writers)
            .map(|writer| {
                scope.spawn(move || {
                    let mut outcome = (0usize, 0usize);
                    for _ in 0..config.repeats {
                        for key in 0..config.keys_per_writer {
                            let (path, numeric_id) = config.key(writer, key);
                            match registry.upsert(PathRecord { numeric_id, path }) {
                                Ok(_) => outcome.0 += 1,
                                Err(_) => outcome.1 += 1,
                            }
                        }
                    }
                    outcome
                })
            })
            .collect();

        for writer in writers {
            match writer.join() {
                Ok((successes, failures)) => {
                    result.successes += successes;
                    result.failures += failures;
                }
                Err(_) => result.failures += config.keys_per_writer * config.repeats,
            }
        }
        done.store(true, Ordering::SeqCst);

        for reader in readers {
            match reader.join() {
                Ok(torn) => result.torn_reads.extend(torn),
                Err(_) => result.torn_reads.push("reader panicked".to_string()),
            }
        }
    });

    for writer in 0..config.writers {
        for key in 0..config.keys_per_writer {
            let (path, numeric_id) = config.key(writer, key);
            if !verify_path_indexed(registry, &path, numeric_id) {
                result.lost_updates.push(path);
            }
        }
    }
    let stored = registry.len().saturating_sub(baseline);
    result.extra_records = stored.saturating_sub(config.distinct_keys());

    log::info!(
        "Race proof suite complete: {}/{} upserts ok, {} lost, {} torn",
        result.successes,
        result.iterations,
        result.lost_updates.len(),
        result.torn_reads.len()
    );
    result
}

fn poll_reverse_index(
    registry: &PathRegistry,
    config: &RaceProofConfig,
    done: &AtomicBool,
) -> Vec<String> {
    let total = config.distinct_keys();
    let mut seen = vec![false; total];
    let mut torn = Vec::new();

    loop {
        // Read the flag first so the final sweep covers every completed write
        let finished = done.load(Ordering::SeqCst);
        for (offset, was_seen) in seen.iter_mut().enumerate() {
            let numeric_id = config.id_base + offset as u64;
            let visible = registry.lookup_by_id(numeric_id);
            if *was_seen && !visible {
                torn.push(format!("id {} vanished", numeric_id));
            }
            *was_seen |= visible;
        }
        if finished {
            break;
        }
        thread::yield_now();
    }
    torn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::fixture;

    #[test]
    fn test_race_proof_config_default() {
        let config = RaceProofConfig::default();
        assert_eq!(config.distinct_keys(), 512);
        assert_eq!(config.key(1, 2).0, "/race/w1/k2");
        assert_eq!(config.key(1, 2).1, (1 << 32) + 66);
    }

    #[test]
    fn test_race_proof_result_pass() {
        let mut result = RaceProofResult::new(100);
        assert!(result.is_pass());

        result.extra_records = 1;
        assert!(!result.is_pass());
    }

    #[test]
    fn test_small_suite_passes() {
        let f = fixture();
        let registry = PathRegistry::new(f.ctx.clone());
        let config = RaceProofConfig {
            writers: 4,
            keys_per_writer: 16,
            repeats: 3,
            readers: 1,
            ..Default::default()
        };

        let result = run_race_proof_suite(&registry, &config);
        assert!(result.is_pass(), "{:?}", result);
        assert_eq!(result.successes, 4 * 16 * 3);
        assert_eq!(registry.len(), 64);
    }
}
