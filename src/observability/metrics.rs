// Registry counters
//
// Invariant: every administrative call lands in exactly one of
// inserted/updated/rejected. Record-carrying calls count against their
// registry; SetLogging counts as a control update and payloads that fail to
// decode count as control rejects.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::observability::audit::RegistryKind;

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters kept by one registry
#[derive(Debug, Default)]
pub struct RegistryCounters {
    pub inserted: Counter,
    pub updated: Counter,
    pub rejected: Counter,
    pub tag_failures: Counter,
}

impl RegistryCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            inserted: self.inserted.get(),
            updated: self.updated.get(),
            rejected: self.rejected.get(),
            tag_failures: self.tag_failures.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub inserted: u64,
    pub updated: u64,
    pub rejected: u64,
    pub tag_failures: u64,
}

/// Metrics for all registries
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    pub path: RegistryCounters,
    pub mount: RegistryCounters,
    pub kstat: RegistryCounters,
    pub unmount: RegistryCounters,
    pub identity: RegistryCounters,
    pub control: RegistryCounters,

    pub unmount_passes: Counter,
    pub detach_failures: Counter,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self, registry: RegistryKind) -> &RegistryCounters {
        match registry {
            RegistryKind::Path => &self.path,
            RegistryKind::Mount => &self.mount,
            RegistryKind::Kstat => &self.kstat,
            RegistryKind::Unmount => &self.unmount,
            RegistryKind::Identity => &self.identity,
            RegistryKind::Control => &self.control,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            path: self.path.snapshot(),
            mount: self.mount.snapshot(),
            kstat: self.kstat.snapshot(),
            unmount: self.unmount.snapshot(),
            identity: self.identity.snapshot(),
            control: self.control.snapshot(),
            unmount_passes: self.unmount_passes.get(),
            detach_failures: self.detach_failures.get(),
        }
    }

    /// Export in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP shroud_registry_calls_total Administrative calls by outcome\n");
        output.push_str("# TYPE shroud_registry_calls_total counter\n");
        let registries = [
            ("path", &self.path),
            ("mount", &self.mount),
            ("kstat", &self.kstat),
            ("unmount", &self.unmount),
            ("identity", &self.identity),
            ("control", &self.control),
        ];
        for (name, counters) in registries {
            for (outcome, value) in [
                ("inserted", counters.inserted.get()),
                ("updated", counters.updated.get()),
                ("rejected", counters.rejected.get()),
            ] {
                output.push_str(&format!(
                    "shroud_registry_calls_total{{registry=\"{}\",outcome=\"{}\"}} {}\n",
                    name, outcome, value
                ));
            }
        }

        output.push_str("# HELP shroud_tag_failures_total Records stored without a live object\n");
        output.push_str("# TYPE shroud_tag_failures_total counter\n");
        for (name, counters) in registries {
            output.push_str(&format!(
                "shroud_tag_failures_total{{registry=\"{}\"}} {}\n",
                name,
                counters.tag_failures.get()
            ));
        }

        output.push_str("# TYPE shroud_unmount_passes_total counter\n");
        output.push_str(&format!(
            "shroud_unmount_passes_total {}\n",
            self.unmount_passes.get()
        ));
        output.push_str("# TYPE shroud_detach_failures_total counter\n");
        output.push_str(&format!(
            "shroud_detach_failures_total {}\n",
            self.detach_failures.get()
        ));

        output
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub path: CounterSnapshot,
    pub mount: CounterSnapshot,
    pub kstat: CounterSnapshot,
    pub unmount: CounterSnapshot,
    pub identity: CounterSnapshot,
    pub control: CounterSnapshot,
    pub unmount_passes: u64,
    pub detach_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(5);
        assert_eq!(counter.get(), 6);

        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_counters_by_registry() {
        let metrics = MetricsRegistry::new();
        metrics.counters(RegistryKind::Mount).inserted.inc();
        metrics.counters(RegistryKind::Mount).updated.inc();
        metrics.counters(RegistryKind::Unmount).rejected.inc();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.mount.inserted, 1);
        assert_eq!(snapshot.mount.updated, 1);
        assert_eq!(snapshot.unmount.rejected, 1);
        assert_eq!(snapshot.path, CounterSnapshot::default());
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();
        metrics.path.inserted.add(3);
        metrics.kstat.tag_failures.inc();
        metrics.detach_failures.inc();

        let output = metrics.export_prometheus();
        assert!(output
            .contains("shroud_registry_calls_total{registry=\"path\",outcome=\"inserted\"} 3"));
        assert!(output.contains("shroud_tag_failures_total{registry=\"kstat\"} 1"));
        assert!(output.contains("shroud_detach_failures_total 1"));
    }
}
