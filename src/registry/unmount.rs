//! Unmount directive registry.
//!
//! Unlike the other path-keyed registries, a second directive for a path
//! that is already listed is refused rather than applied in place.

use super::{validate_path, RegistryContext};
use crate::config::types::{Result, ShroudError, UnmountRecord};
use crate::kernel::mount::Detacher;
use crate::observability::audit::{AuditEvent, AuditEventType, RegistryKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of one unmount pass; advisory only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmountPassReport {
    pub attempted: usize,
    pub failed: usize,
}

pub struct UnmountRegistry {
    ctx: RegistryContext,
    detacher: Arc<dyn Detacher>,
}

impl UnmountRegistry {
    pub fn new(ctx: RegistryContext, detacher: Arc<dyn Detacher>) -> Self {
        Self { ctx, detacher }
    }

    /// Append a directive. Fails with [`ShroudError::Duplicate`] when the
    /// path is already listed, leaving the stored directive untouched.
    pub fn upsert(&self, record: UnmountRecord) -> Result<()> {
        validate_path(&record.path, false)
            .map_err(|e| self.ctx.reject(RegistryKind::Unmount, Some(&record.path), e))?;

        let mut tables = self.ctx.lock.lock();
        if tables.unmounts.contains(&record.path) {
            return Err(self.ctx.reject(
                RegistryKind::Unmount,
                Some(&record.path),
                ShroudError::Duplicate {
                    path: record.path.clone(),
                },
            ));
        }
        self.ctx
            .ensure_capacity(tables.unmounts.len())
            .map_err(|e| self.ctx.reject(RegistryKind::Unmount, Some(&record.path), e))?;
        tables.unmounts.push(record.clone());
        drop(tables);

        self.ctx.metrics.unmount.inserted.inc();
        self.ctx.audit.record(AuditEvent::stored(
            RegistryKind::Unmount,
            &record.path,
            false,
            format!("detach_mode={}", record.detach_mode),
        ));
        Ok(())
    }

    /// Detach every listed mount in insertion order.
    ///
    /// Individual failures are logged and skipped. `actor_id` only
    /// attributes the pass in the log.
    pub fn run_pass(&self, actor_id: u32) -> UnmountPassReport {
        // The registry lock is never held across a detach call
        let directives = self.ctx.lock.lock().unmounts.snapshot();

        let mut report = UnmountPassReport::default();
        for directive in &directives {
            report.attempted += 1;
            self.ctx.audit.record(
                AuditEvent::new(
                    AuditEventType::Detaching,
                    RegistryKind::Unmount,
                    format!("actor={} mode={}", actor_id, directive.detach_mode),
                )
                .with_path(&directive.path),
            );

            if let Err(e) = self.detacher.detach(&directive.path, directive.detach_mode) {
                report.failed += 1;
                self.ctx.metrics.detach_failures.inc();
                self.ctx.audit.record(
                    AuditEvent::new(
                        AuditEventType::DetachFailed,
                        RegistryKind::Unmount,
                        format!("actor={}: {}", actor_id, e),
                    )
                    .with_path(&directive.path),
                );
            }
        }

        self.ctx.metrics.unmount_passes.inc();
        report
    }

    pub fn contains(&self, path: &str) -> bool {
        self.ctx.lock.lock().unmounts.contains(path)
    }

    /// Directives in insertion order
    pub fn snapshot(&self) -> Vec<UnmountRecord> {
        self.ctx.lock.lock().unmounts.snapshot()
    }

    pub fn len(&self) -> usize {
        self.ctx.lock.lock().unmounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
