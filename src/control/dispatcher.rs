use crate::config::types::{Result, Status};
use crate::control::command::{command_name, AdminCommand};
use crate::observability::audit::{AuditEvent, RegistryKind};
/// Administrative call entry point
use crate::runtime::Shroud;
use log::debug;
use std::sync::Arc;

/// Maps one `(code, payload)` call onto the registries
#[derive(Clone)]
pub struct Dispatcher {
    shroud: Arc<Shroud>,
}

impl Dispatcher {
    pub fn new(shroud: Arc<Shroud>) -> Self {
        Self { shroud }
    }

    pub fn shroud(&self) -> &Shroud {
        &self.shroud
    }

    /// Decode and execute one call; `Status::Failure` for any error
    pub fn dispatch(&self, code: u32, payload: &[u8]) -> Status {
        let result = self.try_dispatch(code, payload);
        let status = Status::from(&result);
        debug!(
            "shroud: {} -> {}",
            command_name(code).unwrap_or("unknown"),
            status.as_code()
        );
        status
    }

    /// Like [`dispatch`](Self::dispatch), keeping the error
    pub fn try_dispatch(&self, code: u32, payload: &[u8]) -> Result<()> {
        let command = AdminCommand::decode(code, payload).map_err(|e| {
            self.shroud.metrics().control.rejected.inc();
            self.shroud
                .audit()
                .record(AuditEvent::rejected(RegistryKind::Control, None, &e));
            e
        })?;
        self.shroud.execute(command)
    }
}
