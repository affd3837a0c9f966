//! Outbound notification seam.
//!
//! Delivery (webhooks, chat integrations) lives outside this workspace; a
//! sender only has to implement [`Notifier`]. The watch loop never depends
//! on a notifier's success.

use async_trait::async_trait;
use std::fmt;

use crate::{ChangeEvent, Result, Status};

/// Severity attached to an outbound message, mapped by senders to colours
/// or priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Good,
    Warning,
    Danger,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Good => write!(f, "good"),
            Severity::Warning => write!(f, "warning"),
            Severity::Danger => write!(f, "danger"),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, severity: Severity, message: &str) -> Result<()>;
}

/// Human-readable message for an event.
pub fn format_event(event: &ChangeEvent) -> (Severity, String) {
    match event {
        ChangeEvent::StatusChanged(change) => {
            let node = &change.key.node;
            let service = change.record.display_name();
            match change.new_status {
                Status::Critical => (
                    Severity::Danger,
                    format!("[{}] {} service is critical", node, service),
                ),
                Status::Passing => (
                    Severity::Good,
                    format!("[{}] {} service is back to normal", node, service),
                ),
                Status::Warning => (
                    Severity::Warning,
                    format!("[{}] {} service is having problems", node, service),
                ),
                Status::Maintenance => (
                    Severity::Warning,
                    format!("[{}] {} service is in maintenance", node, service),
                ),
            }
        }
        ChangeEvent::Deregistered { key, .. } => (
            Severity::Warning,
            format!("[{}] {} service was deregistered", key.node, key.service_id),
        ),
    }
}
