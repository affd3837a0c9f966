use async_trait::async_trait;
use tracing::{error, info, warn};
use vigil_core::{format_event, Notifier, Result, Severity};

use crate::EventReceiver;

/// Drains `receiver` into `notifier` until the channel ends.
///
/// Notifier failures are logged and the event is dropped; they never stall
/// or end the feed. Returns the channel's terminal error, if any.
pub async fn forward<N>(mut receiver: EventReceiver, notifier: &N) -> Result<()>
where
    N: Notifier + ?Sized,
{
    loop {
        match receiver.recv().await? {
            Some(event) => {
                let (severity, message) = format_event(&event);
                if let Err(e) = notifier.notify(severity, &message).await {
                    warn!("Failed to deliver notification \"{}\": {}", message, e);
                }
            }
            None => return Ok(()),
        }
    }
}

/// Notifier that writes messages to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, severity: Severity, message: &str) -> Result<()> {
        match severity {
            Severity::Good => info!(severity = %severity, "{}", message),
            Severity::Warning => warn!(severity = %severity, "{}", message),
            Severity::Danger => error!(severity = %severity, "{}", message),
        }
        Ok(())
    }
}
