//! Toast sinks.

use carelink_core::{Toast, ToastKind};
use tokio::sync::mpsc;

/// Destination for user-visible notifications.
pub trait ToastSink: Send + Sync + 'static {
    /// Display `toast`. Must not block.
    fn show(&self, toast: Toast);
}

/// Forwards toasts to an unbounded channel for a UI to drain.
#[derive(Debug, Clone)]
pub struct ChannelToasts {
    tx: mpsc::UnboundedSender<Toast>,
}

impl ChannelToasts {
    /// Sink plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ToastSink for ChannelToasts {
    fn show(&self, toast: Toast) {
        if self.tx.send(toast).is_err() {
            tracing::debug!("toast receiver dropped");
        }
    }
}

/// Writes toasts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogToasts;

impl ToastSink for LogToasts {
    fn show(&self, toast: Toast) {
        match toast.kind {
            ToastKind::Success | ToastKind::Info => tracing::info!(toast = %toast.message),
            ToastKind::Error => tracing::error!(toast = %toast.message),
        }
    }
}
