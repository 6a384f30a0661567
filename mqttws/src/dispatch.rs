//! Observer lists for connection and message events.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::types::Message;

pub(crate) type ConnectHandler = Arc<dyn Fn(bool) + Send + Sync>;
pub(crate) type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;
pub(crate) type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Registered handlers, called in registration order.
///
/// Handlers run on the session task. A panicking handler is logged and does
/// not stop the others or the session. The lists are snapshotted before
/// each notification, so a handler may register further handlers.
#[derive(Default)]
pub(crate) struct Dispatcher {
    connect: RwLock<Vec<ConnectHandler>>,
    disconnect: RwLock<Vec<DisconnectHandler>>,
    message: RwLock<Vec<MessageHandler>>,
}

impl Dispatcher {
    pub fn on_connect(&self, handler: ConnectHandler) {
        self.connect.write().push(handler);
    }

    pub fn on_disconnect(&self, handler: DisconnectHandler) {
        self.disconnect.write().push(handler);
    }

    pub fn on_message(&self, handler: MessageHandler) {
        self.message.write().push(handler);
    }

    /// `success` is false when a connection attempt failed before CONNACK.
    pub fn notify_connect(&self, success: bool) {
        let handlers = self.connect.read().clone();
        for handler in handlers {
            guarded("connect", || handler(success));
        }
    }

    pub fn notify_disconnect(&self) {
        let handlers = self.disconnect.read().clone();
        for handler in handlers {
            guarded("disconnect", || handler());
        }
    }

    pub fn notify_message(&self, msg: &Message) {
        let handlers = self.message.read().clone();
        for handler in handlers {
            guarded("message", || handler(msg));
        }
    }
}

fn guarded(kind: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!("{} handler panicked: {}", kind, reason);
    }
}
