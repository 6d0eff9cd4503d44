//! Host-provided services exposed to extensions behind capabilities.

use crate::host::value::HostResult;
use crate::storage::ExtensionStorage;
use log::info;
use std::sync::{Arc, Mutex};

/// Toast-style user notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, icon: Option<&str>);
}

/// Notifier that only writes a log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, icon: Option<&str>) {
        info!(
            "event=user_notify module=extension status=ok icon={} chars={}",
            icon.unwrap_or("none"),
            message.chars().count()
        );
    }
}

/// System clipboard write access.
pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> HostResult<()>;
}

/// In-process clipboard holding the last written text.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> Option<String> {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn set_text(&self, text: &str) -> HostResult<()> {
        *self.text.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.to_string());
        Ok(())
    }
}

/// Bundle of host services shared by every extension.
#[derive(Clone)]
pub struct HostServices {
    pub notifier: Arc<dyn Notifier>,
    pub clipboard: Arc<dyn Clipboard>,
    pub storage: Arc<dyn ExtensionStorage>,
}

impl HostServices {
    pub fn new(storage: Arc<dyn ExtensionStorage>) -> Self {
        Self {
            notifier: Arc::new(LogNotifier),
            clipboard: Arc::new(MemoryClipboard::new()),
            storage,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = clipboard;
        self
    }
}
