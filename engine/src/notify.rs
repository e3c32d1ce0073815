//! User-facing notification fan-out.
//!
//! The engine writes every line to the `log` facade and, when asked, forwards
//! it to an injected [`Notify`] hook so a UI can show it.

use std::fmt;
use std::sync::Arc;

/// Receives lines meant for the user.
pub trait Notify: Send + Sync {
    fn notify(&self, message: &str);
}

impl<F> Notify for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) {
        self(message)
    }
}

#[derive(Clone, Default)]
pub struct Reporter {
    hook: Option<Arc<dyn Notify>>,
}

impl Reporter {
    pub fn new(hook: Option<Arc<dyn Notify>>) -> Self {
        Self { hook }
    }

    pub fn info(&self, message: &str, notify_ui: bool) {
        log::info!("{message}");
        if notify_ui {
            self.forward(message);
        }
    }

    pub fn warn(&self, message: &str, notify_ui: bool) {
        log::warn!("{message}");
        if notify_ui {
            self.forward(message);
        }
    }

    fn forward(&self, message: &str) {
        if let Some(hook) = &self.hook {
            hook.notify(message);
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
