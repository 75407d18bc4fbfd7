//! `TerminalNotifier`: Presentation-layer implementation of `Notifier`.
//!
//! Prints each notice on the operator console, addressed to its requester,
//! so application services never depend on a presentation type directly.

use owo_colors::OwoColorize as _;
use leasekeeper_common::Creator;

use crate::application::ports::Notifier;
use crate::domain::notice::Notice;
use crate::output::OutputContext;

/// Console notifier that wraps an `OutputContext`.
///
/// - failures go to stderr via `error()` and are never suppressed
/// - expiry warnings use `warn()`
/// - progress uses `info()`, everything else `success()`
pub struct TerminalNotifier {
    ctx: OutputContext,
}

impl TerminalNotifier {
    #[must_use]
    pub fn new(ctx: OutputContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn output(&self) -> &OutputContext {
        &self.ctx
    }

    /// The line printed for `notice`, without the status glyph.
    #[must_use]
    pub fn format(&self, recipient: &Creator, notice: &Notice) -> String {
        format!(
            "{} {notice}",
            format!("@{}", recipient.display_name).style(self.ctx.styles.recipient)
        )
    }
}

impl Notifier for TerminalNotifier {
    async fn notify(&self, recipient: &Creator, notice: &Notice) -> anyhow::Result<()> {
        let line = self.format(recipient, notice);
        match notice {
            n if n.is_failure() => self.ctx.error(&line),
            Notice::ExpiryWarning { .. } => self.ctx.warn(&line),
            Notice::Progress { .. } => self.ctx.info(&line),
            _ => self.ctx.success(&line),
        }
        Ok(())
    }
}
