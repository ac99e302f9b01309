//! Per-causal-chain context threaded through command handling and publishing.

use tokio_util::sync::CancellationToken;

/// Tracks how deep in-process event handling has recursed.
///
/// A top-level command starts at level 0. Every publish hands its handlers a
/// context one level deeper, so commands issued by those handlers publish at
/// the deeper level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishContext {
    nest_level: u32,
}

impl PublishContext {
    /// Context of a top-level command.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn at_level(nest_level: u32) -> Self {
        Self { nest_level }
    }

    pub fn nest_level(&self) -> u32 {
        self.nest_level
    }

    /// Context handed to handlers invoked by a publish at this level.
    pub fn nested(&self) -> Self {
        Self {
            nest_level: self.nest_level.saturating_add(1),
        }
    }
}

/// Context a command runs in: its causal chain depth and the caller's
/// cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    publish: PublishContext,
    cancellation: CancellationToken,
}

impl CommandContext {
    /// A fresh causal chain with its own cancellation token.
    pub fn root() -> Self {
        Self::default()
    }

    /// A fresh causal chain cancelled through `token`.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            publish: PublishContext::root(),
            cancellation: token,
        }
    }

    pub fn with_publish_context(mut self, publish: PublishContext) -> Self {
        self.publish = publish;
        self
    }

    pub fn publish(&self) -> PublishContext {
        self.publish
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Context for handlers of events published from this context.
    ///
    /// Shares the caller's cancellation token.
    pub fn nested(&self) -> Self {
        Self {
            publish: self.publish.nested(),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Same depth, with a child token that is cancelled together with the
    /// caller's token but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            publish: self.publish,
            cancellation: self.cancellation.child_token(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_increments_level() {
        let ctx = CommandContext::root();
        assert_eq!(ctx.publish().nest_level(), 0);
        assert_eq!(ctx.nested().publish().nest_level(), 1);
        assert_eq!(ctx.nested().nested().publish().nest_level(), 2);
    }

    #[test]
    fn siblings_do_not_accumulate() {
        let ctx = CommandContext::root();
        let first = ctx.nested();
        let second = ctx.nested();
        assert_eq!(first.publish(), second.publish());
    }

    #[test]
    fn child_cancels_with_parent() {
        let ctx = CommandContext::root();
        let child = ctx.child();
        ctx.cancellation().cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancellation_does_not_reach_parent() {
        let ctx = CommandContext::root();
        let child = ctx.child();
        child.cancellation().cancel();
        assert!(!ctx.is_cancelled());
    }
}
