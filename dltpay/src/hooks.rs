//! Lifecycle hooks for payment sessions.
//!
//! Hooks run at two points of a [`PaymentSession`](crate::session::PaymentSession):
//!
//! - **Before submit**: inspect the intent about to be charged and optionally
//!   abort. The first abort wins and the remaining hooks are skipped.
//! - **On transition**: observe every state change. Failures inside a hook are
//!   the hook's own business and never affect the session.
//!
//! [`DisplayMirror`] is the stock transition hook: it pushes each state to the
//! customer-facing display.

use std::fmt;
use std::sync::Arc;

use crate::api::{BoxFuture, DisplayStatus, DisplayUpdate, PaymentApi};
use crate::error::PaymentError;
use crate::intent::PaymentIntent;
use crate::session::{Channel, SessionState};

/// Decision returned by [`SessionHooks::before_submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Let the submission proceed.
    Continue,
    /// Stop the submission.
    Abort {
        /// Machine-readable reason, e.g. `"over_limit"`.
        reason: String,
        /// Human-readable message.
        message: String,
    },
}

/// What is about to be submitted.
#[derive(Debug, Clone, Copy)]
pub struct SubmitContext<'a> {
    /// The intent being charged.
    pub intent: &'a PaymentIntent,
    /// Channel carrying the submission.
    pub channel: Channel,
}

/// A state change.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    /// The state just entered.
    pub state: &'a SessionState,
    /// The intent as of the transition.
    pub intent: &'a PaymentIntent,
    /// QR payload on screen, while in [`SessionState::Qr`].
    pub qr_payload: Option<&'a str>,
}

/// Session lifecycle hooks. Every method defaults to a no-op.
pub trait SessionHooks: Send + Sync {
    /// Called before a payment is submitted on any channel.
    fn before_submit<'a>(&'a self, _ctx: SubmitContext<'a>) -> BoxFuture<'a, HookDecision> {
        Box::pin(async { HookDecision::Continue })
    }

    /// Called after every state transition.
    fn on_transition<'a>(&'a self, _ctx: TransitionContext<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Registered hooks, run in registration order.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn SessionHooks>>,
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl HookSet {
    /// Adds a hook.
    pub fn push(&mut self, hook: Arc<dyn SessionHooks>) {
        self.hooks.push(hook);
    }

    /// Whether no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs the before-submit hooks.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Aborted`] carrying the first abort.
    pub async fn before_submit(&self, ctx: SubmitContext<'_>) -> Result<(), PaymentError> {
        for hook in &self.hooks {
            if let HookDecision::Abort { reason, message } = hook.before_submit(ctx).await {
                #[cfg(feature = "telemetry")]
                tracing::info!(%reason, intent = %ctx.intent.id, "submission aborted by hook");
                return Err(PaymentError::Aborted { reason, message });
            }
        }
        Ok(())
    }

    /// Runs every transition hook.
    pub async fn transitioned(&self, ctx: TransitionContext<'_>) {
        for hook in &self.hooks {
            hook.on_transition(ctx).await;
        }
    }
}

/// Mirrors session state to the customer-facing display.
pub struct DisplayMirror {
    api: Arc<dyn PaymentApi>,
}

impl fmt::Debug for DisplayMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayMirror").finish_non_exhaustive()
    }
}

impl DisplayMirror {
    /// A mirror publishing through `api`.
    #[must_use]
    pub fn new(api: Arc<dyn PaymentApi>) -> Self {
        Self { api }
    }
}

/// Display status for a session state.
#[must_use]
pub const fn display_status(state: &SessionState) -> DisplayStatus {
    match state {
        SessionState::Idle => DisplayStatus::Idle,
        SessionState::Qr => DisplayStatus::Qr,
        SessionState::WaitingNfc => DisplayStatus::Ready,
        SessionState::LinkIssued => DisplayStatus::LinkPending,
        SessionState::Processing => DisplayStatus::Processing,
        SessionState::Settled => DisplayStatus::Success,
        SessionState::Failed(_) => DisplayStatus::Error,
    }
}

impl SessionHooks for DisplayMirror {
    fn on_transition<'a>(&'a self, ctx: TransitionContext<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut update = DisplayUpdate::for_intent(ctx.intent, display_status(ctx.state));
            update.qr_code = ctx.qr_payload.map(str::to_owned);
            if let Err(err) = self.api.update_display(&update).await {
                log_display_error(&err);
            }
        })
    }
}

#[cfg(feature = "telemetry")]
fn log_display_error(err: &crate::api::ApiError) {
    tracing::debug!(error = %err, "display update failed");
}

#[cfg(not(feature = "telemetry"))]
const fn log_display_error(_err: &crate::api::ApiError) {}
