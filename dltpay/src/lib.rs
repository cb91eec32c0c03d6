#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Point-of-sale payment sessions and delegated signing for XRPL stablecoin
//! payments.
//!
//! This crate drives a checkout from "awaiting input" to "confirmed on
//! ledger" across three channels (contactless tap, QR code and payment link)
//! and walks a payer's wallet through the upgrade to delegated, unattended
//! signing. It is transport-agnostic: everything remote goes through the
//! [`api::PaymentApi`] trait, implemented over HTTP by the `dltpay-http`
//! crate.
//!
//! # Overview
//!
//! A [`session::PaymentSession`] owns one [`intent::PaymentIntent`] and moves
//! it through `Idle → {Qr | WaitingNfc | LinkIssued} → Processing →
//! {Settled | Failed}`. A session settles at most once. Tap payments are
//! guarded by the [`reader::ChannelReader`], which debounces repeated reads of
//! the same card. QR payments and push-wallet signatures are observed with the
//! [`poller::SettlementPoller`].
//!
//! [`split::SplitOrchestrator`] divides a payment link into shares, each paid
//! through its own session. [`onboarding::AutoSignOnboarding`] takes a wallet
//! from connected to funded, trusted and delegated.
//!
//! # Modules
//!
//! - [`amount`] - Two-decimal money amounts
//! - [`api`] - The remote payment API trait and its wire types
//! - [`capability`] - Stablecoins, backends and per-wallet capabilities
//! - [`error`] - Error taxonomy, remediation and user-facing copy
//! - [`hooks`] - Session lifecycle hooks and the customer display mirror
//! - [`intent`] - Payment intents and their status lifecycle
//! - [`onboarding`] - Delegated-signing onboarding
//! - [`poller`] - Cooperative status polling
//! - [`qr`] - QR rendering
//! - [`quote`] - Live fiat-to-stablecoin quotes
//! - [`reader`] - Contactless reader with scan guarding
//! - [`session`] - The payment session state machine
//! - [`split`] - Bill splitting
//! - [`storage`] - Session storage and the persisted wallet identity
//! - [`wallet`] - The three wallet backends
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod amount;
pub mod api;
pub mod capability;
pub mod error;
pub mod hooks;
pub mod intent;
pub mod onboarding;
pub mod poller;
pub mod qr;
pub mod quote;
pub mod reader;
pub mod session;
pub mod split;
pub mod storage;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use api::BoxFuture;
pub use error::PaymentError;
