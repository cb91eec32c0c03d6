#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the dltpay payment API.
//!
//! Implements [`dltpay::api::PaymentApi`] over `reqwest` and keeps the
//! per-wallet tokens the protected store endpoints require.
//!
//! # Modules
//!
//! - [`client`] - [`HttpPaymentApi`], the `PaymentApi` implementation
//! - [`auth`] - Wallet-auth token cache and header names
//! - [`error`] - HTTP transport error types
//!
//! # Feature Flags
//!
//! - `telemetry` - Request spans and failure events via `tracing`

pub mod auth;
pub mod client;
pub mod error;

pub use client::{DEFAULT_BASE_URL, HttpPaymentApi};
pub use error::HttpApiError;
