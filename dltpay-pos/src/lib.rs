//! Headless point-of-sale terminal for dltpay.
//!
//! Takes payments by QR code, contactless card and payment link, splits bills
//! into shareable links and walks the vendor wallet through onboarding. The
//! payment logic lives in [`dltpay`]; this crate supplies configuration, the
//! line-based card reader, file-backed session storage and the command
//! surface.
//!
//! # Modules
//!
//! - [`cli`] - Command-line arguments
//! - [`commands`] - The [`Terminal`] that runs each command
//! - [`config`] - TOML configuration with environment variable expansion
//! - [`console`] - Operator-facing output
//! - [`device`] - Card reader fed by keyboard-wedge input
//! - [`error`] - Terminal error types
//! - [`store`] - JSON file session storage
//! - [`util`] - Signal handling

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod store;
pub mod util;

pub use commands::Terminal;
pub use error::PosError;
