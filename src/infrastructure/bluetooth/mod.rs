//! Bluetooth Module
//!
//! Provides BLE communication with the wearable band.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompanionService                       │
//! │   (single event loop - owns scan, link and readings)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ ServiceEvent queue
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐  ┌───────────┐  ┌───────────┐
//! │ Transport  │  │ Dispatch  │  │ Protocol  │
//! │            │  │           │  │           │
//! │ - WinRT    │  │ - Commands│  │ - Frames  │
//! │ - Simulated│  │ - Calls   │  │ - Parsing │
//! └────────────┘  └───────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame layouts, command encoding and sensor frame parsing
//! - [`transport`] - Adapter/link traits and the events transports raise
//! - [`dispatch`] - Maps commands and phone state to command frames
//! - [`service`] - Main service event loop
//! - [`simulated`] - In-process simulated band
//! - `winrt` - Windows BLE transport (Windows only)

pub mod dispatch;
pub mod protocol;
pub mod service;
pub mod simulated;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::{event_queue, CompanionService, EventQueue};
