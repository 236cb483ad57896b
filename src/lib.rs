//! Companion controller for BLE wearable bands: discovery, a supervised
//! link, sensor frame decoding and command dispatch.

pub mod domain;
pub mod infrastructure;
