//! # blecentral-server
//!
//! HTTP server library for the blecentral BLE central control plane.
//!
//! This library provides the API handlers and state management; the
//! `blecentral-server` binary wires them to a listener.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
