//! Client library for the Google Play ("Finsky") service.
//!
//! Talks the mobile store protocol directly: a device checkin handshake to
//! obtain an Android device identity, the `GoogleLogin` authentication
//! flow, and the protobuf-over-HTTP FDFE endpoints behind the store's
//! search, details, browse, reviews, purchase and download features.
//!
//! The entry point is [`market::Market`], driven by a
//! [`session::Session`] holding the account credentials and device
//! identity. See the module docs for the sequencing rules around checkin
//! and login.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod device;
pub mod error;
pub mod http;
pub mod market;
pub mod protocol;
pub mod session;
