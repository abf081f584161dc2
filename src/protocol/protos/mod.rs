//! Protocol Buffer definitions for the Google Play wire format.
//!
//! This module contains auto-generated Rust code from the Protocol Buffer
//! definitions in `protos/`:
//!
//! * `checkin.proto` - device registration request/response messages
//! * `fdfe.proto` - the FDFE response envelope and per-endpoint payloads
//!
//! # Code Generation
//!
//! The Rust code is generated during build using:
//! * `protobuf-codegen` compiler
//! * `.proto` source files in `protos/`
//! * Build configuration in `build.rs`
//!
//! Note: The generated code allows pedantic lints to avoid
//! warnings from the auto-generated implementations.

// Allow pedantic lints in generated code
#![allow(clippy::pedantic)]

// Include the generated Rust code from Protocol Buffers
include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
