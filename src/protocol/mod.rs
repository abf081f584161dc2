//! Wire message parsing for the Google Play protocol.
//!
//! The service speaks two formats:
//!
//! * binary Protocol Buffers for checkin and all FDFE endpoints, with
//!   message definitions in [`protos`], and
//! * plain-text `key=value` lines for the auth endpoints, parsed by
//!   [`parse_key_values`].
//!
//! The [`decode`] helper wraps protobuf parsing with consistent logging:
//! decoded messages are logged at TRACE level, parse failures at ERROR
//! level with the offending byte count.

pub mod protos;

pub use protos::checkin::{
    AndroidBuildProto, AndroidCheckinProto, AndroidCheckinRequest, AndroidCheckinResponse,
    DeviceConfigurationProto,
};
pub use protos::fdfe::{
    AndroidAppDeliveryData, BrowseResponse, BulkDetailsRequest, BulkDetailsResponse, BuyResponse,
    DetailsResponse, ListResponse, Payload, ResponseWrapper, ReviewResponse, SearchResponse,
    UploadDeviceConfigRequest, UploadDeviceConfigResponse,
};

use std::collections::HashMap;

use protobuf::Message;

use crate::error::Result;

/// Parses and logs a binary protobuf response body.
///
/// # Arguments
///
/// * `body` - Raw response bytes to parse
/// * `origin` - Description of the endpoint for logging
///
/// # Errors
///
/// Returns [`Error::Decode`](crate::error::Error::Decode) if the bytes do
/// not form a valid message of type `T`.
pub fn decode<T>(body: &[u8], origin: &str) -> Result<T>
where
    T: Message + std::fmt::Debug,
{
    match T::parse_from_bytes(body) {
        Ok(message) => {
            trace!("{origin}: {message:?}");
            Ok(message)
        }
        Err(e) => {
            error!("{origin}: failed parsing {} byte response ({e})", body.len());
            Err(e.into())
        }
    }
}

/// Parses a plain-text `key=value` response body into a map.
///
/// The auth endpoints answer with one `key=value` pair per line instead of
/// the binary envelope used elsewhere. Values may themselves contain `=`;
/// only the first one separates key from value. Lines without a separator
/// are skipped.
#[must_use]
pub fn parse_key_values(body: &str) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| {
            line.split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
