//! Mutable session state for one Google Play client.
//!
//! A [`Session`] carries everything the request pipeline reads on every
//! call: the account credentials, the device identity established by
//! checkin, the bearer token established by login, and the preferred
//! localization.
//!
//! # Lifecycle
//!
//! * created empty or with credentials;
//! * `android_id` and `security_token` are written together by the checkin
//!   flow and are only valid as a pair;
//! * `token` is written by login;
//! * `localization` is set explicitly by the caller.
//!
//! The pipeline never mutates the session; only the auth flow does. The
//! caller must not run checkin or login concurrently with other in-flight
//! requests.
//!
//! Secrets (password, bearer token) are redacted from `Debug` output.

use veil::Redact;

/// Session state shared by the auth flow and the request pipeline.
#[derive(Clone, Default, Redact)]
pub struct Session {
    /// Google account email.
    pub email: String,

    /// Google account password. Only read by the login calls.
    #[redact]
    pub password: String,

    /// Device id established by checkin, as lowercase hexadecimal.
    ///
    /// Only valid together with [`security_token`](Self::security_token):
    /// both come out of one checkin transaction.
    pub android_id: String,

    /// Checkin security token, as lowercase hexadecimal.
    pub security_token: String,

    /// Bearer token from the main service login, sent as
    /// `Authorization: GoogleLogin auth=<token>` on every data request.
    #[redact]
    pub token: Option<String>,

    /// Preferred localization, e.g. `en-US` or `tr-TR`.
    ///
    /// Affects localized fields such as descriptions and reviews. The
    /// application lists themselves depend on the caller's IP location.
    pub localization: Option<String>,
}

impl Session {
    /// Creates a session with account credentials.
    ///
    /// The device identity must then be established by checkin, or set
    /// directly with [`with_android_id`](Self::with_android_id).
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Creates a ready-to-login session with a known device id.
    #[must_use]
    pub fn with_android_id(
        email: impl Into<String>,
        password: impl Into<String>,
        android_id: impl Into<String>,
    ) -> Self {
        Self {
            android_id: android_id.into(),
            ..Self::new(email, password)
        }
    }

    /// The `Accept-Language` value for requests, defaulting to `en-EN`.
    #[must_use]
    pub fn accept_language(&self) -> &str {
        self.localization.as_deref().unwrap_or("en-EN")
    }
}
