//! The Google Play client: authentication flow, request pipeline and the
//! store operations.
//!
//! [`Market`] owns a [`Session`] and a [`Transport`] and exposes:
//!
//! * the authentication handshake - two-phase [`checkin`](Market::checkin),
//!   [`login_ac2dm`](Market::login_ac2dm) and [`login`](Market::login) -
//!   which is the only code that mutates the session, and
//! * the data operations (search, details, browse, list, reviews,
//!   recommendations, purchase, download, device-config upload), which are
//!   uniform applications of one pipeline: build the standard header set,
//!   execute a GET or POST, decode the FDFE envelope and pick the payload
//!   variant for the endpoint.
//!
//! # Sequencing
//!
//! Do not call checkin, login and download back to back: the service needs
//! a few seconds to propagate a fresh device pairing before it will serve
//! downloads. Checkin is meant to be called once per session; reuse the
//! generated device id afterwards. Auth calls must also not overlap with
//! other in-flight requests from the same client - the session is read on
//! every call and only the caller can serialize the mutation.
//!
//! # Optional parameters
//!
//! Every optional query or form parameter is an `Option`; `None` omits the
//! key entirely rather than sending an empty value.

use std::{collections::HashMap, sync::Arc};

use protobuf::{Message, MessageField};
use reqwest::Url;

use crate::{
    device::{self, DeviceProperties},
    error::{Error, Result},
    http::{Body, ByteStream, HttpTransport, Request, Transport, FORM_CONTENT_TYPE},
    protocol::{
        self, AndroidCheckinRequest, AndroidCheckinResponse, BrowseResponse, BulkDetailsRequest,
        BulkDetailsResponse, BuyResponse, DetailsResponse, ListResponse, Payload, ResponseWrapper,
        ReviewResponse, SearchResponse, UploadDeviceConfigRequest, UploadDeviceConfigResponse,
    },
    session::Session,
};

/// Sort order for [`Market::reviews`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ReviewSort {
    /// Most recent reviews first.
    Newest,
    /// Highest star ratings first.
    HighRating,
    /// Most helpful reviews first.
    Helpful,
}

impl ReviewSort {
    fn value(self) -> &'static str {
        match self {
            Self::Newest => "0",
            Self::HighRating => "1",
            Self::Helpful => "2",
        }
    }
}

/// Relation selector for [`Market::recommendations`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RecommendationType {
    /// Applications viewed by users who viewed this one.
    AlsoViewed,
    /// Applications installed by users who installed this one.
    AlsoInstalled,
}

impl RecommendationType {
    fn value(self) -> &'static str {
        match self {
            Self::AlsoViewed => "1",
            Self::AlsoInstalled => "2",
        }
    }
}

/// Optional request parameters: `None` values are omitted from the wire.
type Params<'a> = &'a [(&'static str, Option<String>)];

/// Client for the Google Play service.
pub struct Market {
    transport: Arc<dyn Transport>,
    session: Session,
    sdk: String,
}

impl Market {
    /// Checkin endpoint establishing the device identity.
    const CHECKIN_URL: &'static str = "https://android.clients.google.com/checkin";

    /// Login endpoint for both the AC2DM and the main service login.
    const LOGIN_URL: &'static str = "https://android.clients.google.com/auth";

    /// C2DM registration endpoint.
    const C2DM_REGISTER_URL: &'static str = "https://android.clients.google.com/c2dm/register2";

    /// Base URL for all data-fetching ("FDFE") endpoints.
    const FDFE_URL: &'static str = "https://android.clients.google.com/fdfe/";

    /// Value of the `Host` header on every request.
    const HOST: &'static str = "android.clients.google.com";

    /// Fixed client identifier expected by the service.
    const CLIENT_ID: &'static str = "am-android-google";

    /// SHA1 digest of the certificate on the `com.google.android.gsf`
    /// system package. The service does not appear to verify the value,
    /// but the parameter must be present.
    const CLIENT_SIG: &'static str = "38918a453d07199354f8b19af05ec6562ced5788";

    /// Account type sent on login.
    const ACCOUNT_TYPE: &'static str = "HOSTED_OR_GOOGLE";

    /// `Content-Type` of checkin requests. Note the non-standard spelling,
    /// distinct from the FDFE protobuf content type.
    const CHECKIN_CONTENT_TYPE: &'static str = "application/x-protobuffer";

    /// `Content-Type` of raw protobuf FDFE requests.
    const PROTOBUF_CONTENT_TYPE: &'static str = "application/x-protobuf";

    /// Experiment flags the client claims to have enabled.
    const ENABLED_EXPERIMENTS: &'static str = "cl:billing.select_add_instrument_by_default";

    /// Experiment flags the client claims not to support.
    const UNSUPPORTED_EXPERIMENTS: &'static str = "nocache:billing.use_charging_poller,\
        market_emails,buyer_currency,prod_baseline,checkin.set_asset_paid_app_field,\
        shekel_test,content_ratings,buyer_currency_in_app,nocache:encrypted_apk,recent_changes";

    /// Creates a client over the default pooled HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be built.
    pub fn new(session: Session) -> Result<Self> {
        Ok(Self::with_transport(session, Arc::new(HttpTransport::new()?)))
    }

    /// Creates a client over a caller-supplied transport.
    #[must_use]
    pub fn with_transport(session: Session, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            session,
            sdk: device::DEFAULT_SDK.to_string(),
        }
    }

    /// The current session state.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sets the localization sent as `Accept-Language`, e.g. `en-US` or
    /// `tr-TR`.
    ///
    /// Affects localized fields such as descriptions and reviews; the
    /// application lists themselves depend on the caller's IP location.
    pub fn set_localization(&mut self, localization: impl Into<String>) {
        self.session.localization = Some(localization.into());
    }

    /// Sets the sdk version used for the `User-Agent` profile lookup.
    ///
    /// The lookup is permissive: unsupported values produce empty
    /// User-Agent fields, which the service may reject.
    pub fn set_sdk(&mut self, sdk: impl Into<String>) {
        self.sdk = sdk.into();
    }

    /* ======================= authentication ====================== */

    /// Registers a device identity and pairs it with the account.
    ///
    /// Two-phase handshake:
    ///
    /// 1. a bootstrap checkin with no device id; the response assigns a
    ///    numeric android id and security token, stored in the session as
    ///    lowercase hexadecimal;
    /// 2. after an AC2DM login, a confirming checkin carrying the new
    ///    identity plus two account cookies - the literal `[<email>]` and
    ///    the AC2DM auth string.
    ///
    /// The returned response is the authoritative proof that device id,
    /// security token and account are paired. Call this once per session,
    /// and give the service a few seconds to propagate the pairing before
    /// requesting downloads.
    ///
    /// On failure the flow aborts without retrying; a failed second phase
    /// leaves the phase-1 identity in the session, so a bare retry would
    /// register yet another device.
    ///
    /// # Errors
    ///
    /// Any transport, protocol, decode or authentication error from either
    /// phase or the embedded AC2DM login.
    pub async fn checkin(
        &mut self,
        properties: &DeviceProperties,
    ) -> Result<AndroidCheckinResponse> {
        let bootstrap = self.post_checkin(device::default_checkin_request()).await?;
        self.session.android_id = format!("{:x}", bootstrap.android_id());
        self.session.security_token = format!("{:x}", bootstrap.security_token());
        debug!("checkin assigned device id {}", self.session.android_id);

        // The AC2DM token can only be fetched once phase 1 has produced a
        // device id, and is attached below as an account cookie.
        let c2dm_auth = self.login_ac2dm().await?;

        let mut request = if properties.is_default() {
            device::default_checkin_request()
        } else {
            device::checkin_request(properties)
        };
        // The service treats the id as raw 64 bits; the sign is irrelevant.
        #[allow(clippy::cast_possible_wrap)]
        {
            request.id = Some(parse_hex(&self.session.android_id)? as i64);
        }
        request.security_token = Some(parse_hex(&self.session.security_token)?);
        request.account_cookie.push(format!("[{}]", self.session.email));
        request.account_cookie.push(c2dm_auth);

        self.post_checkin(request).await
    }

    /// Logs into the AC2DM service and returns its auth string.
    ///
    /// The response is the plain-text `key=value` format, not the binary
    /// envelope.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] if the response carries no `Auth` key;
    /// transport and protocol errors pass through.
    pub async fn login_ac2dm(&self) -> Result<String> {
        let response = self
            .post_login(vec![
                ("Email", self.session.email.clone()),
                ("Passwd", self.session.password.clone()),
                ("service", "ac2dm".to_string()),
                ("accountType", Self::ACCOUNT_TYPE.to_string()),
                ("has_permission", "1".to_string()),
                ("source", "android".to_string()),
                ("app", "com.google.android.gsf".to_string()),
                ("device_country", "us".to_string()),
                ("lang", "en".to_string()),
                ("sdk_version", "23".to_string()),
                ("client_sig", Self::CLIENT_SIG.to_string()),
            ])
            .await?;

        response.get("Auth").cloned().ok_or(Error::Authentication)
    }

    /// Authenticates against the main service and stores the bearer token.
    ///
    /// The token ends up in the session and is sent as
    /// `Authorization: GoogleLogin auth=<token>` on every data request; it
    /// can be kept and passed to [`login_with_token`](Self::login_with_token)
    /// in later sessions instead of repeating the password login.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] if the response carries no `Auth` key; the
    /// session token is left unset in that case.
    pub async fn login(&mut self) -> Result<()> {
        let response = self
            .post_login(vec![
                ("Email", self.session.email.clone()),
                ("Passwd", self.session.password.clone()),
                ("service", "androidmarket".to_string()),
                ("accountType", Self::ACCOUNT_TYPE.to_string()),
                ("has_permission", "1".to_string()),
                ("source", "android".to_string()),
                ("androidId", self.session.android_id.clone()),
                ("app", "com.android.vending".to_string()),
                ("device_country", "US".to_string()),
                ("lang", "en".to_string()),
                ("sdk_version", "23".to_string()),
                ("client_sig", Self::CLIENT_SIG.to_string()),
            ])
            .await?;

        match response.get("Auth") {
            Some(token) => {
                self.session.token = Some(token.clone());
                Ok(())
            }
            None => Err(Error::Authentication),
        }
    }

    /// Stores a caller-provided bearer token without any network call.
    ///
    /// The token is trusted entirely; an invalid one surfaces later as a
    /// server-side rejection.
    pub fn login_with_token(&mut self, token: impl Into<String>) {
        self.session.token = Some(token.into());
    }

    /// Registers an application for C2DM push messages.
    ///
    /// Performs an AC2DM login, then posts the registration with the AC2DM
    /// auth string in the `Authorization` header and the decimal device
    /// id. Returns the parsed `key=value` response.
    ///
    /// # Errors
    ///
    /// Requires a checked-in device id; decode, transport, protocol and
    /// authentication errors pass through.
    pub async fn c2dm_register(
        &self,
        application: &str,
        sender: &str,
    ) -> Result<HashMap<String, String>> {
        let auth = self.login_ac2dm().await?;
        let device_id = parse_hex(&self.session.android_id)?;

        let url = Url::parse(Self::C2DM_REGISTER_URL)?;
        let pairs = vec![
            ("app".to_string(), application.to_string()),
            ("sender".to_string(), sender.to_string()),
            ("device".to_string(), device_id.to_string()),
        ];
        let request = Request::post(url, self.headers_with(Some(&auth), None), Body::Form(pairs));

        let bytes = self.transport.execute(request).await?;
        Ok(protocol::parse_key_values(&text(bytes)?))
    }

    /* ======================= operations ====================== */

    /// Searches the store for `query`.
    ///
    /// Offset and limit are optional; `None` lets the service pick its
    /// defaults.
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn search(
        &self,
        query: &str,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> Result<SearchResponse> {
        let payload = self
            .get(
                "search",
                &[
                    ("c", Some("3".to_string())),
                    ("q", Some(query.to_string())),
                    ("o", offset.map(|offset| offset.to_string())),
                    ("n", limit.map(|limit| limit.to_string())),
                ],
            )
            .await?;

        Ok(payload.search_response.unwrap_or_default())
    }

    /// Fetches detailed information about one package.
    ///
    /// For more than a handful of packages, prefer
    /// [`bulk_details`](Self::bulk_details).
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn details(&self, package: &str) -> Result<DetailsResponse> {
        let payload = self
            .get("details", &[("doc", Some(package.to_string()))])
            .await?;

        Ok(payload.details_response.unwrap_or_default())
    }

    /// Fetches details for many packages in one request.
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn bulk_details<I, S>(&self, packages: I) -> Result<BulkDetailsResponse>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = BulkDetailsRequest::new();
        request.docid = packages.into_iter().map(Into::into).collect();

        let payload = self
            .post_raw("bulkDetails", request.write_to_bytes()?)
            .await?;

        Ok(payload.bulk_details_response.unwrap_or_default())
    }

    /// Fetches the store categories, or one category's contents.
    ///
    /// With no arguments the available categories are returned.
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn browse(
        &self,
        category: Option<&str>,
        subcategory: Option<&str>,
    ) -> Result<BrowseResponse> {
        let payload = self
            .get(
                "browse",
                &[
                    ("c", Some("3".to_string())),
                    ("cat", category.map(String::from)),
                    ("ctr", subcategory.map(String::from)),
                ],
            )
            .await?;

        Ok(payload.browse_response.unwrap_or_default())
    }

    /// Lists applications within a category and subcategory.
    ///
    /// With `None` for the subcategory, the subcategories of `category`
    /// are listed instead. The service defaults offset and limit to 0 and
    /// 20 respectively.
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn list(
        &self,
        category: &str,
        subcategory: Option<&str>,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> Result<ListResponse> {
        let payload = self
            .get(
                "list",
                &[
                    ("c", Some("3".to_string())),
                    ("cat", Some(category.to_string())),
                    ("ctr", subcategory.map(String::from)),
                    ("o", offset.map(|offset| offset.to_string())),
                    ("n", limit.map(|limit| limit.to_string())),
                ],
            )
            .await?;

        Ok(payload.list_response.unwrap_or_default())
    }

    /// Fetches reviews of a package.
    ///
    /// The service defaults offset and limit to 0 and 20 respectively.
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn reviews(
        &self,
        package: &str,
        sort: Option<ReviewSort>,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> Result<ReviewResponse> {
        let payload = self
            .get(
                "rev",
                &[
                    ("doc", Some(package.to_string())),
                    ("sort", sort.map(|sort| sort.value().to_string())),
                    ("o", offset.map(|offset| offset.to_string())),
                    ("n", limit.map(|limit| limit.to_string())),
                ],
            )
            .await?;

        Ok(payload.review_response.unwrap_or_default())
    }

    /// Fetches recommendations related to a package.
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn recommendations(
        &self,
        package: &str,
        relation: Option<RecommendationType>,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> Result<ListResponse> {
        let payload = self
            .get(
                "rec",
                &[
                    ("c", Some("3".to_string())),
                    ("doc", Some(package.to_string())),
                    ("rt", relation.map(|relation| relation.value().to_string())),
                    ("o", offset.map(|offset| offset.to_string())),
                    ("n", limit.map(|limit| limit.to_string())),
                ],
            )
            .await?;

        Ok(payload.list_response.unwrap_or_default())
    }

    /// Fetches the download URL and cookie for a package.
    ///
    /// Despite the name this is free-app "purchasing" only: the endpoint
    /// hands out delivery data, no payment is involved.
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn purchase(
        &self,
        package: &str,
        version_code: i32,
        offer_type: i32,
    ) -> Result<BuyResponse> {
        let payload = self
            .post_form(
                "purchase",
                &[
                    ("ot", Some(offer_type.to_string())),
                    ("doc", Some(package.to_string())),
                    ("vc", Some(version_code.to_string())),
                ],
            )
            .await?;

        Ok(payload.buy_response.unwrap_or_default())
    }

    /// Downloads an application package.
    ///
    /// Purchases the package to obtain delivery data, then streams the
    /// package bytes from the delivery URL with its auth cookie. Version
    /// code and offer type come from a prior [`details`](Self::details)
    /// call.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] if the purchase response carries no download
    /// cookie; transport and protocol errors pass through.
    pub async fn download(
        &self,
        package: &str,
        version_code: i32,
        offer_type: i32,
    ) -> Result<ByteStream> {
        let buy = self.purchase(package, version_code, offer_type).await?;
        let delivery = buy
            .purchase_status_response
            .unwrap_or_default()
            .app_delivery_data
            .unwrap_or_default();

        let cookie = delivery.download_auth_cookie.first().ok_or_else(|| {
            Error::Decode("purchase response carried no download auth cookie".to_string())
        })?;
        let cookie = format!("{}={}", cookie.name(), cookie.value());

        self.execute_download(delivery.download_url(), &cookie).await
    }

    /// Streams a download URL with the given cookie string.
    ///
    /// Exposed separately so delivery data from an earlier purchase can be
    /// reused.
    ///
    /// # Errors
    ///
    /// Transport and protocol errors pass through; [`Error::Decode`] if
    /// the URL is malformed.
    pub async fn execute_download(&self, url: &str, cookie: &str) -> Result<ByteStream> {
        let url = Url::parse(url)?;
        let headers = vec![
            ("Cookie", cookie.to_string()),
            ("User-Agent", device::DOWNLOAD_USER_AGENT.to_string()),
        ];

        self.transport.stream(Request::get(url, headers)).await
    }

    /// Uploads a device configuration, registering the device with the
    /// account so it shows up in the store's device list.
    ///
    /// # Errors
    ///
    /// Transport, protocol and decode errors pass through.
    pub async fn upload_device_config(
        &self,
        properties: &DeviceProperties,
    ) -> Result<UploadDeviceConfigResponse> {
        let mut request = UploadDeviceConfigRequest::new();
        request.device_configuration = MessageField::some(if properties.is_default() {
            device::default_device_config()
        } else {
            device::device_config(properties)
        });

        let payload = self
            .post_raw("uploadDeviceConfig", request.write_to_bytes()?)
            .await?;

        Ok(payload.upload_device_config_response.unwrap_or_default())
    }

    /* ======================= request pipeline ====================== */

    /// The standard header set, with the session's bearer token.
    fn headers(&self, content_type: Option<&str>) -> Vec<(&'static str, String)> {
        self.headers_with(self.session.token.as_deref(), content_type)
    }

    /// The standard header set with an explicit auth token.
    ///
    /// Headers whose value would be empty (no token, no device id yet) are
    /// omitted rather than sent blank. Two calls with identical inputs
    /// produce identical output.
    fn headers_with(
        &self,
        token: Option<&str>,
        content_type: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut headers = vec![(
            "Accept-Language",
            self.session.accept_language().to_string(),
        )];

        if let Some(token) = token {
            headers.push(("Authorization", format!("GoogleLogin auth={token}")));
        }

        headers.extend([
            (
                "X-DFE-Enabled-Experiments",
                Self::ENABLED_EXPERIMENTS.to_string(),
            ),
            (
                "X-DFE-Unsupported-Experiments",
                Self::UNSUPPORTED_EXPERIMENTS.to_string(),
            ),
            ("X-DFE-Device-Id", self.session.android_id.clone()),
            ("X-DFE-Client-Id", Self::CLIENT_ID.to_string()),
            ("User-Agent", device::user_agent(&self.sdk)),
            ("X-DFE-SmallestScreenWidthDp", "320".to_string()),
            ("X-DFE-Filter-Level", "3".to_string()),
            ("Host", Self::HOST.to_string()),
            (
                "Content-Type",
                content_type.unwrap_or(FORM_CONTENT_TYPE).to_string(),
            ),
        ]);

        headers.retain(|(_, value)| !value.is_empty());
        headers
    }

    /// Executes a GET against an FDFE endpoint and decodes the envelope.
    async fn get(&self, path: &str, params: Params<'_>) -> Result<Payload> {
        let mut url = Url::parse(&format!("{}{path}", Self::FDFE_URL))?;
        if params.iter().any(|(_, value)| value.is_some()) {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                if let Some(value) = value {
                    query.append_pair(key, value);
                }
            }
        }

        let request = Request::get(url, self.headers(None));
        let bytes = self.transport.execute(request).await?;
        self.envelope(&bytes, path)
    }

    /// Executes a form POST against an FDFE endpoint and decodes the
    /// envelope.
    async fn post_form(&self, path: &str, params: Params<'_>) -> Result<Payload> {
        let url = Url::parse(&format!("{}{path}", Self::FDFE_URL))?;
        let pairs = params
            .iter()
            .filter_map(|(key, value)| {
                value
                    .as_ref()
                    .map(|value| ((*key).to_string(), value.clone()))
            })
            .collect();

        let request = Request::post(url, self.headers(None), Body::Form(pairs));
        let bytes = self.transport.execute(request).await?;
        self.envelope(&bytes, path)
    }

    /// Executes a raw protobuf POST against an FDFE endpoint and decodes
    /// the envelope. No parameter dropping applies; the payload is
    /// pre-encoded by the caller.
    async fn post_raw(&self, path: &str, body: Vec<u8>) -> Result<Payload> {
        let url = Url::parse(&format!("{}{path}", Self::FDFE_URL))?;
        let request = Request::post(
            url,
            self.headers(Some(Self::PROTOBUF_CONTENT_TYPE)),
            Body::Raw(body),
        );

        let bytes = self.transport.execute(request).await?;
        self.envelope(&bytes, path)
    }

    /// Decodes the FDFE response envelope.
    fn envelope(&self, bytes: &[u8], origin: &str) -> Result<Payload> {
        let wrapper: ResponseWrapper = protocol::decode(bytes, origin)?;
        Ok(wrapper.payload.unwrap_or_default())
    }

    /// Posts a checkin request with the checkin-specific header set.
    async fn post_checkin(&self, request: AndroidCheckinRequest) -> Result<AndroidCheckinResponse> {
        let url = Url::parse(Self::CHECKIN_URL)?;
        let headers = vec![
            ("User-Agent", device::CHECKIN_USER_AGENT.to_string()),
            ("Host", Self::HOST.to_string()),
            ("Content-Type", Self::CHECKIN_CONTENT_TYPE.to_string()),
        ];
        let body = request.write_to_bytes()?;

        let bytes = self
            .transport
            .execute(Request::post(url, headers, Body::Raw(body)))
            .await?;
        protocol::decode(&bytes, "checkin")
    }

    /// Posts a login form and parses the plain-text response.
    ///
    /// The auth endpoint takes no standard headers; the form content type
    /// is applied by the transport.
    async fn post_login(
        &self,
        fields: Vec<(&'static str, String)>,
    ) -> Result<HashMap<String, String>> {
        let url = Url::parse(Self::LOGIN_URL)?;
        let pairs = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();

        let bytes = self
            .transport
            .execute(Request::post(url, Vec::new(), Body::Form(pairs)))
            .await?;
        Ok(protocol::parse_key_values(&text(bytes)?))
    }
}

/// Parses a lowercase hexadecimal session field back to its numeric form.
fn parse_hex(value: &str) -> Result<u64> {
    u64::from_str_radix(value, 16)
        .map_err(|e| Error::Decode(format!("invalid hexadecimal device identity: {e}")))
}

/// Decodes response bytes as UTF-8 text.
fn text(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use futures_util::TryStreamExt;
    use protobuf::{Message, MessageField};

    use super::*;
    use crate::protocol::protos::fdfe;

    /// Transport that replays a scripted list of responses and records
    /// every request it executes.
    struct MockTransport {
        requests: Mutex<Vec<Request>>,
        responses: Mutex<VecDeque<Result<Vec<u8>>>>,
    }

    impl MockTransport {
        fn scripted(responses: Vec<Result<Vec<u8>>>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.into()),
            })
        }

        fn recorded(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, request: Request) -> Result<Vec<u8>> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Decode("mock script exhausted".to_string())))
        }

        async fn stream(&self, request: Request) -> Result<ByteStream> {
            let bytes = self.execute(request).await?;
            Ok(Box::pin(futures_util::stream::once(async move {
                Ok(bytes)
            })))
        }
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn market_with(responses: Vec<Result<Vec<u8>>>) -> (Market, Arc<MockTransport>) {
        init_logging();
        let transport = MockTransport::scripted(responses);
        let session = Session::new("user@gmail.com", "hunter2");
        (
            Market::with_transport(session, Arc::clone(&transport) as Arc<dyn Transport>),
            transport,
        )
    }

    fn logged_in_market(responses: Vec<Result<Vec<u8>>>) -> (Market, Arc<MockTransport>) {
        let (mut market, transport) = market_with(responses);
        market.session.android_id = "3a107cdb8e5c".to_string();
        market.login_with_token("tokentoken");
        (market, transport)
    }

    fn envelope_bytes(payload: fdfe::Payload) -> Vec<u8> {
        let mut wrapper = ResponseWrapper::new();
        wrapper.payload = MessageField::some(payload);
        wrapper.write_to_bytes().unwrap()
    }

    fn search_envelope() -> Vec<u8> {
        let mut search = SearchResponse::new();
        search.original_query = Some("foo".to_string());
        let mut payload = fdfe::Payload::new();
        payload.search_response = MessageField::some(search);
        envelope_bytes(payload)
    }

    fn checkin_response(android_id: u64, security_token: u64) -> Vec<u8> {
        let mut response = AndroidCheckinResponse::new();
        response.android_id = Some(android_id);
        response.security_token = Some(security_token);
        response.stats_ok = Some(true);
        response.write_to_bytes().unwrap()
    }

    fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    #[tokio::test]
    async fn get_drops_none_parameters_and_preserves_order() {
        let (market, transport) = logged_in_market(vec![Ok(search_envelope())]);

        market.search("foo", None, None).await.unwrap();

        let recorded = transport.recorded();
        assert_eq!(recorded[0].url.query(), Some("c=3&q=foo"));
    }

    #[tokio::test]
    async fn get_appends_present_parameters() {
        let (market, transport) = logged_in_market(vec![Ok(search_envelope())]);

        market.search("foo", Some(10), Some(20)).await.unwrap();

        let recorded = transport.recorded();
        assert_eq!(recorded[0].url.query(), Some("c=3&q=foo&o=10&n=20"));
    }

    #[tokio::test]
    async fn standard_headers_carry_identity_and_token() {
        let (market, transport) = logged_in_market(vec![Ok(search_envelope())]);

        market.search("foo", None, None).await.unwrap();

        let recorded = transport.recorded();
        let request = &recorded[0];
        assert_eq!(
            header(request, "Authorization"),
            Some("GoogleLogin auth=tokentoken")
        );
        assert_eq!(header(request, "X-DFE-Device-Id"), Some("3a107cdb8e5c"));
        assert_eq!(header(request, "X-DFE-Client-Id"), Some("am-android-google"));
        assert_eq!(header(request, "Accept-Language"), Some("en-EN"));
        assert_eq!(header(request, "Host"), Some("android.clients.google.com"));
        assert_eq!(
            header(request, "User-Agent"),
            Some(device::user_agent("23").as_str())
        );
        assert_eq!(header(request, "Content-Type"), Some(FORM_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn headers_omit_absent_values() {
        let (market, transport) = market_with(vec![Ok(search_envelope())]);

        // No token, no device id yet.
        market.search("foo", None, None).await.unwrap();

        let recorded = transport.recorded();
        let request = &recorded[0];
        assert_eq!(header(request, "Authorization"), None);
        assert_eq!(header(request, "X-DFE-Device-Id"), None);
        assert!(request.headers.iter().all(|(_, value)| !value.is_empty()));
    }

    #[tokio::test]
    async fn header_building_is_idempotent() {
        let (market, transport) =
            logged_in_market(vec![Ok(search_envelope()), Ok(search_envelope())]);

        market.search("foo", None, None).await.unwrap();
        market.search("foo", None, None).await.unwrap();

        let recorded = transport.recorded();
        assert_eq!(recorded[0].headers, recorded[1].headers);
        assert_eq!(recorded[0].url, recorded[1].url);
    }

    #[tokio::test]
    async fn localization_overrides_accept_language() {
        let (mut market, transport) = logged_in_market(vec![Ok(search_envelope())]);
        market.set_localization("tr-TR");

        market.search("foo", None, None).await.unwrap();

        let recorded = transport.recorded();
        assert_eq!(header(&recorded[0], "Accept-Language"), Some("tr-TR"));
    }

    #[tokio::test]
    async fn login_stores_bearer_token() {
        let (mut market, transport) =
            market_with(vec![Ok(b"SID=123\nAuth=secrettoken\n".to_vec())]);

        market.login().await.unwrap();

        assert_eq!(market.session().token.as_deref(), Some("secrettoken"));
        let recorded = transport.recorded();
        match &recorded[0].body {
            Some(Body::Form(pairs)) => {
                assert!(pairs.contains(&("service".to_string(), "androidmarket".to_string())));
                assert!(pairs.contains(&("Email".to_string(), "user@gmail.com".to_string())));
            }
            other => panic!("expected form body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn login_without_auth_key_fails_and_leaves_token_unset() {
        let (mut market, _transport) = market_with(vec![Ok(b"SID=123\nLSID=456\n".to_vec())]);

        let result = market.login().await;

        assert!(matches!(result, Err(Error::Authentication)));
        assert!(market.session().token.is_none());
    }

    #[tokio::test]
    async fn login_with_token_makes_no_network_call() {
        let (mut market, transport) = market_with(Vec::new());

        market.login_with_token("cached");

        assert_eq!(market.session().token.as_deref(), Some("cached"));
        assert!(transport.recorded().is_empty());
    }

    #[tokio::test]
    async fn checkin_pairs_device_and_account() {
        let (mut market, transport) = market_with(vec![
            Ok(checkin_response(291, 4660)),
            Ok(b"Auth=c2dmtoken\n".to_vec()),
            Ok(checkin_response(291, 4660)),
        ]);

        market
            .checkin(&DeviceProperties::reference())
            .await
            .unwrap();

        // 291 and 4660 decimal are 123 and 1234 hexadecimal.
        assert_eq!(market.session().android_id, "123");
        assert_eq!(market.session().security_token, "1234");

        let recorded = transport.recorded();
        assert_eq!(recorded.len(), 3);

        // Phase 1 uses the checkin-specific header set.
        assert_eq!(
            header(&recorded[0], "User-Agent"),
            Some(device::CHECKIN_USER_AGENT)
        );
        assert_eq!(
            header(&recorded[0], "Content-Type"),
            Some("application/x-protobuffer")
        );

        // The AC2DM login in between is a plain form post.
        match &recorded[1].body {
            Some(Body::Form(pairs)) => {
                assert!(pairs.contains(&("service".to_string(), "ac2dm".to_string())));
            }
            other => panic!("expected form body, got {other:?}"),
        }

        // Phase 2 carries the identity and both account cookies.
        let Some(Body::Raw(bytes)) = &recorded[2].body else {
            panic!("expected raw body");
        };
        let confirm = AndroidCheckinRequest::parse_from_bytes(bytes).unwrap();
        assert_eq!(confirm.id(), 291);
        assert_eq!(confirm.security_token(), 4660);
        assert_eq!(
            confirm.account_cookie,
            vec!["[user@gmail.com]".to_string(), "c2dmtoken".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_confirm_checkin_keeps_bootstrap_identity() {
        let (mut market, _transport) = market_with(vec![
            Ok(checkin_response(291, 4660)),
            // AC2DM response without an Auth key aborts the flow.
            Ok(b"Error=BadAuthentication\n".to_vec()),
        ]);

        let result = market.checkin(&DeviceProperties::reference()).await;

        assert!(matches!(result, Err(Error::Authentication)));
        // Retry hazard: the bootstrap identity survives the failure.
        assert_eq!(market.session().android_id, "123");
        assert_eq!(market.session().security_token, "1234");
    }

    #[tokio::test]
    async fn protocol_error_carries_body_verbatim() {
        let (market, _transport) = logged_in_market(vec![Err(Error::Protocol(
            "You must be logged in.".to_string(),
        ))]);

        let result = market.search("foo", None, None).await;

        match result {
            Err(Error::Protocol(body)) => assert_eq!(body, "You must be logged in."),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_envelope_is_a_decode_error() {
        let (market, _transport) = logged_in_market(vec![Ok(vec![0x0b])]);

        let result = market.search("foo", None, None).await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn bulk_details_posts_raw_protobuf() {
        let mut payload = fdfe::Payload::new();
        payload.bulk_details_response = MessageField::some(BulkDetailsResponse::new());
        let (market, transport) = logged_in_market(vec![Ok(envelope_bytes(payload))]);

        market
            .bulk_details(["com.example.one", "com.example.two"])
            .await
            .unwrap();

        let recorded = transport.recorded();
        assert_eq!(
            header(&recorded[0], "Content-Type"),
            Some("application/x-protobuf")
        );
        let Some(Body::Raw(bytes)) = &recorded[0].body else {
            panic!("expected raw body");
        };
        let request = BulkDetailsRequest::parse_from_bytes(bytes).unwrap();
        assert_eq!(request.docid, vec!["com.example.one", "com.example.two"]);
    }

    #[tokio::test]
    async fn download_follows_delivery_data() {
        let mut cookie = fdfe::HttpCookie::new();
        cookie.name = Some("MarketDA".to_string());
        cookie.value = Some("42".to_string());

        let mut delivery = fdfe::AndroidAppDeliveryData::new();
        delivery.download_url = Some("https://android.clients.google.com/market/download".to_string());
        delivery.download_auth_cookie.push(cookie);

        let mut status = fdfe::PurchaseStatusResponse::new();
        status.app_delivery_data = MessageField::some(delivery);
        let mut buy = BuyResponse::new();
        buy.purchase_status_response = MessageField::some(status);
        let mut payload = fdfe::Payload::new();
        payload.buy_response = MessageField::some(buy);

        let (market, transport) = logged_in_market(vec![
            Ok(envelope_bytes(payload)),
            Ok(b"apk bytes".to_vec()),
        ]);

        let stream = market.download("com.example.one", 7, 1).await.unwrap();
        let chunks: Vec<Vec<u8>> = stream.try_collect().await.unwrap();
        assert_eq!(chunks, vec![b"apk bytes".to_vec()]);

        let recorded = transport.recorded();
        // Purchase first, then the authenticated fetch.
        match &recorded[0].body {
            Some(Body::Form(pairs)) => {
                assert!(pairs.contains(&("doc".to_string(), "com.example.one".to_string())));
                assert!(pairs.contains(&("vc".to_string(), "7".to_string())));
                assert!(pairs.contains(&("ot".to_string(), "1".to_string())));
            }
            other => panic!("expected form body, got {other:?}"),
        }
        assert_eq!(
            recorded[1].url.as_str(),
            "https://android.clients.google.com/market/download"
        );
        assert_eq!(header(&recorded[1], "Cookie"), Some("MarketDA=42"));
        assert_eq!(
            header(&recorded[1], "User-Agent"),
            Some(device::DOWNLOAD_USER_AGENT)
        );
    }

    #[tokio::test]
    async fn download_without_cookie_is_a_decode_error() {
        let mut payload = fdfe::Payload::new();
        payload.buy_response = MessageField::some(BuyResponse::new());
        let (market, _transport) = logged_in_market(vec![Ok(envelope_bytes(payload))]);

        let result = market.download("com.example.one", 7, 1).await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn upload_device_config_posts_configuration() {
        let mut payload = fdfe::Payload::new();
        payload.upload_device_config_response =
            MessageField::some(UploadDeviceConfigResponse::new());
        let (market, transport) = logged_in_market(vec![Ok(envelope_bytes(payload))]);

        market
            .upload_device_config(&DeviceProperties::reference())
            .await
            .unwrap();

        let recorded = transport.recorded();
        let Some(Body::Raw(bytes)) = &recorded[0].body else {
            panic!("expected raw body");
        };
        let request = UploadDeviceConfigRequest::parse_from_bytes(bytes).unwrap();
        assert!(request.device_configuration.is_some());
    }

    #[tokio::test]
    async fn c2dm_register_sends_decimal_device_id() {
        let (market, transport) = {
            let (mut market, transport) = market_with(vec![
                Ok(b"Auth=c2dmtoken\n".to_vec()),
                Ok(b"token=registration\n".to_vec()),
            ]);
            market.session.android_id = "123".to_string();
            (market, transport)
        };

        let response = market
            .c2dm_register("com.example.one", "sender@gmail.com")
            .await
            .unwrap();
        assert_eq!(response.get("token").map(String::as_str), Some("registration"));

        let recorded = transport.recorded();
        // The registration call authorizes with the AC2DM token.
        assert_eq!(
            header(&recorded[1], "Authorization"),
            Some("GoogleLogin auth=c2dmtoken")
        );
        match &recorded[1].body {
            Some(Body::Form(pairs)) => {
                // 0x123 sent as decimal.
                assert!(pairs.contains(&("device".to_string(), "291".to_string())));
            }
            other => panic!("expected form body, got {other:?}"),
        }
    }
}
