//! Device profiles and checkin request construction.
//!
//! The service only talks to callers that look like a real Android device.
//! This module is the single place where that disguise lives:
//!
//! * static sdk-version tables mapping to Android release labels and Play
//!   Store version codes,
//! * the `Android-Finsky` User-Agent synthesis plus the fixed checkin and
//!   download User-Agents,
//! * the reference-device constants (one physical device, reproduced
//!   verbatim for server compatibility), and
//! * builders for the checkin request and device configuration messages,
//!   either for the reference device or from a caller-supplied
//!   [`DeviceProperties`] bag.
//!
//! All tables are process-wide read-only constants; lookups are pure and
//! never fail. Unknown sdk versions yield empty fields, which the server
//! may or may not accept - callers are expected to pass supported values.

use std::collections::HashMap;

use protobuf::MessageField;

use crate::protocol::{
    AndroidBuildProto, AndroidCheckinProto, AndroidCheckinRequest, DeviceConfigurationProto,
};

/// The sdk version used when none is specified.
pub const DEFAULT_SDK: &str = "23";

/// User-Agent for the checkin endpoint.
pub const CHECKIN_USER_AGENT: &str = "Android-Checkin/2.0 (generic JRO03E); gzip";

/// User-Agent for download requests.
pub const DOWNLOAD_USER_AGENT: &str =
    "AndroidDownloadManager/5.1.1 (Linux; U; Android 5.1.1; SAMSUNG-SM-G530AZ Build/LMY47V)";

/// Reference device codename (a Redmi 2, `wt88047`).
const DEVICE: &str = "wt88047";
/// Reference device hardware platform.
const HARDWARE: &str = "mt6592";
/// Reference device product name.
const PRODUCT: &str = "wt88047";
/// Reference device build fingerprint tail.
const BUILD: &str = "LMY47V:user";
/// Reference device build id.
const BUILD_ID: &str = "LMY47V";
/// Reference device model.
const MODEL: &str = "2014811";
/// Reference device manufacturer.
const MANUFACTURER: &str = "Xiaomi";

/// Header values associated with one sdk version.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Profile {
    /// Android release label, e.g. `6.0 Marshmallow`.
    pub release_label: &'static str,
    /// Play Store version code for this release, if known.
    pub version_code: &'static str,
}

/// Looks up the [`Profile`] for an sdk version.
///
/// Pure table lookup. Unknown sdk versions yield empty fields rather than
/// an error; it is the caller's responsibility to pass supported values.
#[must_use]
pub fn lookup(sdk: &str) -> Profile {
    let release_label = match sdk {
        "10" => "2.3.3 Gingerbread",
        "11" => "3.0 Honeycomb",
        "12" => "3.1 Honeycomb",
        "13" => "3.2 Honeycomb",
        "14" => "4.0 Ice Cream Sandwich",
        "15" => "4.0.3 Ice Cream Sandwich",
        "16" => "4.1 Jelly Bean",
        "17" => "4.2 Jelly Bean",
        "18" => "4.3 Jelly Bean",
        "19" => "4.4 KitKat",
        "20" => "4.4W",
        "21" => "5.1.11",
        "22" => "5.1 Lollipop",
        "23" => "6.0 Marshmallow",
        "24" => "7.0 Nougat",
        _ => "",
    };

    // Version codes are only pinned for the releases the service has been
    // observed to accept.
    let version_code = match sdk {
        "21" => "80310011",
        "23" => "80682400",
        _ => "",
    };

    Profile {
        release_label,
        version_code,
    }
}

/// Synthesizes the `Android-Finsky` User-Agent for an sdk version.
///
/// The device, hardware, product and build tokens mimic the reference
/// device and must be reproduced verbatim for server compatibility.
#[must_use]
pub fn user_agent(sdk: &str) -> String {
    let profile = lookup(sdk);
    format!(
        "Android-Finsky/{} (versionCode={},sdk={sdk},device={DEVICE},hardware={HARDWARE},product={PRODUCT},build={BUILD})",
        profile.release_label, profile.version_code,
    )
}

/// Free-form device description used by checkin and device-config upload.
///
/// The bag mirrors a Java-style properties file. A `default=true` entry
/// selects the built-in reference device regardless of the other keys.
/// Recognized keys:
///
/// * build: `build.id`, `build.product`, `build.device`, `build.model`,
///   `build.manufacturer`, `build.bootloader`, `build.client`,
///   `build.sdkversion`, `build.timestamp`, `build.googleservices`
/// * network: `celloperator`, `simoperator`, `roaming`
/// * locale: `locale`, `timezone`, `usernumber`
/// * configuration: `touchscreen`, `keyboard`, `navigation`,
///   `screenlayout`, `hashardkeyboard`, `hasfivewaynavigation`,
///   `screendensity`, `glesversion`, `screenwidth`, `screenheight`,
///   `sharedlibraries`, `features`, `nativeplatforms`, `locales`,
///   `glextensions` (list values are comma separated)
#[derive(Clone, Debug, Default)]
pub struct DeviceProperties(HashMap<String, String>);

impl DeviceProperties {
    /// The reference device, equivalent to a bag containing only
    /// `default=true`.
    #[must_use]
    pub fn reference() -> Self {
        let mut properties = HashMap::new();
        properties.insert("default".to_string(), "true".to_string());
        Self(properties)
    }

    /// Whether the built-in reference device should be used.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0.get("default").is_some_and(|flag| flag == "true")
    }

    fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.0.get(key).map_or(default, String::as_str)
    }

    fn get_i32(&self, key: &str, default: i32) -> i32 {
        self.0
            .get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.0
            .get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.0.get(key).map_or(default, |value| value == "true")
    }

    fn get_list(&self, key: &str) -> Vec<String> {
        self.0.get(key).map_or_else(Vec::new, |value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect()
        })
    }
}

impl From<HashMap<String, String>> for DeviceProperties {
    fn from(properties: HashMap<String, String>) -> Self {
        Self(properties)
    }
}

/// Builds the bootstrap checkin request for the reference device.
///
/// This is the request sent with no device id yet; the response assigns
/// one.
#[must_use]
pub fn default_checkin_request() -> AndroidCheckinRequest {
    checkin_request(&DeviceProperties::reference())
}

/// Builds a checkin request from a [`DeviceProperties`] bag.
///
/// Keys that are absent fall back to the reference device values.
#[must_use]
pub fn checkin_request(properties: &DeviceProperties) -> AndroidCheckinRequest {
    let mut build = AndroidBuildProto::new();
    build.id = Some(properties.get("build.id", BUILD_ID).to_string());
    build.product = Some(properties.get("build.product", PRODUCT).to_string());
    build.device = Some(properties.get("build.device", DEVICE).to_string());
    build.model = Some(properties.get("build.model", MODEL).to_string());
    build.manufacturer = Some(properties.get("build.manufacturer", MANUFACTURER).to_string());
    build.bootloader = Some(properties.get("build.bootloader", "unknown").to_string());
    build.client = Some(properties.get("build.client", "android-google").to_string());
    build.sdk_version = Some(properties.get_i32("build.sdkversion", 23));
    build.timestamp = Some(properties.get_i64("build.timestamp", 0));
    build.google_services = Some(properties.get_i32("build.googleservices", 16));

    let mut checkin = AndroidCheckinProto::new();
    checkin.build = MessageField::some(build);
    checkin.last_checkin_msec = Some(0);
    checkin.cell_operator = Some(properties.get("celloperator", "310260").to_string());
    checkin.sim_operator = Some(properties.get("simoperator", "310260").to_string());
    checkin.roaming = Some(properties.get("roaming", "mobile-notroaming").to_string());
    checkin.user_number = Some(properties.get_i32("usernumber", 0));

    let mut request = AndroidCheckinRequest::new();
    request.id = Some(0);
    request.checkin = MessageField::some(checkin);
    request.locale = Some(properties.get("locale", "en_US").to_string());
    request.time_zone = Some(properties.get("timezone", "America/New_York").to_string());
    request.version = Some(3);
    request.fragment = Some(0);
    request.device_configuration = MessageField::some(device_config(properties));
    request
}

/// Builds the device configuration for the reference device.
#[must_use]
pub fn default_device_config() -> DeviceConfigurationProto {
    device_config(&DeviceProperties::reference())
}

/// Builds a device configuration from a [`DeviceProperties`] bag.
#[must_use]
pub fn device_config(properties: &DeviceProperties) -> DeviceConfigurationProto {
    let mut config = DeviceConfigurationProto::new();
    config.touch_screen = Some(properties.get_i32("touchscreen", 3));
    config.keyboard = Some(properties.get_i32("keyboard", 1));
    config.navigation = Some(properties.get_i32("navigation", 1));
    config.screen_layout = Some(properties.get_i32("screenlayout", 2));
    config.has_hard_keyboard = Some(properties.get_bool("hashardkeyboard", false));
    config.has_five_way_navigation = Some(properties.get_bool("hasfivewaynavigation", false));
    config.screen_density = Some(properties.get_i32("screendensity", 320));
    config.gl_es_version = Some(properties.get_i32("glesversion", 0x0002_0000));
    config.screen_width = Some(properties.get_i32("screenwidth", 720));
    config.screen_height = Some(properties.get_i32("screenheight", 1280));

    if properties.is_default() {
        config.system_shared_library = vec![
            "android.test.runner".to_string(),
            "com.android.future.usb.accessory".to_string(),
            "com.android.location.provider".to_string(),
            "javax.obex".to_string(),
        ];
        config.system_available_feature = vec![
            "android.hardware.bluetooth".to_string(),
            "android.hardware.camera".to_string(),
            "android.hardware.location".to_string(),
            "android.hardware.screen.portrait".to_string(),
            "android.hardware.telephony".to_string(),
            "android.hardware.touchscreen".to_string(),
            "android.hardware.wifi".to_string(),
        ];
        config.native_platform = vec!["armeabi-v7a".to_string(), "armeabi".to_string()];
        config.system_supported_locale = vec!["en_US".to_string()];
        config.gl_extension = vec!["GL_OES_compressed_ETC1_RGB8_texture".to_string()];
    } else {
        config.system_shared_library = properties.get_list("sharedlibraries");
        config.system_available_feature = properties.get_list("features");
        config.native_platform = properties.get_list("nativeplatforms");
        config.system_supported_locale = properties.get_list("locales");
        config.gl_extension = properties.get_list("glextensions");
    }

    config
}
