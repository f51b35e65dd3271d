pub mod api;
pub mod date_format;
pub mod error;
pub mod event;
pub mod legacy_api;
pub mod sse;

/// Path of the v2 server-sent event stream on a bridge.
pub const EVENTSTREAM_PATH: &str = "/eventstream/clip/v2";

/// Header carrying the application key on v2 requests.
pub const APPLICATION_KEY_HEADER: &str = "hue-application-key";

/// Convert a v2 brightness percentage into a legacy `bri` value (1..=254).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn brightness_to_bri(percent: f64) -> u8 {
    (percent * 2.54).round().clamp(1.0, 254.0) as u8
}

/// Convert a raw `ZLLLightLevel` reading into lux.
#[must_use]
pub fn lightlevel_to_lux(level: u32) -> f64 {
    10f64.powf((f64::from(level) - 1.0) / 10000.0)
}
