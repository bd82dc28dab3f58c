//! Lighting effects supported by the devices.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Built-in effect run by the device firmware.
///
/// Names round-trip through [`std::str::FromStr`] and [`std::fmt::Display`]
/// using the lowercase wire spelling.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use udp_led_rs::Effect;
///
/// assert_eq!(Effect::from_str("rainbow").unwrap(), Effect::Rainbow);
/// assert_eq!(Effect::Breathing.to_string(), "breathing");
/// assert!(Effect::from_str("strobe").is_err());
/// ```
#[derive(
    Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Effect {
    Static,
    Rainbow,
    Breathing,
    Blink,
}
