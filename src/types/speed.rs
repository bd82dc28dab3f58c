//! Animation speed for effects.

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Animation speed for effects, with valid values from 0 to 100.
///
/// Speed only matters for animated effects (rainbow, breathing, blink).
/// A value of 50 is the default speed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub struct Speed {
    pub(crate) value: u8,
}

impl Speed {
    const MIN: u8 = 0;
    const MAX: u8 = 100;
    const DEFAULT: u8 = 50;

    /// Create a new Speed with the default value (50).
    ///
    /// # Examples
    ///
    /// ```
    /// use udp_led_rs::Speed;
    ///
    /// assert_eq!(Speed::new().value(), 50);
    /// ```
    pub fn new() -> Self {
        Speed {
            value: Self::DEFAULT,
        }
    }

    /// Get the speed value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Create a new Speed with the given value.
    ///
    /// Returns `None` if value is outside the valid range (0-100).
    ///
    /// # Examples
    ///
    /// ```
    /// use udp_led_rs::Speed;
    ///
    /// assert!(Speed::create(0).is_some());
    /// assert!(Speed::create(100).is_some());
    /// assert!(Speed::create(101).is_none());
    /// ```
    pub fn create(value: u8) -> Option<Self> {
        if Self::is_valid(value) {
            Some(Speed { value })
        } else {
            None
        }
    }

    /// Create a Speed, using default if value is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use udp_led_rs::Speed;
    ///
    /// assert_eq!(Speed::create_or(100).value(), 100);
    /// assert_eq!(Speed::create_or(101).value(), 50);
    /// ```
    pub fn create_or(value: u8) -> Self {
        if Self::is_valid(value) {
            Speed { value }
        } else {
            Self::new()
        }
    }

    fn is_valid(value: u8) -> bool {
        (Self::MIN..=Self::MAX).contains(&value)
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<u8> for Speed {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::create(value).ok_or_else(|| Error::out_of_range("speed", value, Self::MIN, Self::MAX))
    }
}

impl From<Speed> for u8 {
    fn from(speed: Speed) -> Self {
        speed.value
    }
}
