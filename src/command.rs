//! Command vocabulary understood by the LED devices.

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::types::{Brightness, Color, Effect, PowerMode, Speed};

/// A command sent to one or all devices.
///
/// The set of commands is closed: every variant has a fixed discriminator
/// (`cmd` on the wire) and fixed parameters, so the sender and the
/// [codec](crate::codec) can never disagree on what a command means.
///
/// # Examples
///
/// ```
/// use udp_led_rs::{Brightness, Color, Command};
///
/// let cmd = Command::set_color(&Color::rgb(255, 0, 0), Brightness::new());
/// assert_eq!(cmd.name(), "set_color");
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, IntoStaticStr)]
#[serde(tag = "cmd", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    SetColor {
        red: u8,
        green: u8,
        blue: u8,
        brightness: Brightness,
    },
    SetPower {
        #[serde(rename = "power")]
        on: bool,
    },
    SetEffect {
        effect: Effect,
        speed: Speed,
    },
    GetStatus,
    Discover,
}

impl Command {
    pub fn set_color(color: &Color, brightness: Brightness) -> Self {
        Command::SetColor {
            red: color.red,
            green: color.green,
            blue: color.blue,
            brightness,
        }
    }

    pub fn set_power(power: &PowerMode) -> Self {
        Command::SetPower { on: power.is_on() }
    }

    pub fn set_effect(effect: Effect, speed: Speed) -> Self {
        Command::SetEffect { effect, speed }
    }

    /// The wire discriminator of this command.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_names_match_wire_discriminator() {
        let commands = [
            Command::set_color(&Color::rgb(1, 2, 3), Brightness::new()),
            Command::set_power(&PowerMode::Off),
            Command::set_effect(Effect::Blink, Speed::new()),
            Command::GetStatus,
            Command::Discover,
        ];
        for cmd in commands {
            let value = serde_json::to_value(&cmd).unwrap();
            assert_eq!(value["cmd"], json!(cmd.name()));
        }
    }

    #[test]
    fn test_set_power_uses_power_field() {
        let value = serde_json::to_value(Command::set_power(&PowerMode::On)).unwrap();
        assert_eq!(value, json!({"cmd": "set_power", "power": true}));
    }

    #[test]
    fn test_set_effect_fields() {
        let cmd = Command::set_effect(Effect::Rainbow, Speed::create(80).unwrap());
        let value = serde_json::to_value(cmd).unwrap();
        assert_eq!(
            value,
            json!({"cmd": "set_effect", "effect": "rainbow", "speed": 80})
        );
    }
}
