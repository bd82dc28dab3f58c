//! Value types for command parameters.

mod brightness;
mod color;
mod effect;
mod power;
mod speed;

pub use brightness::Brightness;
pub use color::Color;
pub use effect::Effect;
pub use power::PowerMode;
pub use speed::Speed;
