use std::{fmt, str::FromStr};

use rand::{rngs::ThreadRng, Rng};

use crate::{PartyError, Result};

/// Background color handed to the surrounding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(0xFF, 0xFF, 0xFF);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Uniformly random color, one draw per channel.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(rng.random(), rng.random(), rng.random())
    }

    /// Channels scaled to [0, 1].
    pub fn to_normalized(self) -> [f32; 3] {
        [self.r, self.g, self.b].map(|channel| f32::from(channel) / 255.0)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = PartyError;

    fn from_str(value: &str) -> Result<Self> {
        let invalid = || PartyError::InvalidColor(value.to_string());
        let digits = value.strip_prefix('#').ok_or_else(invalid)?;
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(invalid());
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16).map_err(|_| invalid())
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// Picks the color applied on every detected beat.
pub trait ColorPolicy {
    fn next_color(&mut self) -> Color;
}

impl<F> ColorPolicy for F
where
    F: FnMut() -> Color,
{
    fn next_color(&mut self) -> Color {
        self()
    }
}

/// Draws a fresh random color for every beat.
#[derive(Debug, Clone)]
pub struct RandomColors<R = ThreadRng> {
    rng: R,
}

impl RandomColors {
    pub fn new() -> Self {
        Self { rng: rand::rng() }
    }
}

impl Default for RandomColors {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> RandomColors<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> ColorPolicy for RandomColors<R> {
    fn next_color(&mut self) -> Color {
        Color::random(&mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn displays_as_uppercase_hex() {
        assert_eq!(Color::new(0x0A, 0xBC, 0xFF).to_string(), "#0ABCFF");
        assert_eq!(Color::default().to_string(), "#FFFFFF");
    }

    #[test]
    fn parses_hex_strings() {
        let color: Color = "#ff8000".parse().unwrap();
        assert_eq!(color, Color::new(255, 128, 0));
        assert_eq!(color.to_normalized(), [1.0, 128.0 / 255.0, 0.0]);
    }

    #[test]
    fn rejects_malformed_hex() {
        for input in ["ff8000", "#ff80", "#gg8000", "#ff80001", "#ff80é"] {
            let err = input.parse::<Color>().unwrap_err();
            assert!(matches!(err, PartyError::InvalidColor(_)), "{input}");
        }
    }

    #[test]
    fn seeded_random_colors_are_reproducible() {
        let mut first = RandomColors::with_rng(StdRng::seed_from_u64(7));
        let mut second = RandomColors::with_rng(StdRng::seed_from_u64(7));
        for _ in 0..8 {
            assert_eq!(first.next_color(), second.next_color());
        }
    }

    #[test]
    fn closures_act_as_policies() {
        let mut calls = 0u8;
        let mut policy = move || {
            calls += 1;
            Color::new(calls, 0, 0)
        };
        assert_eq!(ColorPolicy::next_color(&mut policy), Color::new(1, 0, 0));
        assert_eq!(ColorPolicy::next_color(&mut policy), Color::new(2, 0, 0));
    }
}
