//! Color tags: a deterministic palette and the per-document registry.
//!
//! Every word occurrence in a tagged document is painted with its own color.
//! After rasterisation the color is the only link between a pixel region and
//! the word it came from, so the one hard rule here is that a palette never
//! hands out the same color twice.
//!
//! ## Palette layout
//!
//! For a requested capacity `C` the palette has `x³` colors where
//! `x = ceil(C^(1/3)) + 1`. Colors are generated by three nested loops over
//! the red, green and blue channels, starting from black:
//!
//! ```text
//! (0,0,0) (0,0,s) (0,0,2s) … (0,s,0) (0,s,s) … (s,0,0) …
//! ```
//!
//! where `s` is the channel step (1 by default). Neighbouring colors differ
//! by a single step in one channel. At low DPI or after lossy compression two
//! adjacent palette entries can be confused; [`ColorAllocator::with_channel_step`]
//! spaces them further apart at the cost of a smaller maximum capacity.

use crate::error::ColorExhausted;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// An sRGB color, serialised as six hex digits (`"0a1b2c"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(255, 255, 255);
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Six lowercase hex digits without a leading `#`.
    pub fn hex(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_rgb(self) -> image::Rgb<u8> {
        image::Rgb([self.r, self.g, self.b])
    }
}

impl From<image::Rgb<u8>> for Color {
    fn from(px: image::Rgb<u8>) -> Self {
        let [r, g, b] = px.0;
        Color::new(r, g, b)
    }
}

/// CSS form, `#rrggbb`.
impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.hex())
    }
}

impl FromStr for Color {
    type Err = String;

    /// Accepts `rrggbb` or `#rrggbb`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(format!("expected 6 hex digits, got '{s}'"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("bad hex color '{s}': {e}"))
        };
        Ok(Color::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Mapping from tag color to the word it was assigned to.
///
/// Owned by exactly one generation job. Duplicate words are expected (each
/// occurrence gets its own color); duplicate colors are not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorRegistry {
    words: HashMap<Color, String>,
}

impl ColorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `color` to `word`, returning the previous word if the color was
    /// already bound.
    pub fn register(&mut self, color: Color, word: impl Into<String>) -> Option<String> {
        self.words.insert(color, word.into())
    }

    pub fn lookup(&self, color: &Color) -> Option<&str> {
        self.words.get(color).map(String::as_str)
    }

    pub fn contains(&self, color: &Color) -> bool {
        self.words.contains_key(color)
    }

    /// Number of registered word occurrences.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Deterministic palette with an allocation cursor and the registry it fills.
#[derive(Debug, Clone)]
pub struct ColorAllocator {
    palette: Vec<Color>,
    cursor: usize,
    registry: ColorRegistry,
}

impl ColorAllocator {
    /// Palette with at least `capacity` distinct colors and a channel step of 1.
    pub fn new(capacity: usize) -> Self {
        Self::with_channel_step(capacity, 1)
    }

    /// Palette whose neighbouring colors differ by `step` in one channel.
    ///
    /// The number of levels per channel is capped at `256 / step`, so large
    /// steps shrink the palette; [`ColorAllocator::capacity`] reports the
    /// real size.
    pub fn with_channel_step(capacity: usize, step: u8) -> Self {
        let levels = channel_levels(capacity, step);
        let step = usize::from(step.max(1));

        let mut palette = Vec::with_capacity(levels * levels * levels);
        for i in 0..levels {
            for j in 0..levels {
                for k in 0..levels {
                    // i, j, k < 256 / step, so each product stays below 256.
                    palette.push(Color::new(
                        (i * step % 256) as u8,
                        (j * step % 256) as u8,
                        (k * step % 256) as u8,
                    ));
                }
            }
        }

        Self {
            palette,
            cursor: 0,
            registry: ColorRegistry::new(),
        }
    }

    /// Size of the palette [`ColorAllocator::with_channel_step`] would build,
    /// without building it.
    pub fn palette_size(capacity: usize, step: u8) -> usize {
        channel_levels(capacity, step).pow(3)
    }

    /// Total number of colors in the palette.
    pub fn capacity(&self) -> usize {
        self.palette.len()
    }

    /// Colors still available.
    pub fn remaining(&self) -> usize {
        self.palette.len() - self.cursor
    }

    /// Return the next unused color and advance the cursor.
    pub fn next(&mut self) -> Result<Color, ColorExhausted> {
        let color = self
            .palette
            .get(self.cursor)
            .copied()
            .ok_or(ColorExhausted {
                capacity: self.palette.len(),
            })?;
        self.cursor += 1;
        Ok(color)
    }

    /// Record that `color` now tags `word`.
    pub fn register(&mut self, color: Color, word: impl Into<String>) {
        self.registry.register(color, word);
    }

    /// Allocate a fresh color for `word` and register it in one step.
    pub fn tag(&mut self, word: &str) -> Result<Color, ColorExhausted> {
        let color = self.next()?;
        self.register(color, word);
        Ok(color)
    }

    pub fn registry(&self) -> &ColorRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> ColorRegistry {
        self.registry
    }
}

/// Smallest `c` with `c³ ≥ n`, computed without floating point drift.
fn ceil_cbrt(n: usize) -> usize {
    let mut c = (n as f64).cbrt().floor() as usize;
    while c.saturating_pow(3) < n {
        c += 1;
    }
    while c > 0 && (c - 1).saturating_pow(3) >= n {
        c -= 1;
    }
    c
}

fn channel_levels(capacity: usize, step: u8) -> usize {
    (ceil_cbrt(capacity) + 1).min(256 / usize::from(step.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ceil_cbrt_exact_cubes() {
        assert_eq!(ceil_cbrt(0), 0);
        assert_eq!(ceil_cbrt(1), 1);
        assert_eq!(ceil_cbrt(8), 2);
        assert_eq!(ceil_cbrt(9), 3);
        assert_eq!(ceil_cbrt(27), 3);
        assert_eq!(ceil_cbrt(1000), 10);
        assert_eq!(ceil_cbrt(1001), 11);
    }

    #[test]
    fn palette_covers_capacity() {
        for capacity in [1usize, 7, 8, 100, 2000, 5000] {
            let alloc = ColorAllocator::new(capacity);
            assert!(
                alloc.capacity() >= capacity,
                "capacity {capacity} → palette {}",
                alloc.capacity()
            );
        }
        // x = ceil(cbrt(2000)) + 1 = 14
        assert_eq!(ColorAllocator::new(2000).capacity(), 14 * 14 * 14);
    }

    #[test]
    fn palette_starts_at_black_and_steps_blue_first() {
        let mut alloc = ColorAllocator::new(8);
        assert_eq!(alloc.next().unwrap(), Color::BLACK);
        assert_eq!(alloc.next().unwrap(), Color::new(0, 0, 1));
        assert_eq!(alloc.next().unwrap(), Color::new(0, 0, 2));
        assert_eq!(alloc.next().unwrap(), Color::new(0, 1, 0));
    }

    #[test]
    fn never_repeats_a_color() {
        let mut alloc = ColorAllocator::new(3000);
        let mut seen = HashSet::new();
        while let Ok(color) = alloc.next() {
            assert!(seen.insert(color), "duplicate color {color}");
        }
        assert_eq!(seen.len(), alloc.capacity());
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut alloc = ColorAllocator::new(1);
        // x = 2 → 8 colors
        for _ in 0..8 {
            alloc.next().unwrap();
        }
        assert_eq!(alloc.next(), Err(ColorExhausted { capacity: 8 }));
        assert_eq!(alloc.remaining(), 0);
    }

    #[test]
    fn channel_step_spreads_colors() {
        let mut alloc = ColorAllocator::with_channel_step(64, 16);
        let first = alloc.next().unwrap();
        let second = alloc.next().unwrap();
        assert_eq!(first, Color::BLACK);
        assert_eq!(second, Color::new(0, 0, 16));

        let mut seen = HashSet::new();
        seen.insert(first);
        seen.insert(second);
        while let Ok(c) = alloc.next() {
            assert!(seen.insert(c));
        }
    }

    #[test]
    fn channel_step_caps_levels() {
        // 256 / 128 = 2 levels per channel, whatever the capacity.
        let alloc = ColorAllocator::with_channel_step(1_000, 128);
        assert_eq!(alloc.capacity(), 8);
        assert_eq!(ColorAllocator::palette_size(1_000, 128), 8);
        assert_eq!(
            ColorAllocator::palette_size(2_000, 64),
            ColorAllocator::with_channel_step(2_000, 64).capacity()
        );
    }

    #[test]
    fn same_word_gets_distinct_colors() {
        let mut alloc = ColorAllocator::new(10);
        let a = alloc.tag("the").unwrap();
        let b = alloc.tag("the").unwrap();
        assert_ne!(a, b);
        let registry = alloc.into_registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(&a), Some("the"));
        assert_eq!(registry.lookup(&b), Some("the"));
    }

    #[test]
    fn hex_round_trip_and_display() {
        let c = Color::new(10, 27, 255);
        assert_eq!(c.hex(), "0a1bff");
        assert_eq!(c.to_string(), "#0a1bff");
        assert_eq!("#0a1bff".parse::<Color>().unwrap(), c);
        assert_eq!("0a1bff".parse::<Color>().unwrap(), c);
        assert!("0a1bf".parse::<Color>().is_err());
        assert!("zz1bff".parse::<Color>().is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let c = Color::new(1, 2, 3);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"010203\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
