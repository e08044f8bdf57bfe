//! Label color values.
//!
//! Colors arrive from a free-text picker and may be half-typed while an
//! operator is still editing (`"#ff"`, `"re"`). Storage keeps the raw string;
//! only emptiness is rejected. Whether the value is a usable hex color is a
//! rendering concern answered by [`LabelColor::to_canonical_hex`].

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`LabelColor`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ColorError {
    /// The input is empty or whitespace only.
    #[error("color cannot be empty")]
    Empty,
}

/// A label color exactly as the operator entered it.
///
/// ```
/// use product_labels_core::LabelColor;
///
/// let red = LabelColor::parse("#F00").unwrap();
/// assert_eq!(red.to_canonical_hex().as_deref(), Some("#ff0000"));
///
/// // Partially typed values are kept verbatim.
/// let partial = LabelColor::parse("#ff").unwrap();
/// assert_eq!(partial.as_str(), "#ff");
/// assert!(partial.to_canonical_hex().is_none());
///
/// assert!(LabelColor::parse("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LabelColor(String);

impl LabelColor {
    /// Parse a `LabelColor`, rejecting only empty input.
    ///
    /// # Errors
    ///
    /// Returns [`ColorError::Empty`] if the input is empty or whitespace.
    pub fn parse(s: &str) -> Result<Self, ColorError> {
        if s.trim().is_empty() {
            return Err(ColorError::Empty);
        }
        Ok(Self(s.to_owned()))
    }

    /// Returns the raw color string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the color and returns the raw string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Whether the value is a `#RGB` or `#RRGGBB` hex color (case-insensitive).
    #[must_use]
    pub fn is_canonical_hex(&self) -> bool {
        self.to_canonical_hex().is_some()
    }

    /// Expand the value to lowercase `#rrggbb`, if it is a hex color.
    #[must_use]
    pub fn to_canonical_hex(&self) -> Option<String> {
        let digits = self.0.trim().strip_prefix('#')?;
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let digits = digits.to_ascii_lowercase();
        match digits.len() {
            6 => Some(format!("#{digits}")),
            3 => Some(digits.chars().fold(String::from("#"), |mut out, c| {
                out.push(c);
                out.push(c);
                out
            })),
            _ => None,
        }
    }
}

impl fmt::Display for LabelColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LabelColor {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(ColorError::Empty);
        }
        Ok(Self(value))
    }
}

impl From<LabelColor> for String {
    fn from(color: LabelColor) -> Self {
        color.0
    }
}
