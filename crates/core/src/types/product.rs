//! Shopify product identifiers.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Global-ID prefix for Shopify products.
const PRODUCT_GID_PREFIX: &str = "gid://shopify/Product/";

/// Errors that can occur when parsing a [`ProductId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProductIdError {
    /// The input string is empty.
    #[error("product id cannot be empty")]
    Empty,
    /// The input is a global ID for some other resource type.
    #[error("global id does not name a product: {0}")]
    WrongResource(String),
    /// The input contains whitespace or path separators.
    #[error("product id contains invalid characters: {0}")]
    InvalidCharacters(String),
    /// The input is a relative path segment (`.` or `..`).
    #[error("product id cannot be a dot segment: {0}")]
    DotSegment(String),
}

/// A product in the external Shopify catalog.
///
/// Callers may pass either the bare legacy ID (`"8123"`) or the global ID
/// (`"gid://shopify/Product/8123"`); both parse to the same value, which is
/// always held in global-ID form.
///
/// ```
/// use product_labels_core::ProductId;
///
/// let bare = ProductId::parse("8123").unwrap();
/// let gid = ProductId::parse("gid://shopify/Product/8123").unwrap();
/// assert_eq!(bare, gid);
/// assert_eq!(bare.legacy_id(), "8123");
///
/// assert!(ProductId::parse("").is_err());
/// assert!(ProductId::parse("gid://shopify/Collection/1").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    /// Parse a `ProductId` from a bare or global ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, contains whitespace or `/`
    /// in its legacy part, or is a global ID for a non-product resource.
    pub fn parse(s: &str) -> Result<Self, ProductIdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ProductIdError::Empty);
        }

        let legacy = if let Some(rest) = s.strip_prefix(PRODUCT_GID_PREFIX) {
            rest
        } else if s.starts_with("gid://") {
            return Err(ProductIdError::WrongResource(s.to_owned()));
        } else {
            s
        };

        if legacy.is_empty() {
            return Err(ProductIdError::Empty);
        }
        if legacy.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ProductIdError::InvalidCharacters(s.to_owned()));
        }
        // URL path building collapses these, which would retarget the request.
        if matches!(legacy, "." | "..") {
            return Err(ProductIdError::DotSegment(s.to_owned()));
        }

        Ok(Self(format!("{PRODUCT_GID_PREFIX}{legacy}")))
    }

    /// Returns the global ID (`gid://shopify/Product/...`).
    #[must_use]
    pub fn as_gid(&self) -> &str {
        &self.0
    }

    /// Returns the legacy (REST) ID, the part after the global-ID prefix.
    #[must_use]
    pub fn legacy_id(&self) -> &str {
        self.0.strip_prefix(PRODUCT_GID_PREFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProductId {
    type Err = ProductIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProductId {
    type Error = ProductIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProductId> for String {
    fn from(id: ProductId) -> Self {
        id.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for ProductId {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ProductId {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&raw)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for ProductId {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
