use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Server-assigned identifier of a generated image.
pub type ImageId = i64;

// =============================================================================
// SESSION TYPES - Credential and the account it belongs to
// =============================================================================

/// Opaque bearer token proving an authenticated session.
///
/// The `Debug` output is redacted so the token never ends up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token, for building the `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// A credential is well formed when it has non-whitespace content.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Account information of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Unique account id
    pub id: i64,
    /// Display name chosen at registration
    pub username: String,
    /// Login email address
    pub email: String,
    /// Account creation time (only returned by the profile endpoint)
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<OffsetDateTime>,
    /// Previous successful login (only returned by the profile endpoint)
    #[serde(default, with = "timestamp::option")]
    pub last_login: Option<OffsetDateTime>,
}

/// A credential together with the user it authenticates.
///
/// The two halves only ever exist together; see [`crate::session::SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub credential: Credential,
    pub user: UserProfile,
}

impl Session {
    #[must_use]
    pub const fn new(credential: Credential, user: UserProfile) -> Self {
        Self { credential, user }
    }
}

// =============================================================================
// IMAGE TYPES - Generated images, favorites and aggregates
// =============================================================================

/// An image produced by the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Image id; the generate endpoint calls it `image_id`
    #[serde(alias = "image_id")]
    pub id: ImageId,
    /// Prompt exactly as submitted
    pub original_prompt: String,
    /// Prompt after the backend rewrote it
    pub improved_prompt: String,
    /// Where the rendered image can be fetched
    pub image_url: String,
    /// Whether the backend's language model improved the prompt
    #[serde(default)]
    pub ai_enhanced: bool,
    /// Whether the image is in the user's favorites
    #[serde(default)]
    pub is_favorite: bool,
    /// Style echoed back by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Creation time, absent from the generate response
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<OffsetDateTime>,
}

/// Join record marking an image as favorite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    /// Favorite id, `None` while an optimistic insert awaits confirmation
    #[serde(default)]
    pub id: Option<i64>,
    /// The favorited image
    pub image: GeneratedImage,
    /// When the image was marked favorite
    #[serde(with = "timestamp")]
    pub added_at: OffsetDateTime,
}

/// Account-wide counters, always fetched from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total_images: u64,
    pub total_favorites: u64,
    pub total_collections: u64,
}

/// Rendering style applied to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Realistic,
    Anime,
    Painting,
    Cartoon,
    Minimalist,
}

impl Style {
    /// Canonical string values accepted by the API.
    pub const VALUES: [&'static str; 5] =
        ["realistic", "anime", "painting", "cartoon", "minimalist"];

    /// Returns the canonical API string for this style.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Realistic => "realistic",
            Self::Anime => "anime",
            Self::Painting => "painting",
            Self::Cartoon => "cartoon",
            Self::Minimalist => "minimalist",
        }
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StyleParseError {
    value: String,
}

impl std::fmt::Display for StyleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid style '{}'; expected one of: {}",
            self.value,
            Style::VALUES.join(", ")
        )
    }
}

impl std::error::Error for StyleParseError {}

impl std::str::FromStr for Style {
    type Err = StyleParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let style = match value.trim().to_ascii_lowercase().as_str() {
            "realistic" => Self::Realistic,
            "anime" => Self::Anime,
            "painting" => Self::Painting,
            "cartoon" => Self::Cartoon,
            "minimalist" => Self::Minimalist,
            _ => {
                return Err(StyleParseError {
                    value: value.to_string(),
                })
            }
        };
        Ok(style)
    }
}

// =============================================================================
// REQUEST TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `POST /generate`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub style: Style,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct FavoriteRequest {
    pub image_id: ImageId,
}

// =============================================================================
// RESPONSE TYPES
// =============================================================================

/// Response of the login and register endpoints
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileResponse {
    pub user: UserProfile,
}

/// One page of the user's image history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePage {
    pub images: Vec<GeneratedImage>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub pages: Option<u64>,
    #[serde(default)]
    pub current_page: Option<u64>,
}

/// One page of the user's favorites, most recently added first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoritePage {
    pub favorites: Vec<Favorite>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub pages: Option<u64>,
    #[serde(default)]
    pub current_page: Option<u64>,
}

/// Response from adding a favorite
#[derive(Debug, Default, Deserialize)]
pub struct FavoriteAdded {
    #[serde(default)]
    pub favorite_id: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of endpoints that only acknowledge
#[derive(Debug, Default, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatsResponse {
    pub stats: Stats,
}

/// Error payload the backend attaches to non-2xx responses
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<String>,
}

/// Backend timestamps are ISO 8601 without offset (UTC); RFC 3339 is accepted too.
pub(crate) mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::macros::format_description;
    use time::{OffsetDateTime, PrimitiveDateTime};

    pub fn parse(value: &str) -> Result<OffsetDateTime, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339).or_else(|_| {
            PrimitiveDateTime::parse(
                value,
                format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
                ),
            )
            .map(PrimitiveDateTime::assume_utc)
        })
    }

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::format_description::well_known::Rfc3339;
        use time::OffsetDateTime;

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<OffsetDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => {
                    let formatted = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
                    serializer.serialize_some(&formatted)
                }
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
