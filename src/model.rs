//! Profile, element, and engagement records persisted on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One public profile page, owned by exactly one identity.
///
/// ```json
/// {
///   "id": "7f9c...",
///   "user_id": "auth0|123",
///   "handle": "alice",
///   "display_name": "Alice",
///   "theme_color": "#6366f1",
///   "is_public": true,
///   "show_badges": true,
///   "created_at": "2024-01-01T00:00:00Z",
///   "updated_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    /// Stable record identifier.
    pub id: Uuid,
    /// Opaque owning identity from the session layer.
    pub user_id: String,
    /// Globally unique, case-sensitive public handle used in routing.
    pub handle: String,
    /// Optional display name shown instead of the handle.
    pub display_name: Option<String>,
    /// Optional free-form bio text.
    pub bio: Option<String>,
    /// Optional avatar image URL.
    pub avatar_url: Option<String>,
    /// Optional page background image URL.
    pub background_url: Option<String>,
    /// Accent color as a CSS hex string.
    pub theme_color: String,
    /// Private profiles look absent to everyone but the owner.
    pub is_public: bool,
    /// When false the public payload omits earned badges.
    pub show_badges: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of element types. The type is fixed at creation; only the
/// content payload (of the matching shape) may change afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Text,
    Image,
    Link,
}

impl ElementKind {
    /// Default width and height applied when the editor omits a size.
    pub fn default_size(self) -> (f64, f64) {
        match self {
            ElementKind::Text => (200.0, 60.0),
            ElementKind::Image => (200.0, 200.0),
            ElementKind::Link => (250.0, 50.0),
        }
    }
}

/// Content payload whose shape is determined by the element type.
///
/// `Link` is listed before `Image` so that `{url, title}` is never
/// mistaken for a bare `{url}` during untagged deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ElementContent {
    Text { text: String },
    Link { url: String, title: String },
    Image { url: String },
}

impl ElementContent {
    /// The element type this payload is shaped for.
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementContent::Text { .. } => ElementKind::Text,
            ElementContent::Link { .. } => ElementKind::Link,
            ElementContent::Image { .. } => ElementKind::Image,
        }
    }
}

/// One positioned content block on a profile page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub id: Uuid,
    pub profile_id: Uuid,
    /// Immutable type tag.
    pub kind: ElementKind,
    /// Payload matching `kind`.
    pub content: ElementContent,
    /// Top-left position on the page canvas.
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation in degrees, 0 when unset.
    pub rotation: f64,
    /// Stacking order; gaps are fine, ties resolved by `seq`.
    pub z_index: i64,
    /// Per-profile insertion sequence, makes stacking ties stable.
    pub seq: u64,
    /// Monotonic revision fencing position writes; a commit carrying a
    /// revision at or below the stored one is stale and rejected.
    pub revision: u64,
    /// Optional style overrides passed through verbatim.
    pub styles: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only record of a profile visit by a non-owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewEvent {
    /// Client-generated opaque visitor token, not an identity.
    pub visitor_id: String,
    /// Raw referrer string; absent means a direct visit.
    pub referrer: Option<String>,
    pub viewed_at: DateTime<Utc>,
}

/// A like by one visitor. At most one exists per (profile, visitor).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Like {
    pub visitor_id: String,
    pub created_at: DateTime<Utc>,
}

/// Closed set of badge types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    /// Everyone with a profile.
    SignedUp,
    /// Owns at least one element.
    CustomizedProfile,
    /// Received at least one like.
    GotLike,
    /// Reached the configured like threshold.
    Famous,
    /// Allowlist-only.
    Tester,
    /// Allowlist-only.
    Developer,
    /// Allowlist-only.
    Owner,
}

impl BadgeKind {
    /// Stable on-disk and wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            BadgeKind::SignedUp => "signed_up",
            BadgeKind::CustomizedProfile => "customized_profile",
            BadgeKind::GotLike => "got_like",
            BadgeKind::Famous => "famous",
            BadgeKind::Tester => "tester",
            BadgeKind::Developer => "developer",
            BadgeKind::Owner => "owner",
        }
    }

    /// Parse a badge name as it appears in configuration.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signed_up" => Some(BadgeKind::SignedUp),
            "customized_profile" => Some(BadgeKind::CustomizedProfile),
            "got_like" => Some(BadgeKind::GotLike),
            "famous" => Some(BadgeKind::Famous),
            "tester" => Some(BadgeKind::Tester),
            "developer" => Some(BadgeKind::Developer),
            "owner" => Some(BadgeKind::Owner),
            _ => None,
        }
    }

    /// Automatic badges are earned by thresholds and persisted; the rest
    /// are allowlist-only and computed at read time.
    pub fn is_automatic(self) -> bool {
        matches!(
            self,
            BadgeKind::SignedUp
                | BadgeKind::CustomizedProfile
                | BadgeKind::GotLike
                | BadgeKind::Famous
        )
    }
}

/// A permanent badge award for one profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BadgeAward {
    pub kind: BadgeKind,
    pub earned_at: DateTime<Utc>,
}
