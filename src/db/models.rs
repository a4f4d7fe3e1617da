// [library] Serde - JSON serialization/deserialization framework for Rust
// Serialize: convert Rust structs to JSON for API responses
// Deserialize: parse JSON/form data into Rust structs
use serde::{Deserialize, Serialize};

// [library] SQLx type mappings for PostgreSQL-specific types
// OffsetDateTime: timezone-aware timestamps that map to TIMESTAMPTZ
use sqlx::types::time::OffsetDateTime;

// [library] UUID v4 support - globally unique identifiers
// Preferred over auto-incrementing integers for public APIs and security
use uuid::Uuid;

// [business] Gate entity - one configured unlock flow tied to one protected file
// Treated as immutable for the duration of a visitor's unlock session
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
// [rust] Derive attributes provide automatic trait implementations:
// - Debug: enables {:?} formatting for logging
// - Clone: enables copying (cheap for most fields)
// - Serialize/Deserialize: automatic JSON conversion
// - sqlx::FromRow: automatic mapping from database rows
pub struct Gate {
    pub id: Uuid,                    // [business] Primary key
    pub slug: String,                // [business] URL-friendly identifier (e.g., "my-new-track")
    pub owner_id: Uuid,              // [business] Artist account that configured this gate
    pub title: String,               // [business] Display title shown on the gate page
    pub artist_name: Option<String>, // [business] Display name of the artist
    pub artwork_url: Option<String>, // [business] Cover art for the gate page
    pub file_key: String, // [security] Opaque file reference - never exposed in the public descriptor

    // [business] Step requirements - email capture is always required and has no flag
    // Each optional step is independently toggleable per gate
    pub require_soundcloud_repost: bool,
    pub require_soundcloud_follow: bool,
    pub require_instagram_click: bool,
    pub require_spotify_connect: bool,

    // [business] Targets for the configured steps
    pub soundcloud_track_urn: Option<String>, // [business] Track to repost/comment on
    pub soundcloud_user_urn: Option<String>,  // [business] Artist profile to follow
    pub instagram_url: Option<String>,        // [business] Profile the click-through points at
    pub spotify_track_id: Option<String>,     // [business] Track saved to the library on connect

    pub active: bool,               // [business] Gate enable/disable flag
    pub max_downloads: Option<i64>, // [business] Aggregate redemption cap across all visitors
    pub download_count: i64,        // [business] Redemptions so far, backs max_downloads
    pub download_use_limit: i32,    // [business] Per-token redemption allowance (default 1)
    pub expires_at: Option<OffsetDateTime>, // [business] Optional campaign end date
    pub created_at: OffsetDateTime, // [business] Creation timestamp
}

impl Gate {
    // [business] A gate accepts visitors only while the config flag is on and the
    // campaign end date has not passed
    pub fn is_open(&self, now: OffsetDateTime) -> bool {
        self.active && self.expires_at.map_or(true, |expiry| expiry > now)
    }

    // [business] The soundcloud step exists when either sub-action is flagged
    pub fn requires_soundcloud(&self) -> bool {
        self.require_soundcloud_repost || self.require_soundcloud_follow
    }
}

// [business] Submission entity - one visitor's progress record through a gate
// Unique per (gate_id, email); resubmitting an email resumes the existing record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Submission {
    pub id: Uuid,                  // [business] Primary key, returned to the client
    pub gate_id: Uuid,             // [business] Foreign key - which gate this belongs to
    pub email: String,             // [business] Captured email address
    pub first_name: Option<String>, // [business] Optional first name from the form
    pub marketing_consent: bool,   // [business] Explicit opt-in flag from the form

    // [business] Platform identities bound after a successful OAuth exchange
    pub soundcloud_user_id: Option<String>,
    pub spotify_user_id: Option<String>,

    // [security] Verification flags are monotone - once true they are never reset
    // The companion timestamp records the first transition only
    pub soundcloud_repost_verified: bool,
    pub soundcloud_repost_verified_at: Option<OffsetDateTime>,
    pub soundcloud_follow_verified: bool,
    pub soundcloud_follow_verified_at: Option<OffsetDateTime>,
    pub instagram_clicked: bool,
    pub instagram_clicked_at: Option<OffsetDateTime>,
    pub spotify_connected: bool,
    pub spotify_connected_at: Option<OffsetDateTime>,

    pub download_token: Option<String>, // [business] Most recently issued download token
    pub download_completed: bool,       // [business] Set on first successful redemption

    // [business] Request audit fields captured at email submit time
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// [business] CSRF/PKCE state entity - correlates an outbound authorization redirect
// with its inbound callback. Single-use: consumed exactly once, then dead forever
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OAuthState {
    pub state: String,           // [security] Opaque random token (primary key)
    pub submission_id: Uuid,     // [business] Which visitor started this flow
    pub gate_id: Uuid,           // [business] Gate context for the callback redirect
    pub provider: String,        // [security] Provider tag - must match the callback URL
    pub code_verifier: String,   // [security] PKCE verifier held server-side, never sent to the browser
    pub comment_body: Option<String>, // [business] Visitor-typed comment carried across the round trip
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime, // [security] Short expiration (typically 10 minutes)
    pub consumed: bool,             // [security] Single-use flag - prevents replay
}

// [business] Download token entity - short-lived, use-bounded credential for the gated file
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DownloadToken {
    pub token: String,       // [security] Opaque random token (primary key)
    pub submission_id: Uuid, // [business] Which submission earned this token
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime, // [security] Typically 24 hours after issue
    pub use_count: i32,             // [business] Redemptions so far, incremented atomically
    pub use_limit: i32,             // [business] Allowed redemptions (default 1)
}

// [business] Data Transfer Objects (DTOs) for API responses
// The public API speaks camelCase; entities above stay snake_case

// [business] Public gate descriptor - everything a gate page needs to render
// Deliberately omits the file key and provider target identifiers
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDescriptor {
    pub slug: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    pub active: bool, // [business] Config flag ANDed with non-expiry
    pub steps: GateSteps,
}

// [business] Which steps this gate requires - email is always true
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSteps {
    pub email: bool,
    pub soundcloud_repost: bool,
    pub soundcloud_follow: bool,
    pub instagram_click: bool,
    pub spotify_connect: bool,
}

// [business] Email capture form body
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub consent_marketing: bool,
}

// [business] Email capture response - hands the client its submission handle
// plus the next step so it can advance the flow immediately
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub submission_id: Uuid,
    pub next_step: String,
}

// [business] Authoritative progress snapshot - clients reconcile against this
// instead of trusting any locally cached step state
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub submission_id: Uuid,
    pub gate_id: Uuid,
    pub next_step: String,
    pub steps: ProgressSteps,
    pub download_completed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSteps {
    pub soundcloud_repost_verified: bool,
    pub soundcloud_follow_verified: bool,
    pub instagram_clicked: bool,
    pub spotify_connected: bool,
}

// [business] Instagram click-track response - failure is an expected branch here,
// reported as a value with a reason code rather than an HTTP error
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// [business] Download token issue request/response pair
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTokenRequest {
    pub submission_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTokenResponse {
    pub token: String,
}

// [business] API error response structure - stable machine-readable code plus
// an optional human-readable message
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String, // [business] Stable error codes (e.g., "validation_error", "not_found")

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>, // [business] Human-readable error description
}

// [rust] Implementation block for ApiError - provides constructor and builder methods
impl ApiError {
    // [rust] Constructor function - creates a new error with just the error code
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(), // [rust] Convert &str to owned String
            message: None,
        }
    }

    // [rust] Builder pattern method - adds a message and returns self for chaining
    // `mut self` takes ownership and allows modification
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self // [rust] Return modified self for method chaining
    }
}
