// =============================================================================
// Helpdesk Backend Constants
// =============================================================================
// Tunables for presence, matching and messaging, kept in one place so they
// can be adjusted without hunting through the services.

// =============================================================================
// PROXIMITY
// =============================================================================

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Radius used when a caller asks for nearby helpers only
pub const NEARBY_RADIUS_KM: f64 = 50.0;

/// Tolerance used when comparing computed distances
pub const DISTANCE_EPSILON_KM: f64 = 1e-9;

// =============================================================================
// PRESENCE
// =============================================================================

/// How long a user may go without a heartbeat before being swept offline
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 90;

/// How often the stale presence sweep runs
pub const DEFAULT_PRESENCE_SWEEP_INTERVAL_SECS: u64 = 30;

// =============================================================================
// CHANGE FEED
// =============================================================================

/// Capacity of the store's broadcast change feed. Slow subscribers that fall
/// further behind than this observe a lag and resynchronise from the store.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

/// Keep-alive interval for server-sent event streams
pub const SSE_KEEP_ALIVE_SECS: u64 = 15;

// =============================================================================
// VALIDATION LIMITS
// =============================================================================

/// Maximum length of a chat message, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Maximum length of a support request message, in characters
pub const MAX_REQUEST_MESSAGE_CHARS: usize = 1000;

/// Maximum length of a display name, in characters
pub const MAX_NAME_CHARS: usize = 80;

// =============================================================================
// SERVER CONFIGURATION
// =============================================================================

/// Default server port if not specified in environment
pub const DEFAULT_SERVER_PORT: u16 = 3000;

/// Header carrying the caller id supplied by the identity provider
pub const USER_ID_HEADER: &str = "x-user-id";

/// Default database pool size
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

// =============================================================================
// HELPER FUNCTIONS FOR VALIDATION
// =============================================================================

/// Returns true when the text has something other than whitespace in it
pub fn has_content(text: &str) -> bool {
    !text.trim().is_empty()
}

/// Validates latitude/longitude ranges in degrees
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
