//! Domain models and strongly-typed identifiers.
//!
//! Defines the queued request, the destination server, and newtype ID
//! wrappers for compile-time type safety. Includes database serialization
//! traits and the status state machine driving the dispatch pipeline.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed request identifier.
///
/// Wraps the `requests` table primary key to prevent mixing with other
/// numeric IDs. The external-facing identifier is the request `uid`, not
/// this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for RequestId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RequestId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for RequestId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed destination server identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub i64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ServerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for ServerId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for ServerId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for ServerId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Request lifecycle status.
///
/// Requests enter the queue as `Ready`. The dispatch engine moves them
/// through the remaining states:
///
/// ```text
/// Ready ──▶ Completed          (synchronous destination, 2xx)
///       ──▶ Pending            (asynchronous destination, submitted)
///       ──▶ Failed / Error     (retryable, re-scanned until retries exhausted)
///       ──▶ Expired            (retries exhausted)
///       ──▶ Canceled           (request blacklisted)
/// ```
///
/// `Completed`, `Expired`, `Canceled`, and `Ignored` are terminal; the
/// producer never re-selects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Queued and eligible for dispatch.
    Ready,
    /// Submitted to an asynchronous destination, awaiting out-of-band
    /// completion.
    Pending,
    /// Retries exhausted. Terminal.
    Expired,
    /// Delivered and confirmed by a synchronous destination. Terminal.
    Completed,
    /// Delivery failed; eligible for another attempt.
    Failed,
    /// Destination-side error response; eligible for another attempt.
    Error,
    /// Administratively ignored. Terminal.
    Ignored,
    /// Rejected because the request itself is blacklisted. Terminal.
    Canceled,
}

impl RequestStatus {
    /// Statuses the producer scans for dispatch candidates.
    ///
    /// `Failed` and `Error` stay in the scan set so the retry counter, not a
    /// status reversion step, drives re-delivery.
    pub const DISPATCHABLE: [Self; 3] = [Self::Ready, Self::Failed, Self::Error];

    /// True when the dispatch engine may still pick this request up.
    pub fn is_dispatchable(self) -> bool {
        Self::DISPATCHABLE.contains(&self)
    }

    /// True for states the engine never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Canceled | Self::Ignored)
    }

    /// Parses a status from its database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "pending" => Some(Self::Pending),
            "expired" => Some(Self::Expired),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "error" => Some(Self::Error),
            "ignored" => Some(Self::Ignored),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Pending => write!(f, "pending"),
            Self::Expired => write!(f, "expired"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Ignored => write!(f, "ignored"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl sqlx::Type<PgDb> for RequestStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RequestStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Self::parse(s).ok_or_else(|| format!("invalid request status: {s}").into())
    }
}

/// Authentication scheme used when calling a destination.
///
/// The original configuration stored this as free-form text; anything other
/// than `Token` falls back to basic authentication, preserving that
/// permissive default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    /// HTTP basic authentication with the destination's username/password.
    Basic,
    /// `ApiToken` authorization header carrying the destination's token.
    Token,
}

impl AuthMethod {
    /// Parses an auth method from its stored representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "Token" => Self::Token,
            _ => Self::Basic,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "Basic"),
            Self::Token => write!(f, "Token"),
        }
    }
}

impl sqlx::Type<PgDb> for AuthMethod {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AuthMethod {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self::parse(s))
    }
}

/// A queued unit of work awaiting delivery to exactly one destination.
///
/// Created by the ingest surface with status `ready`; afterwards mutated only
/// by the dispatch engine. Never deleted by the engine itself — deletion is
/// an administrative operation on the listing API.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Request {
    /// Primary key. Not exposed through the API; the `uid` is the
    /// external identity.
    #[serde(skip_serializing)]
    pub id: RequestId,
    /// External-facing unique identifier.
    pub uid: String,
    /// Batch the request was submitted under, if any.
    pub batch_id: String,
    /// Source application.
    pub source: ServerId,
    /// Destination server.
    pub destination: ServerId,
    /// MIME type recorded at ingestion, replayed on delivery.
    pub content_type: String,
    /// Opaque payload. The engine proxies this blindly apart from the
    /// object-type normalization pass.
    pub body: String,
    /// Last destination response body, when response parsing is enabled.
    pub response: Option<String>,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Free-form diagnostic code (`ERROR1`, `ERROR7`, HTTP status, ...).
    pub status_code: String,
    /// Number of delivery attempts made so far. Only ever increases.
    pub retries: i32,
    /// Human-readable error text from the last attempt.
    pub errors: String,
    /// Reporting frequency classification (metadata, not validated here).
    pub frequency_type: String,
    /// Reporting period fields carried from the source system.
    pub period: String,
    /// Day component of the reporting period.
    pub day: String,
    /// Week component of the reporting period.
    pub week: String,
    /// Month component of the reporting period.
    pub month: String,
    /// Year component of the reporting period.
    pub year: String,
    /// Reporting phone number, when the source is an SMS gateway.
    pub msisdn: String,
    /// Raw inbound message, when the source is an SMS gateway.
    pub raw_msg: String,
    /// Reporting facility.
    pub facility: String,
    /// Reporting district.
    pub district: String,
    /// Kind of report in the source system.
    pub report_type: String,
    /// Payload shape tag, e.g. `DATA_VALUES` or `EVENTS`.
    pub object_type: String,
    /// Additional routing metadata.
    pub extras: String,
    /// Request-level blacklist flag. A suspended request is never delivered.
    pub suspended: bool,
    /// When set, the body is appended to the destination URL as query
    /// parameters instead of being sent as the request body.
    pub body_is_query_params: bool,
    /// Reference identifier in the source system.
    pub submission_id: String,
    /// Suffix appended to the destination URL at delivery time.
    pub url_suffix: String,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated: DateTime<Utc>,
}

/// Fields supplied by the ingest surface when enqueueing a request.
///
/// Everything else (`uid`, status, counters, timestamps) is assigned at
/// insert time.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    /// Source application.
    pub source: ServerId,
    /// Destination server.
    pub destination: ServerId,
    /// MIME type of the payload.
    pub content_type: String,
    /// Opaque payload.
    pub body: String,
    /// Batch identifier.
    pub batch_id: String,
    /// Reporting period.
    pub period: String,
    /// Week component.
    pub week: String,
    /// Month component.
    pub month: String,
    /// Year component.
    pub year: String,
    /// Reporting phone number.
    pub msisdn: String,
    /// Raw inbound message.
    pub raw_msg: String,
    /// Reporting facility.
    pub facility: String,
    /// Reporting district.
    pub district: String,
    /// Kind of report in the source system.
    pub report_type: String,
    /// Payload shape tag.
    pub object_type: String,
    /// Additional routing metadata.
    pub extras: String,
    /// Whether the body is query parameters rather than a payload.
    pub body_is_query_params: bool,
    /// Reference identifier in the source system.
    pub submission_id: String,
    /// URL suffix appended at delivery time.
    pub url_suffix: String,
}

/// The worker's view of a claimed request.
///
/// Carries exactly the columns the eligibility policy and delivery path
/// need; workers re-read this under the row lock rather than trusting any
/// snapshot taken at scan time.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedRequest {
    /// Primary key.
    pub id: RequestId,
    /// Source application.
    pub source: ServerId,
    /// Destination server.
    pub destination: ServerId,
    /// Opaque payload.
    pub body: String,
    /// Delivery attempts made so far.
    pub retries: i32,
    /// MIME type replayed on delivery.
    pub content_type: String,
    /// Payload shape tag.
    pub object_type: String,
    /// Whether the body is query parameters rather than a payload.
    pub body_is_query_params: bool,
    /// Reference identifier in the source system.
    pub submission_id: String,
    /// URL suffix appended at delivery time.
    pub url_suffix: String,
    /// Request-level blacklist flag.
    pub suspended: bool,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Diagnostic code from the last attempt.
    pub status_code: String,
    /// Error text from the last attempt.
    pub errors: String,
    /// Destination response body to persist, when response parsing is
    /// enabled.
    pub response: Option<String>,
}

/// A configured destination endpoint.
///
/// Loaded into an in-memory snapshot at startup and treated as read-mostly
/// reference data; see [`crate::destinations::Destinations`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Server {
    /// Primary key.
    pub id: ServerId,
    /// External-facing unique identifier.
    pub uid: String,
    /// Display name, also used by ingest to resolve source/destination.
    pub name: String,
    /// Username for basic authentication.
    pub username: String,
    /// Password for basic authentication.
    pub password: String,
    /// Token for `ApiToken` authentication.
    pub auth_token: String,
    /// Authentication scheme.
    pub auth_method: AuthMethod,
    /// Target URL.
    pub url: String,
    /// HTTP method used when calling the URL.
    pub http_method: String,
    /// Additional carbon-copy URLs. Modeled but not fanned out by the
    /// dispatch engine.
    pub cc_urls: Vec<String>,
    /// URL receiving completion callbacks for asynchronous destinations.
    pub callback_url: String,
    /// Whether completion callbacks are allowed.
    pub allow_callbacks: bool,
    /// Whether carbon-copying to `cc_urls` is allowed.
    pub allow_copies: bool,
    /// Whether the destination acknowledges asynchronously. See the
    /// dispatch engine's synchronous/asynchronous handling.
    pub use_async: bool,
    /// Whether to use HTTPS when building URLs for this destination.
    pub use_ssl: bool,
    /// Whether destination responses should be stored on the request.
    pub parse_responses: bool,
    /// Destination-level suspension flag; gates all deliveries.
    pub suspended: bool,
    /// First hour of day (0-23) during which submissions are accepted.
    pub start_submission_period: i32,
    /// Last hour of day (0-23) during which submissions are accepted.
    pub end_submission_period: i32,
    /// Extra query parameters appended to every delivery URL.
    pub url_params: sqlx::types::Json<HashMap<String, String>>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated: DateTime<Utc>,
}

impl Server {
    /// Whether `hour` (0-23) falls inside this destination's submission
    /// window. Windows with start > end wrap around midnight.
    pub fn in_submission_period(&self, hour: u32) -> bool {
        let hour = i32::try_from(hour).unwrap_or(0);
        let (start, end) = (self.start_submission_period, self.end_submission_period);
        if start <= end {
            (start..=end).contains(&hour)
        } else {
            hour >= start || hour <= end
        }
    }
}

const UID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const UID_LENGTH: usize = 11;

/// Generates an external-facing unique identifier.
///
/// Eleven characters, the first an uppercase letter, the rest alphanumeric.
pub fn generate_uid() -> String {
    let mut rng = rand::thread_rng();
    let mut uid = String::with_capacity(UID_LENGTH);
    let first = UID_ALPHABET[rng.gen_range(0..UID_ALPHABET.len())];
    uid.push(first.to_ascii_uppercase() as char);
    for _ in 1..UID_LENGTH {
        uid.push(UID_CHARSET[rng.gen_range(0..UID_CHARSET.len())] as char);
    }
    uid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_display() {
        for status in [
            RequestStatus::Ready,
            RequestStatus::Pending,
            RequestStatus::Expired,
            RequestStatus::Completed,
            RequestStatus::Failed,
            RequestStatus::Error,
            RequestStatus::Ignored,
            RequestStatus::Canceled,
        ] {
            assert_eq!(RequestStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(RequestStatus::parse("bogus"), None);
    }

    #[test]
    fn dispatchable_statuses_exclude_terminal_states() {
        assert!(RequestStatus::Ready.is_dispatchable());
        assert!(RequestStatus::Failed.is_dispatchable());
        assert!(RequestStatus::Error.is_dispatchable());

        assert!(!RequestStatus::Completed.is_dispatchable());
        assert!(!RequestStatus::Expired.is_dispatchable());
        assert!(!RequestStatus::Canceled.is_dispatchable());
        assert!(!RequestStatus::Pending.is_dispatchable());

        assert!(RequestStatus::Expired.is_terminal());
        assert!(!RequestStatus::Failed.is_terminal());
    }

    #[test]
    fn auth_method_defaults_to_basic() {
        assert_eq!(AuthMethod::parse("Token"), AuthMethod::Token);
        assert_eq!(AuthMethod::parse("Basic"), AuthMethod::Basic);
        assert_eq!(AuthMethod::parse(""), AuthMethod::Basic);
        assert_eq!(AuthMethod::parse("anything-else"), AuthMethod::Basic);
    }

    #[test]
    fn submission_window_contains_hours_inclusively() {
        let mut server = test_server();
        server.start_submission_period = 8;
        server.end_submission_period = 17;

        assert!(server.in_submission_period(8));
        assert!(server.in_submission_period(12));
        assert!(server.in_submission_period(17));
        assert!(!server.in_submission_period(7));
        assert!(!server.in_submission_period(18));
    }

    #[test]
    fn submission_window_wraps_past_midnight() {
        let mut server = test_server();
        server.start_submission_period = 22;
        server.end_submission_period = 2;

        assert!(server.in_submission_period(22));
        assert!(server.in_submission_period(23));
        assert!(server.in_submission_period(0));
        assert!(server.in_submission_period(2));
        assert!(!server.in_submission_period(3));
        assert!(!server.in_submission_period(21));
    }

    #[test]
    fn generated_uids_have_expected_shape() {
        for _ in 0..50 {
            let uid = generate_uid();
            assert_eq!(uid.len(), UID_LENGTH);
            assert!(uid.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(uid.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    fn test_server() -> Server {
        Server {
            id: ServerId(1),
            uid: "Srv0000000A".to_string(),
            name: "test".to_string(),
            username: String::new(),
            password: String::new(),
            auth_token: String::new(),
            auth_method: AuthMethod::Basic,
            url: "http://localhost/api".to_string(),
            http_method: "POST".to_string(),
            cc_urls: Vec::new(),
            callback_url: String::new(),
            allow_callbacks: false,
            allow_copies: false,
            use_async: false,
            use_ssl: false,
            parse_responses: false,
            suspended: false,
            start_submission_period: 0,
            end_submission_period: 23,
            url_params: sqlx::types::Json(HashMap::new()),
            created: Utc::now(),
            updated: Utc::now(),
        }
    }
}
