//! Content fingerprinting.

use crate::canonical::{CanonicalHasher, ContentHash};
use chrono::{DateTime, Utc};

const CONTENT_DOMAIN: &str = "verse.content.v1";

/// Compute the fingerprint of one content state.
///
/// Same `(title, body, author_id, timestamp)` always yields the same hash, so a
/// resubmission of unchanged content can be recognized by its fingerprint.
pub fn fingerprint(
    title: &str,
    body: &str,
    author_id: &str,
    timestamp: &DateTime<Utc>,
) -> ContentHash {
    let digest = CanonicalHasher::new(CONTENT_DOMAIN)
        .field(title)
        .field(body)
        .field(author_id)
        .field_time(timestamp)
        .finish();
    ContentHash::from_digest(digest)
}
