//! UUID v7 utilities for time-ordered identifiers.
//!
//! UUIDv7 embeds a millisecond-precision Unix timestamp in the first 48
//! bits, so identifiers sort chronologically. All framelab entity and
//! correlation IDs use v7.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check whether a UUID is version 7.
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}
