//! Hard limits. Anything a client can grow without bound gets a ceiling here.

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

/// Longest stay a single reservation may cover.
pub const MAX_STAY_NIGHTS: usize = 365;
/// Widest range a single provisioning call may touch.
pub const MAX_PROVISION_DAYS: usize = 3 * 366;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_METADATA_ENTRIES: usize = 32;
pub const MAX_METADATA_VALUE_LEN: usize = 1024;
pub const MAX_GUESTS: u32 = 64;

/// Upper bound on a single room type's physical count for one day.
pub const MAX_ROOMS_PER_TYPE: u32 = 100_000;
pub const MAX_NIGHTLY_RATE_CENTS: u64 = 10_000_000_000;

/// Upper bound on a configured hold window (24 hours).
pub const MAX_HOLD_WINDOW_MS: Ms = 24 * 60 * 60 * 1000;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
