use crate::model::Ms;

pub const DAY_MS: Ms = 86_400_000;

/// 1970-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_OPERATING_HOURS: usize = 100_000;

/// Window used by the range listing when the caller gives no bounds.
pub const DEFAULT_LIST_WINDOW_MS: Ms = 7 * DAY_MS;
pub const DEFAULT_PAGE_SIZE: usize = 10;

pub const MAX_USER_NAME_LEN: usize = 256;
