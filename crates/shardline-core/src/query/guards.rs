//! Shared guardrails for query payload bounds and traversal limits.

// Pagination guards
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

// Filter guards
pub const MAX_RELATION_DEPTH: usize = 4;
pub const MAX_IN_VALUES: usize = 500;
pub const MAX_FIELD_PATH_LENGTH: usize = 256;

// Batch guards
pub const MAX_MANY_KEYS: usize = 1000;
pub const MAX_SEARCH_LIMIT: u32 = 100;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_limit(value: u32, maximum: u32) -> u32 {
    clamp_int(i64::from(value), 1, i64::from(maximum)) as u32
}

pub fn clamp_page_size(value: u32) -> u32 {
    clamp_limit(value, MAX_PAGE_SIZE)
}
