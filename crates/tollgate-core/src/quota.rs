//! Fixed-point quota unit helpers

/// Quota units per US dollar
pub const UNITS_PER_USD: i64 = 500_000;

/// Whole dollars represented by a quota amount, truncated
pub const fn whole_usd(quota: i64) -> i64 {
    quota / UNITS_PER_USD
}

/// Quota amount expressed in US cents, truncated
pub const fn usd_cents(quota: i64) -> i64 {
    quota * 100 / UNITS_PER_USD
}
