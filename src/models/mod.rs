//! Data shapes for the drive service.
//!
//! `object` maps metadata rows of the on-disk store via `sqlx::FromRow`;
//! `listing` and `usage` are computed per request and serialize as JSON via
//! `serde`. None of the listing types are persisted.

pub mod listing;
pub mod object;
pub mod usage;
