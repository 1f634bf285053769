//! Sampling policies.
//!
//! Both take the random source as an argument so callers can seed them.

use axum::http::StatusCode;
use rand::Rng;

/// One in this many unrouted webhooks is answered with `410 Gone`.
pub const GONE_ONE_IN: u32 = 7;

/// Status code for a webhook whose address has no targets.
///
/// Mostly `200 OK`, since senders tend to retry errors, and occasionally
/// `410 Gone`, which makes senders such as Trello drop the webhook. The result
/// is random on purpose.
pub fn not_found_status<R: Rng>(rng: &mut R) -> StatusCode {
    if rng.gen_range(0..GONE_ONE_IN) == 0 {
        StatusCode::GONE
    } else {
        StatusCode::OK
    }
}

/// Whether this write to the recent-request log should also trim it.
///
/// `one_in` of 0 or 1 trims on every write.
pub fn should_trim_log<R: Rng>(rng: &mut R, one_in: u32) -> bool {
    one_in <= 1 || rng.gen_range(0..one_in) == 0
}
