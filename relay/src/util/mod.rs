//! Small shared helpers.

pub mod address;

pub use address::{generate_address, is_valid_address};
