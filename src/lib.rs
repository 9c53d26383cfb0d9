pub mod config;
pub mod error;
pub mod feed;
pub mod models;
#[cfg(test)]
pub mod test_helpers;
pub mod tracking;
