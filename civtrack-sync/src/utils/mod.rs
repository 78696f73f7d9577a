//! Utility modules for civtrack-sync

pub mod db_retry;
pub mod slug;

pub use db_retry::retry_on_lock;
pub use slug::slugify;
