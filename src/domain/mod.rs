pub mod announcements;
pub mod merge;
pub mod models;
pub mod schedule;
pub mod timestamp;
