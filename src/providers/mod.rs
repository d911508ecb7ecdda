pub mod bustracker;
pub mod news;
