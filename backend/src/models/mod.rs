pub mod keys;
pub mod messages;
