pub mod airdate;
pub mod error;
pub mod messages;
pub mod types;
