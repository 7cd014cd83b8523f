pub mod class_terms;
pub mod core;
pub mod records;
pub mod reports;
pub mod scores;
pub mod session;
pub mod setup;
pub mod students;
pub mod users;
