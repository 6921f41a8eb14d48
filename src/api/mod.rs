pub mod quest;
pub mod register;
pub mod transaction;
