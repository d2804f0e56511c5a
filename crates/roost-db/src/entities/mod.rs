pub mod bots;
pub mod environment_variables;
pub mod users;
