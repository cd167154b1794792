pub mod error;
pub mod quizrelay;
pub mod store;
pub mod wire;
