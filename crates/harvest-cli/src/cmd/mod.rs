pub mod fetch;
pub mod search;
pub mod token;
