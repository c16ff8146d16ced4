pub mod plugins;
pub mod query;
pub mod token;
