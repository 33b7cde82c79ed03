pub mod client;
pub mod decoder;
pub mod scanner;
pub mod types;
