pub mod aggregate;
pub mod migrate;
pub mod pin;
pub mod role;
pub mod user;
