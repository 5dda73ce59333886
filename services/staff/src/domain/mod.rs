pub mod legacy;
pub mod repository;
pub mod role;
pub mod types;
pub mod user;
