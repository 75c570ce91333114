pub mod auth;
pub mod document;
pub mod shared;
pub mod user;
