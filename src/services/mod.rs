pub mod cookies;
pub mod credentials;
pub mod db;
pub mod error;
pub mod extract;
pub mod rate_limit;
pub mod session;
