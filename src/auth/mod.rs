pub mod credentials;
pub mod handlers;
pub mod session;
pub mod signing;
