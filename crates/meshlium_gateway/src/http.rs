mod auth_hook;

pub use auth_hook::*;
