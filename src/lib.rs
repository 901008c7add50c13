pub mod api;
pub mod profiles;
