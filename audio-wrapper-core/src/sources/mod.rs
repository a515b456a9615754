pub mod static_permissions;
pub mod synthetic;
