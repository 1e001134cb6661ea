pub mod organization;
pub mod rbac;
pub mod ticket;
pub mod user;
