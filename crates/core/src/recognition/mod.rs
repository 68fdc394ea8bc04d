pub mod domain;
pub mod identity_resolver;
pub mod infrastructure;
