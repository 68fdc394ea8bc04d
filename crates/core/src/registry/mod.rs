pub mod entity_registry;
pub mod face;
pub mod person;
