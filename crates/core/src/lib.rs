pub mod detection;
pub mod pipeline;
pub mod recognition;
pub mod registry;
pub mod shared;
pub mod video;
