pub mod bbox;
pub mod config;
pub mod constants;
pub mod frame;
pub mod kalman;
pub mod model_resolver;
pub mod source_info;
pub mod stop_signal;
