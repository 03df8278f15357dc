pub mod api_error;
pub mod config;
pub mod telemetry;
pub mod time_utils;
pub mod url_utils;
