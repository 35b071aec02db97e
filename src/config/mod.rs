pub mod hot_reload;
pub mod schema;

pub use hot_reload::ConfigHandle;
pub use schema::{
    Config, ObservabilityConfig, QueueConfig, ServiceConfig, SmtpConfig, SmtpSecurity,
};
