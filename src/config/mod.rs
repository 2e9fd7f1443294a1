mod settings;

pub use settings::{
    LogConfig, MailConfig, RedisConfig, ServerConfig, Settings, SubscriptionsConfig,
};
