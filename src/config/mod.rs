mod settings;

pub use settings::{
    ApiConfig, DatabaseConfig, DeliveryConfig, JwtConfig, RedisConfig, ServerConfig, Settings,
    WebSocketConfig,
};
