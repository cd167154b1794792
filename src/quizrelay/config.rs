use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use crate::error::{QuizRelayError, ErrorCode};
use crate::quizrelay::leaderboard::TieBreak;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub id: String,
    pub server: HttpConfig,
    pub cache: CacheConfig,
    pub hub: HubConfig,
    pub session: SessionConfig,
    pub leaderboard: LeaderboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub quiz_ttl_secs: u64,
    pub leaderboard_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Depth of every subscriber's outbound queue
    pub queue_depth: usize,
    pub mailbox_capacity: usize,
    /// How long a hub may sit without subscribers before it is reaped
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    pub tie_break: TieBreak,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: "quizrelay".to_string(),
            server: HttpConfig::default(),
            cache: CacheConfig::default(),
            hub: HubConfig::default(),
            session: SessionConfig::default(),
            leaderboard: LeaderboardConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { addr: "0.0.0.0:8080".to_string() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            quiz_ttl_secs: 3600,
            leaderboard_ttl_secs: 3600,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            mailbox_capacity: 64,
            idle_timeout_secs: 300,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
        }
    }
}

impl CacheConfig {
    pub fn quiz_ttl(&self) -> Duration {
        Duration::from_secs(self.quiz_ttl_secs)
    }

    pub fn leaderboard_ttl(&self) -> Duration {
        Duration::from_secs(self.leaderboard_ttl_secs)
    }
}

impl HubConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl SessionConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, QuizRelayError> {
        let content = fs::read_to_string(path)
            .map_err(|e| QuizRelayError::new(ErrorCode::ConfigInvalid, format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, QuizRelayError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| QuizRelayError::new(ErrorCode::ConfigInvalid, format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), QuizRelayError> {
        if self.hub.queue_depth == 0 || self.hub.mailbox_capacity == 0 {
            return Err(QuizRelayError::new(ErrorCode::ConfigInvalid, "hub queue_depth and mailbox_capacity must be positive"));
        }
        if self.session.ping_interval_secs == 0 {
            return Err(QuizRelayError::new(ErrorCode::ConfigInvalid, "session ping_interval_secs must be positive"));
        }
        if self.session.pong_timeout_secs < self.session.ping_interval_secs {
            return Err(QuizRelayError::new(ErrorCode::ConfigInvalid, "session pong_timeout_secs must not be shorter than ping_interval_secs"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config.hub.queue_depth, 256);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.leaderboard_ttl(), Duration::from_secs(3600));
        assert_eq!(config.leaderboard.tie_break, TieBreak::StoreOrder);
    }

    #[test]
    fn sections_override_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            id = "relay-a"

            [server]
            addr = "127.0.0.1:9000"

            [cache]
            backend = "redis"
            quiz_ttl_secs = 60

            [leaderboard]
            tie_break = "username"
            "#,
        )
        .unwrap();
        assert_eq!(config.id, "relay-a");
        assert_eq!(config.server.addr, "127.0.0.1:9000");
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.cache.quiz_ttl_secs, 60);
        assert_eq!(config.cache.leaderboard_ttl_secs, 3600);
        assert_eq!(config.leaderboard.tie_break, TieBreak::Username);
    }

    #[test]
    fn rejects_pong_timeout_below_ping_interval() {
        let err = ServerConfig::from_toml_str(
            "[session]\nping_interval_secs = 30\npong_timeout_secs = 10\n",
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConfigInvalid));
    }
}
