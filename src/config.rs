use std::time::Duration;

/// One entry in the static model catalog.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub provider: &'static str,
    /// USD per million input tokens
    pub input_cost: f64,
    /// USD per million output tokens
    pub output_cost: f64,
}

/// Models offered to game creators, with gateway billing rates.
pub const MODEL_CATALOG: &[ModelSpec] = &[
    ModelSpec {
        id: "gpt-4o-mini",
        display_name: "GPT-4o mini",
        provider: "openai",
        input_cost: 0.15,
        output_cost: 0.60,
    },
    ModelSpec {
        id: "gpt-4o",
        display_name: "GPT-4o",
        provider: "openai",
        input_cost: 2.50,
        output_cost: 10.00,
    },
    ModelSpec {
        id: "claude-3-5-haiku",
        display_name: "Claude 3.5 Haiku",
        provider: "anthropic",
        input_cost: 0.80,
        output_cost: 4.00,
    },
    ModelSpec {
        id: "claude-sonnet-4",
        display_name: "Claude Sonnet 4",
        provider: "anthropic",
        input_cost: 3.00,
        output_cost: 15.00,
    },
    ModelSpec {
        id: "gemini-2.0-flash",
        display_name: "Gemini 2.0 Flash",
        provider: "google",
        input_cost: 0.10,
        output_cost: 0.40,
    },
];

/// Look up a catalog entry by model id.
pub fn model_spec(model_id: &str) -> Option<&'static ModelSpec> {
    MODEL_CATALOG.iter().find(|m| m.id == model_id)
}

/// Convert a token count pair into USD via the catalog; unknown models
/// bill at zero.
pub fn token_cost_usd(model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    match model_spec(model_id) {
        Some(spec) => {
            (input_tokens as f64 * spec.input_cost + output_tokens as f64 * spec.output_cost)
                / 1_000_000.0
        }
        None => 0.0,
    }
}

/// A shared secret. Comparison always scans the full candidate and
/// folds the length difference into the accumulator, so a wrong guess
/// can't be narrowed down through timing.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let ours = self.0.as_bytes();
        let theirs = candidate.as_bytes();
        let mut diff = ours.len() ^ theirs.len();
        for i in 0..ours.len().max(theirs.len()) {
            let a = ours.get(i).copied().unwrap_or(0);
            let b = theirs.get(i).copied().unwrap_or(0);
            diff |= (a ^ b) as usize;
        }
        diff == 0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Server configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret gating game creation. Required.
    pub host_secret: Secret,
    /// Secret gating the cleanup cron endpoint.
    pub cron_secret: Option<Secret>,
    /// API key for the AI gateway; model calls are disabled without it.
    pub ai_gateway_api_key: Option<String>,
    pub ai_gateway_base_url: String,
    pub bind_addr: String,
    pub writing_seconds: i64,
    pub voting_seconds: i64,
    pub reveal_seconds: i64,
    /// A player whose lastSeen is older than this is disconnected.
    pub inactive_after: Duration,
    /// A host this stale is replaced by the freshest active human.
    pub host_stale_after: Duration,
    /// Minimum gap between lastSeen refreshes from `touch=1` polls.
    pub heartbeat_window: Duration,
    pub llm_timeout: Duration,
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Fails only when `HOST_SECRET` is missing; everything else has a
    /// sensible default.
    pub fn from_env() -> Result<Self, String> {
        let host_secret = std::env::var("HOST_SECRET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Secret::new)
            .ok_or_else(|| "HOST_SECRET must be set".to_string())?;

        let ai_gateway_api_key = std::env::var("AI_GATEWAY_API_KEY")
            .ok()
            .filter(|s| !s.is_empty());
        if ai_gateway_api_key.is_none() {
            tracing::warn!("AI_GATEWAY_API_KEY not set; AI contestants will forfeit every round");
        }

        Ok(Self {
            host_secret,
            cron_secret: std::env::var("CRON_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .map(Secret::new),
            ai_gateway_api_key,
            ai_gateway_base_url: std::env::var("AI_GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://ai-gateway.vercel.sh/v1".to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            writing_seconds: env_i64("WRITING_SECONDS", 90),
            voting_seconds: env_i64("VOTING_SECONDS", 30),
            reveal_seconds: env_i64("REVEAL_SECONDS", 12),
            inactive_after: Duration::from_secs(env_i64("INACTIVE_AFTER_SECONDS", 45) as u64),
            host_stale_after: Duration::from_secs(env_i64("HOST_STALE_AFTER_SECONDS", 60) as u64),
            heartbeat_window: Duration::from_secs(env_i64("HEARTBEAT_WINDOW_SECONDS", 10) as u64),
            llm_timeout: Duration::from_secs(env_i64("LLM_TIMEOUT", 30) as u64),
        })
    }

    /// Fixed settings for tests: short timers, no gateway.
    #[doc(hidden)]
    pub fn for_tests() -> Self {
        Self {
            host_secret: Secret::new("test-secret"),
            cron_secret: Some(Secret::new("cron-secret")),
            ai_gateway_api_key: None,
            ai_gateway_base_url: "http://localhost:0".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            writing_seconds: 90,
            voting_seconds: 30,
            reveal_seconds: 12,
            inactive_after: Duration::from_secs(45),
            host_stale_after: Duration::from_secs(60),
            heartbeat_window: Duration::from_secs(10),
            llm_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_requires_host_secret() {
        std::env::remove_var("HOST_SECRET");
        assert!(Config::from_env().is_err());

        std::env::set_var("HOST_SECRET", "s3cret");
        let config = Config::from_env().unwrap();
        assert!(config.host_secret.matches("s3cret"));
        std::env::remove_var("HOST_SECRET");
    }

    #[test]
    fn test_secret_matches() {
        let secret = Secret::new("s3cret");
        assert!(secret.matches("s3cret"));
        assert!(!secret.matches("s3creT"));
        assert!(!secret.matches("s3cret1"));
        assert!(!secret.matches("s3cre"));
        assert!(!secret.matches(""));
        assert!(Secret::new("").matches(""));
        // Debug never prints the value.
        assert_eq!(format!("{:?}", secret), "Secret(..)");
    }

    #[test]
    #[serial]
    fn test_tunable_defaults_and_overrides() {
        std::env::set_var("HOST_SECRET", "s3cret");
        std::env::remove_var("WRITING_SECONDS");
        let config = Config::from_env().unwrap();
        assert_eq!(config.writing_seconds, 90);

        std::env::set_var("WRITING_SECONDS", "45");
        let config = Config::from_env().unwrap();
        assert_eq!(config.writing_seconds, 45);

        std::env::remove_var("WRITING_SECONDS");
        std::env::remove_var("HOST_SECRET");
    }

    #[test]
    fn test_token_cost() {
        // 1M input + 1M output of gpt-4o-mini = 0.15 + 0.60
        let cost = token_cost_usd("gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
        assert_eq!(token_cost_usd("unknown-model", 1_000_000, 0), 0.0);
    }
}
