use std::env;

use once_cell::sync::Lazy;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub requests_per_second: f64,
    pub max_retries: u32,
    pub cache_ttl_days: i64,
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::load);

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

impl Config {
    fn load() -> Self {
        Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_image_model: env_string(
                "GEMINI_IMAGE_MODEL",
                "gemini-2.5-flash-image-preview",
            ),
            api_base_url: env_string(
                "GEMINI_API_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            request_timeout_secs: env_u64("IMG_CLI_REQUEST_TIMEOUT_SECS", 180),
            requests_per_second: env_f64("IMG_CLI_REQUESTS_PER_SECOND", 2.0),
            max_retries: env_u64("IMG_CLI_MAX_RETRIES", 3) as u32,
            cache_ttl_days: env_i64("IMG_CLI_CACHE_TTL_DAYS", 7),
        }
    }
}

/// Cost settings for the sweep gate. Separate from `Config` so the planner
/// can be handed explicit values in tests.
#[derive(Debug, Clone, Copy)]
pub struct CostConfig {
    pub cost_per_image: f64,
    pub confirmation_threshold: f64,
    pub maximum_cost: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            cost_per_image: 0.04,
            confirmation_threshold: 5.00,
            maximum_cost: 50.00,
        }
    }
}

impl CostConfig {
    pub fn from_env() -> Self {
        let defaults = CostConfig::default();
        CostConfig {
            cost_per_image: env_f64("IMG_CLI_COST_PER_IMAGE", defaults.cost_per_image),
            confirmation_threshold: env_f64(
                "IMG_CLI_CONFIRM_THRESHOLD",
                defaults.confirmation_threshold,
            ),
            maximum_cost: env_f64("IMG_CLI_MAX_COST", defaults.maximum_cost),
        }
    }

    pub fn total_cost(&self, image_count: usize) -> f64 {
        image_count as f64 * self.cost_per_image
    }

    pub fn requires_confirmation(&self, image_count: usize) -> bool {
        self.total_cost(image_count) > self.confirmation_threshold
    }

    pub fn exceeds_maximum(&self, image_count: usize) -> bool {
        self.total_cost(image_count) > self.maximum_cost
    }

    pub fn format_cost(cost: f64) -> String {
        format!("${cost:.2}")
    }

    pub fn breakdown(&self, image_count: usize) -> String {
        format!(
            "{} images x {} = {}",
            image_count,
            Self::format_cost(self.cost_per_image),
            Self::format_cost(self.total_cost(image_count))
        )
    }
}
