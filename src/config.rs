use std::env;
use std::str::FromStr;

use anyhow::Context;

use crate::pipeline::FailurePolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub upload_dir: String,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub default_user_id: i32,
    pub classifier_url: String,
    pub spread_estimator_url: String,
    pub upstream_timeout_secs: u64,
    pub weather_api_url: String,
    pub weather_timeout_secs: u64,
    pub spread_failure_policy: FailurePolicy,
    pub weather_failure_policy: FailurePolicy,
    pub report_persist_failure_policy: FailurePolicy,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub fallback_provider: String,
    pub fallback_model: String,
    pub groq_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub ollama_base_url: String,
    pub report_prompt_path: Option<String>,
    pub otel_enabled: bool,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source. Unset or blank keys take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port: parse_var(&lookup, "APP_PORT", 3000)?,
            environment: var_or("APP_ENVIRONMENT", "development"),
            database_url: optional("DATABASE_URL"),
            database_max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            upload_dir: var_or("UPLOAD_DIR", "uploads"),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:3000"),
            max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            default_user_id: parse_var(&lookup, "DEFAULT_USER_ID", 1)?,
            classifier_url: var_or("CLASSIFIER_URL", "http://localhost:5000/disease"),
            spread_estimator_url: var_or(
                "SPREAD_ESTIMATOR_URL",
                "http://localhost:5001/spreadPercent",
            ),
            upstream_timeout_secs: parse_var(&lookup, "UPSTREAM_TIMEOUT_SECS", 30)?,
            weather_api_url: var_or(
                "WEATHER_API_URL",
                "https://historical-forecast-api.open-meteo.com/v1/forecast",
            ),
            weather_timeout_secs: parse_var(&lookup, "WEATHER_TIMEOUT_SECS", 10)?,
            spread_failure_policy: parse_var(
                &lookup,
                "SPREAD_FAILURE_POLICY",
                FailurePolicy::Degrade,
            )?,
            weather_failure_policy: parse_var(
                &lookup,
                "WEATHER_FAILURE_POLICY",
                FailurePolicy::Degrade,
            )?,
            report_persist_failure_policy: parse_var(
                &lookup,
                "REPORT_PERSIST_FAILURE_POLICY",
                FailurePolicy::Fatal,
            )?,
            llm_provider: var_or("LLM_PROVIDER", "groq"),
            llm_model: var_or("LLM_MODEL", "llama-3.3-70b-versatile"),
            llm_temperature: parse_var(&lookup, "LLM_TEMPERATURE", 0.3)?,
            llm_max_tokens: parse_var(&lookup, "LLM_MAX_TOKENS", 1024)?,
            fallback_provider: var_or("FALLBACK_PROVIDER", "none"),
            fallback_model: var_or("FALLBACK_MODEL", "gpt-4.1-mini"),
            groq_api_key: optional("GROQ_API_KEY"),
            openai_api_key: optional("OPENAI_API_KEY"),
            ollama_base_url: var_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            report_prompt_path: optional("REPORT_PROMPT_PATH"),
            otel_enabled: parse_var(&lookup, "OTEL_ENABLED", true)?,
            otel_service_name: var_or("OTEL_SERVICE_NAME", "crop-diagnosis"),
            otel_exporter_endpoint: var_or(
                "OTEL_EXPORTER_OTLP_ENDPOINT",
                "http://localhost:4317",
            ),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.llm_provider, "groq");
        assert_eq!(config.llm_model, "llama-3.3-70b-versatile");
        assert_eq!(config.fallback_provider, "none");
        assert_eq!(config.spread_failure_policy, FailurePolicy::Degrade);
        assert_eq!(config.weather_failure_policy, FailurePolicy::Degrade);
        assert_eq!(config.report_persist_failure_policy, FailurePolicy::Fatal);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(!config.is_production());
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = from_pairs(&[("DATABASE_URL", ""), ("APP_PORT", "  ")]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("APP_PORT", "8080"),
            ("APP_ENVIRONMENT", "production"),
            ("DATABASE_URL", "postgres://localhost/crops"),
            ("WEATHER_FAILURE_POLICY", "FATAL"),
            ("REPORT_PERSIST_FAILURE_POLICY", "degrade"),
            ("OTEL_ENABLED", "false"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.is_production());
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/crops")
        );
        assert_eq!(config.weather_failure_policy, FailurePolicy::Fatal);
        assert_eq!(config.report_persist_failure_policy, FailurePolicy::Degrade);
        assert!(!config.otel_enabled);
    }

    #[test]
    fn test_invalid_value_names_the_key() {
        let err = from_pairs(&[("APP_PORT", "not-a-port")]).unwrap_err();
        assert!(format!("{err:#}").contains("APP_PORT"));

        let err = from_pairs(&[("WEATHER_FAILURE_POLICY", "retry")]).unwrap_err();
        assert!(format!("{err:#}").contains("WEATHER_FAILURE_POLICY"));
    }
}
