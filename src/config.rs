//! Configuration types, read from `CAREER_NAV_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::engine::Thresholds;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig, RetryPolicy};

/// Generation service settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    /// `GROQ_API_KEY_1..N` when set, else `CAREER_NAV_API_KEY` or `GROQ_API_KEY`.
    pub api_keys: Vec<SecretString>,
    pub model: String,
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Groq,
            api_keys: Vec::new(),
            model: "llama-3.3-70b-versatile".to_string(),
            endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl LlmSettings {
    pub fn to_llm_config(&self) -> Result<LlmConfig, ConfigError> {
        if self.api_keys.is_empty() {
            return Err(ConfigError::MissingEnvVar("GROQ_API_KEY".to_string()));
        }
        Ok(LlmConfig {
            backend: self.backend,
            api_keys: self.api_keys.clone(),
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
        })
    }
}

/// Process-wide spacing between generation calls.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1500),
        }
    }
}

/// Orchestration and progression settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pause between onboarding stages.
    pub stage_delay: Duration,
    pub thresholds: Thresholds,
    /// Completion needed on an alternative before reverting.
    pub revert_threshold: f64,
    /// Confidence below which a reroute is recommended.
    pub low_confidence: f64,
    pub roadmap_steps: usize,
    pub actions_per_step: usize,
    pub validation_questions: usize,
    pub diagnostic_questions: usize,
    pub export_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_delay: Duration::from_secs(5),
            thresholds: Thresholds::default(),
            revert_threshold: 0.6,
            low_confidence: 0.4,
            roadmap_steps: 5,
            actions_per_step: 3,
            validation_questions: 5,
            diagnostic_questions: 5,
            export_dir: PathBuf::from("./data/exports"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    File,
    LibSql,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(Self::File),
            "libsql" | "sqlite" => Ok(Self::LibSql),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}' (expected file, libsql or memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory for `{user_id}_context.json` files.
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            data_dir: PathBuf::from("./data"),
            db_path: PathBuf::from("./data/career-nav.db"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Everything the binary needs.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub throttle: ThrottleConfig,
    pub retry: RetryPolicy,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
    /// Daily rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parse(key, default.as_secs_f64())?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{secs} is not a valid number of seconds"),
            });
        }
        Ok(Duration::from_secs_f64(secs))
    }

    /// `{prefix}_1`, `{prefix}_2`, ... up to the first gap.
    fn numbered(&self, prefix: &str) -> Vec<String> {
        (1..)
            .map_while(|i| self.get(&format!("{prefix}_{i}")))
            .collect()
    }

    fn fraction(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        let value = self.parse(key, default)?;
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{value} must be between 0 and 1"),
            });
        }
        Ok(value)
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };
        let defaults = Self::default();

        let backend = match vars.get("CAREER_NAV_LLM_BACKEND") {
            Some(raw) => LlmBackend::parse(raw.trim()).ok_or_else(|| ConfigError::InvalidValue {
                key: "CAREER_NAV_LLM_BACKEND".to_string(),
                message: format!("unknown backend '{raw}'"),
            })?,
            None => defaults.llm.backend,
        };
        let mut api_keys = vars.numbered("GROQ_API_KEY");
        if api_keys.is_empty() {
            api_keys.extend(vars.get("CAREER_NAV_API_KEY").or_else(|| vars.get("GROQ_API_KEY")));
        }
        let llm = LlmSettings {
            backend,
            api_keys: api_keys.into_iter().map(SecretString::from).collect(),
            model: vars.get("CAREER_NAV_MODEL").unwrap_or(defaults.llm.model),
            endpoint: vars.get("CAREER_NAV_LLM_ENDPOINT"),
            timeout: vars.secs("CAREER_NAV_LLM_TIMEOUT_SECS", defaults.llm.timeout)?,
        };

        let throttle = ThrottleConfig {
            min_interval: vars.secs("CAREER_NAV_MIN_CALL_INTERVAL_SECS", defaults.throttle.min_interval)?,
        };

        let retry = RetryPolicy {
            max_rate_limit_retries: vars.parse("CAREER_NAV_RETRY_MAX", defaults.retry.max_rate_limit_retries)?,
            base_delay: vars.secs("CAREER_NAV_RETRY_BASE_SECS", defaults.retry.base_delay)?,
            multiplier: vars.parse("CAREER_NAV_RETRY_MULTIPLIER", defaults.retry.multiplier)?,
            max_transport_retries: vars.parse("CAREER_NAV_TRANSPORT_RETRIES", defaults.retry.max_transport_retries)?,
            transport_delay: vars.secs("CAREER_NAV_TRANSPORT_DELAY_SECS", defaults.retry.transport_delay)?,
        };

        let d = defaults.pipeline;
        let thresholds = Thresholds {
            pass_score: vars.parse("CAREER_NAV_PASS_SCORE", d.thresholds.pass_score)?,
            max_score: d.thresholds.max_score,
            max_attempts: vars.parse("CAREER_NAV_MAX_ATTEMPTS", d.thresholds.max_attempts)?,
        };
        if thresholds.pass_score > thresholds.max_score {
            return Err(ConfigError::InvalidValue {
                key: "CAREER_NAV_PASS_SCORE".to_string(),
                message: format!("must not exceed {}", thresholds.max_score),
            });
        }
        let pipeline = PipelineConfig {
            stage_delay: vars.secs("CAREER_NAV_STAGE_DELAY_SECS", d.stage_delay)?,
            thresholds,
            revert_threshold: vars.fraction("CAREER_NAV_REVERT_THRESHOLD", d.revert_threshold)?,
            low_confidence: vars.fraction("CAREER_NAV_LOW_CONFIDENCE", d.low_confidence)?,
            roadmap_steps: vars.parse("CAREER_NAV_ROADMAP_STEPS", d.roadmap_steps)?,
            actions_per_step: vars.parse("CAREER_NAV_ACTIONS_PER_STEP", d.actions_per_step)?,
            validation_questions: vars.parse("CAREER_NAV_VALIDATION_QUESTIONS", d.validation_questions)?,
            diagnostic_questions: vars.parse("CAREER_NAV_DIAGNOSTIC_QUESTIONS", d.diagnostic_questions)?,
            export_dir: vars.parse("CAREER_NAV_EXPORT_DIR", d.export_dir)?,
        };

        let store = StoreConfig {
            backend: vars.parse("CAREER_NAV_STORE", defaults.store.backend)?,
            data_dir: vars.parse("CAREER_NAV_DATA_DIR", defaults.store.data_dir)?,
            db_path: vars.parse("CAREER_NAV_DB_PATH", defaults.store.db_path)?,
        };

        let server = ServerConfig {
            host: vars.get("CAREER_NAV_HOST").unwrap_or(defaults.server.host),
            port: vars.parse("CAREER_NAV_PORT", defaults.server.port)?,
        };

        Ok(Self {
            llm,
            throttle,
            retry,
            pipeline,
            store,
            server,
            log_dir: vars.get("CAREER_NAV_LOG_DIR").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_env() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.throttle.min_interval, Duration::from_millis(1500));
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.pipeline.stage_delay, Duration::from_secs(5));
        assert_eq!(cfg.pipeline.thresholds.pass_score, 6);
        assert_eq!(cfg.store.backend, StoreBackend::File);
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.llm.api_keys.is_empty());
        assert!(matches!(
            cfg.llm.to_llm_config(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("GROQ_API_KEY", "gsk-1"),
            ("CAREER_NAV_MIN_CALL_INTERVAL_SECS", "0.25"),
            ("CAREER_NAV_STAGE_DELAY_SECS", "0"),
            ("CAREER_NAV_STORE", "libsql"),
            ("CAREER_NAV_REVERT_THRESHOLD", "0.75"),
            ("CAREER_NAV_LLM_BACKEND", "openai"),
        ])
        .unwrap();
        assert_eq!(cfg.throttle.min_interval, Duration::from_millis(250));
        assert_eq!(cfg.pipeline.stage_delay, Duration::ZERO);
        assert_eq!(cfg.store.backend, StoreBackend::LibSql);
        assert_eq!(cfg.pipeline.revert_threshold, 0.75);
        assert_eq!(cfg.llm.backend, LlmBackend::OpenAi);
        let llm = cfg.llm.to_llm_config().unwrap();
        assert_eq!(llm.api_keys.len(), 1);
        assert_eq!(llm.api_keys[0].expose_secret(), "gsk-1");
    }

    #[test]
    fn numbered_keys_form_a_pool() {
        let cfg = config(&[
            ("GROQ_API_KEY", "gsk-single"),
            ("GROQ_API_KEY_1", "gsk-a"),
            ("GROQ_API_KEY_2", "gsk-b"),
            ("GROQ_API_KEY_4", "gsk-after-gap"),
        ])
        .unwrap();
        let keys: Vec<&str> = cfg.llm.api_keys.iter().map(|k| k.expose_secret()).collect();
        assert_eq!(keys, vec!["gsk-a", "gsk-b"]);
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = config(&[("CAREER_NAV_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CAREER_NAV_PORT"));

        let err = config(&[("CAREER_NAV_LOW_CONFIDENCE", "1.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CAREER_NAV_LOW_CONFIDENCE"));

        let err = config(&[("CAREER_NAV_PASS_SCORE", "12")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
