use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const ENV_PREFIX: &str = "ASISTENTE_";

/// Runtime configuration. Layering: defaults, optional JSON file, `ASISTENTE_*` env, CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub ollama_base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    /// Character budget for one assembled generation prompt.
    pub context_budget_chars: usize,
    pub qa_temperature: f32,
    pub classify_temperature: f32,
    pub recommend_temperature: f32,
    pub max_generation_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// `None` disables idle expiry.
    pub session_idle_timeout_secs: Option<u64>,
    pub max_sessions: usize,
    pub upload_max_bytes: u64,
    pub upload_wait_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            chat_model: "llama3.1".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 4,
            context_budget_chars: 12_000,
            qa_temperature: 0.0,
            classify_temperature: 0.3,
            recommend_temperature: 0.7,
            max_generation_attempts: 3,
            retry_base_delay_ms: 500,
            session_idle_timeout_secs: None,
            max_sessions: 1000,
            upload_max_bytes: 20 * 1024 * 1024,
            upload_wait_timeout_secs: 180,
        }
    }
}

impl Settings {
    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new("CONFIG_INVALID", "Failed to read configuration file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AppError::new("CONFIG_INVALID", "Failed to decode configuration file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })
    }

    pub fn apply_process_env(&mut self) -> Result<(), AppError> {
        self.apply_env(std::env::vars())
    }

    /// Overrides fields from `ASISTENTE_<FIELD>` variables; unknown keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match field {
                "OLLAMA_BASE_URL" => self.ollama_base_url = value.to_string(),
                "CHAT_MODEL" => self.chat_model = value.to_string(),
                "EMBEDDING_MODEL" => self.embedding_model = value.to_string(),
                "CHUNK_SIZE" => self.chunk_size = parse_env(&key, value)?,
                "CHUNK_OVERLAP" => self.chunk_overlap = parse_env(&key, value)?,
                "TOP_K" => self.top_k = parse_env(&key, value)?,
                "CONTEXT_BUDGET_CHARS" => self.context_budget_chars = parse_env(&key, value)?,
                "QA_TEMPERATURE" => self.qa_temperature = parse_env(&key, value)?,
                "CLASSIFY_TEMPERATURE" => self.classify_temperature = parse_env(&key, value)?,
                "RECOMMEND_TEMPERATURE" => self.recommend_temperature = parse_env(&key, value)?,
                "MAX_GENERATION_ATTEMPTS" => {
                    self.max_generation_attempts = parse_env(&key, value)?
                }
                "RETRY_BASE_DELAY_MS" => self.retry_base_delay_ms = parse_env(&key, value)?,
                "SESSION_IDLE_TIMEOUT_SECS" => {
                    self.session_idle_timeout_secs = if value.is_empty() || value == "none" {
                        None
                    } else {
                        Some(parse_env(&key, value)?)
                    }
                }
                "MAX_SESSIONS" => self.max_sessions = parse_env(&key, value)?,
                "UPLOAD_MAX_BYTES" => self.upload_max_bytes = parse_env(&key, value)?,
                "UPLOAD_WAIT_TIMEOUT_SECS" => {
                    self.upload_wait_timeout_secs = parse_env(&key, value)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(AppError::new("CONFIG_INVALID", "top_k must be at least 1"));
        }
        if self.max_generation_attempts == 0 {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "max_generation_attempts must be at least 1",
            ));
        }
        if self.upload_max_bytes == 0 {
            return Err(AppError::new("CONFIG_INVALID", "upload_max_bytes must be positive"));
        }
        if self.max_sessions == 0 {
            return Err(AppError::new("CONFIG_INVALID", "max_sessions must be at least 1"));
        }
        if self.chat_model.trim().is_empty() || self.embedding_model.trim().is_empty() {
            return Err(AppError::new("CONFIG_INVALID", "Model names must not be empty"));
        }
        for (name, t) in [
            ("qa_temperature", self.qa_temperature),
            ("classify_temperature", self.classify_temperature),
            ("recommend_temperature", self.recommend_temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                return Err(AppError::new("CONFIG_INVALID", "Temperature must be in [0, 2]")
                    .with_details(format!("{name}={t}")));
            }
        }
        Ok(())
    }

    pub fn session_idle_timeout(&self) -> Option<Duration> {
        self.session_idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn upload_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_wait_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

pub fn validate_chunking(chunk_size: usize, overlap: usize) -> Result<(), AppError> {
    if chunk_size == 0 {
        return Err(AppError::new("CONFIG_INVALID", "chunk_size must be positive"));
    }
    if overlap >= chunk_size {
        return Err(
            AppError::new("CONFIG_INVALID", "chunk overlap must be smaller than chunk_size")
                .with_details(format!("chunk_size={chunk_size}; overlap={overlap}")),
        );
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        AppError::new("CONFIG_INVALID", "Invalid environment override")
            .with_details(format!("{key}={value}; err={e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().expect("defaults validate");
        assert_eq!(s.chunk_size, 1000);
        assert_eq!(s.chunk_overlap, 100);
        assert_eq!(s.top_k, 4);
        assert_eq!(s.session_idle_timeout(), None);
    }

    #[test]
    fn env_overrides_apply_and_ignore_foreign_keys() {
        let mut s = Settings::default();
        s.apply_env(vars(&[
            ("ASISTENTE_CHUNK_SIZE", "500"),
            ("ASISTENTE_CHUNK_OVERLAP", "50"),
            ("ASISTENTE_SESSION_IDLE_TIMEOUT_SECS", "600"),
            ("ASISTENTE_CHAT_MODEL", "mistral"),
            ("HOME", "/root"),
        ]))
        .expect("apply");
        assert_eq!(s.chunk_size, 500);
        assert_eq!(s.chunk_overlap, 50);
        assert_eq!(s.session_idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(s.chat_model, "mistral");
    }

    #[test]
    fn bad_env_value_is_a_configuration_error() {
        let mut s = Settings::default();
        let err = s
            .apply_env(vars(&[("ASISTENTE_TOP_K", "four")]))
            .expect_err("should fail");
        assert_eq!(err.code, "CONFIG_INVALID");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let s = Settings {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Settings::default()
        };
        assert_eq!(s.validate().unwrap_err().code, "CONFIG_INVALID");
        assert_eq!(validate_chunking(0, 0).unwrap_err().code, "CONFIG_INVALID");
        assert!(validate_chunking(10, 0).is_ok());
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() {
        let mut f = tempfile::NamedTempFile::new().expect("tmp");
        write!(f, r#"{{"top_k": 6, "chat_model": "qwen2.5"}}"#).expect("write");
        let s = Settings::from_json_file(f.path()).expect("load");
        assert_eq!(s.top_k, 6);
        assert_eq!(s.chat_model, "qwen2.5");
        assert_eq!(s.chunk_size, 1000);
    }
}
