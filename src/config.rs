//! Configuração do baton carregada a partir de `baton.toml`.
//!
//! A struct [`BatonConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ANTHROPIC_API_KEY` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::state_machine::{RestartPolicy, RetryConfig};

/// Configuração de nível superior carregada de `baton.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatonConfig {
    /// Chave da API Anthropic. Vazia: análises heurísticas offline.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Eventos de histórico por execução antes de um handoff.
    #[serde(default = "default_handoff_threshold")]
    pub handoff_threshold: usize,

    /// Tentativas por sub-análise, incluindo a primeira.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Limite de uma única tentativa, em segundos.
    #[serde(default = "default_activity_timeout_secs")]
    pub activity_timeout_secs: u64,

    /// Diretório dos checkpoints de jobs.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

fn default_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_handoff_threshold() -> usize {
    RestartPolicy::DEFAULT_THRESHOLD
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_interval_ms() -> u64 {
    5_000
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_activity_timeout_secs() -> u64 {
    60
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".baton")
}

impl Default for BatonConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            handoff_threshold: default_handoff_threshold(),
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            backoff_coefficient: default_backoff_coefficient(),
            max_interval_ms: default_max_interval_ms(),
            activity_timeout_secs: default_activity_timeout_secs(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

impl BatonConfig {
    /// Carrega a configuração de `baton.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("baton.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<BatonConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para a chave API.
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_interval_ms: self.initial_interval_ms,
            backoff_coefficient: self.backoff_coefficient,
            max_interval_ms: self.max_interval_ms,
            timeout_ms: self.activity_timeout_secs.saturating_mul(1_000),
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::new(self.handoff_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = BatonConfig::default();
        assert_eq!(config.model, "claude-haiku-4-5-20251001");
        assert_eq!(config.handoff_threshold, 4_000);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.checkpoint_dir, PathBuf::from(".baton"));
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_key = "sk-test-123"
            handoff_threshold = 500
            activity_timeout_secs = 5
        "#;
        let config: BatonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_key, "sk-test-123");
        assert_eq!(config.handoff_threshold, 500);
        assert_eq!(config.initial_interval_ms, 5_000);
        assert_eq!(config.retry_config().timeout_ms, 5_000);
        assert_eq!(config.restart_policy().max_run_events, 500);
    }

    #[test]
    fn retry_config_matches_defaults() {
        assert_eq!(BatonConfig::default().retry_config(), RetryConfig::default());
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BatonConfig::load_from(&dir.path().join("baton.toml")).unwrap();
        assert_eq!(config.max_attempts, 4);
    }

    #[test]
    fn invalid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baton.toml");
        std::fs::write(&path, "max_attempts = \"four\"").unwrap();
        let err = BatonConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }
}
