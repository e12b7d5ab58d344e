use std::path::PathBuf;

use asis_core::config::Settings;
use asis_core::error::AppError;
use clap::{Args, Parser, Subcommand};

/// Asistente: preguntas sobre documentos PDF y cálculo de IMC
#[derive(Parser, Debug)]
#[command(name = "asistente")]
#[command(version)]
#[command(about = "Terminal assistant: document Q&A and BMI dialogue", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub overrides: SettingsArgs,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Upload a document and ask questions about it
    Chat,

    /// Guided BMI (IMC) calculation
    Imc,
}

#[derive(Args, Debug, Default, Clone)]
pub struct SettingsArgs {
    /// JSON settings file
    #[arg(long, global = true, env = "ASISTENTE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Chat model name
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Embedding model name, used for both indexing and queries
    #[arg(long = "embedding-model", global = true)]
    pub embedding_model: Option<String>,

    /// Local Ollama base URL
    #[arg(long = "ollama-url", global = true)]
    pub ollama_url: Option<String>,
}

impl SettingsArgs {
    /// Defaults, then the JSON file, then `ASISTENTE_*` env, then flags.
    pub fn load(&self) -> Result<Settings, AppError> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_json_file(path)?,
            None => Settings::default(),
        };
        settings.apply_process_env()?;
        self.apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut Settings) {
        if let Some(m) = &self.model {
            settings.chat_model = m.clone();
        }
        if let Some(m) = &self.embedding_model {
            settings.embedding_model = m.clone();
        }
        if let Some(u) = &self.ollama_url {
            settings.ollama_base_url = u.clone();
        }
    }
}
