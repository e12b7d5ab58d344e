use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape used across backend layers and surfaced to the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

/// Coarse failure classes. Each code prefix maps onto exactly one of these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Ingestion,
    Retrieval,
    Generation,
    Session,
    Input,
    Collaborator,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    pub fn category(&self) -> ErrorCategory {
        let code = self.code.as_str();
        if code.starts_with("CONFIG_") {
            ErrorCategory::Configuration
        } else if code.starts_with("INGEST_") {
            ErrorCategory::Ingestion
        } else if code == "AI_RETRIEVAL_FAILED" {
            ErrorCategory::Retrieval
        } else if code == "AI_GENERATION_UNAVAILABLE" {
            ErrorCategory::Generation
        } else if code.starts_with("SESSION_") {
            ErrorCategory::Session
        } else if code.starts_with("AI_QUESTION_") || code.starts_with("BMI_") {
            ErrorCategory::Input
        } else {
            ErrorCategory::Collaborator
        }
    }

    /// Friendly text for the chat transport. Never exposes `details`.
    pub fn user_message(&self) -> String {
        match self.code.as_str() {
            "INGEST_UNSUPPORTED_TYPE" => {
                "Ese tipo de archivo no está soportado. Por favor, sube un PDF.".to_string()
            }
            "INGEST_TOO_LARGE" => "El archivo supera el tamaño máximo permitido.".to_string(),
            "INGEST_UNREADABLE" => {
                "No pude leer el documento. Intenta subirlo de nuevo.".to_string()
            }
            "INGEST_EMPTY_DOCUMENT" => {
                "El documento no contiene texto que pueda procesar.".to_string()
            }
            "INGEST_UPLOAD_TIMEOUT" => {
                "No recibí ningún archivo a tiempo. Por favor, sube un PDF para comenzar.".to_string()
            }
            "AI_GENERATION_UNAVAILABLE" => {
                "El modelo no está disponible en este momento. Puedes repetir la pregunta en unos segundos."
                    .to_string()
            }
            "AI_RETRIEVAL_FAILED" => {
                "No pude consultar el documento. Puedes repetir la pregunta.".to_string()
            }
            "AI_QUESTION_EMPTY" => "Escribe una pregunta para continuar.".to_string(),
            "AI_QUESTION_TOO_LONG" => "La pregunta es demasiado larga. Intenta resumirla.".to_string(),
            "SESSION_BUSY" => {
                "Todavía estoy respondiendo tu mensaje anterior. Espera un momento.".to_string()
            }
            "SESSION_NOT_READY" => {
                "Primero necesito un documento. Por favor, sube un PDF.".to_string()
            }
            "SESSION_NOT_FOUND" | "SESSION_CANCELLED" => {
                "La sesión terminó. Inicia una nueva conversación.".to_string()
            }
            _ => match self.category() {
                ErrorCategory::Configuration => {
                    format!("Configuración inválida: {}", self.message)
                }
                ErrorCategory::Ingestion => {
                    "No pude procesar el documento. Intenta subirlo de nuevo.".to_string()
                }
                _ => "Ocurrió un error inesperado. Intenta de nuevo.".to_string(),
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
