//! BMI slot-filling dialogue.
//!
//! `Start -> AskWeight -> AskHeight -> Result`, then back to `AskWeight` or `Start`.
//! Model failures never lose a turn: extraction falls back to local parsing,
//! intent to a clarification prompt and recommendations to a fixed disclaimer.

use std::sync::Arc;

use asis_core::bmi::{compute_bmi, parse_decimal, validate_weight, BmiReading};
use asis_core::config::Settings;
use asis_core::error::AppError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::llm::{generate_with_retry, GenerationCall, Llm, RetryPolicy};

pub mod intent;
mod prompts;

pub use intent::{parse_intent, Intent, IntentClassifier};

pub const GREETING: &str = "¡Hola! Soy tu asistente para calcular el Índice de Masa Corporal (IMC). \
El IMC es un indicador que relaciona el peso y la altura para identificar posibles problemas de peso. \
¿Te gustaría calcular tu IMC ahora?";

const ASK_WEIGHT: &str = "Para calcular tu IMC, necesito algunos datos. ¿Cuál es tu peso en kilogramos?";
const ASK_WEIGHT_AGAIN: &str = "Perfecto, vamos a calcular el IMC nuevamente. ¿Cuál es tu peso en kilogramos?";
const DECLINED: &str = "Entiendo. Si en algún momento deseas calcular tu IMC, solo házmelo saber. \
El IMC es útil para evaluar si tu peso está en un rango saludable.";
const FAREWELL: &str = "Entendido. Si necesitas calcular tu IMC en el futuro o tienes otras preguntas sobre salud, \
no dudes en preguntar. ¡Cuídate!";
const CLARIFY_START: &str = "No estoy seguro de haberte entendido. ¿Quieres calcular tu IMC? Responde sí o no.";
const CLARIFY_AGAIN: &str =
    "No estoy seguro de haberte entendido. ¿Quieres calcular el IMC nuevamente con otros valores? Responde sí o no.";
const WEIGHT_UNPARSED: &str = "No pude entender el peso que me proporcionaste. \
Por favor, indica tu peso en kilogramos usando un número (por ejemplo: 70).";
const WEIGHT_OUT_OF_RANGE: &str = "El peso debe ser mayor que 0 y como máximo 500 kg. \
Por favor, indica tu peso en kilogramos (por ejemplo: 70).";
const HEIGHT_UNPARSED: &str = "No pude entender la altura que me proporcionaste. \
Por favor, indica tu altura en metros usando un número decimal (por ejemplo: 1.75).";
const HEIGHT_OUT_OF_RANGE: &str = "La altura debe ser mayor que 0 y como máximo 3 metros (o 300 cm). \
Por favor, indica tu altura en metros (por ejemplo: 1.75).";
pub const FALLBACK_RECOMMENDATION: &str = "No pude generar recomendaciones en este momento. \
Recuerda que el IMC es solo un indicador orientativo y no reemplaza el consejo médico profesional.";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum BmiStage {
    #[default]
    Start,
    AskWeight,
    AskHeight {
        weight_kg: f64,
    },
    Result,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BmiSettings {
    pub model: String,
    pub classify_temperature: f32,
    pub recommend_temperature: f32,
    pub retry: RetryPolicy,
}

impl BmiSettings {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            model: s.chat_model.clone(),
            classify_temperature: s.classify_temperature,
            recommend_temperature: s.recommend_temperature,
            retry: RetryPolicy {
                max_attempts: s.max_generation_attempts,
                base_delay: s.retry_base_delay(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BmiReply {
    pub text: String,
    /// Set when this turn completed a calculation.
    pub reading: Option<BmiReading>,
}

impl BmiReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reading: None,
        }
    }
}

pub struct BmiDialogue {
    llm: Arc<dyn Llm>,
    classifier: IntentClassifier,
    settings: BmiSettings,
}

impl BmiDialogue {
    pub fn new(llm: Arc<dyn Llm>, settings: BmiSettings) -> Self {
        let classifier = IntentClassifier::new(
            llm.clone(),
            settings.model.clone(),
            settings.classify_temperature,
        );
        Self {
            llm,
            classifier,
            settings,
        }
    }

    pub fn greeting(&self) -> &'static str {
        GREETING
    }

    /// Advances `stage` by one user message. Only cancellation is an error.
    pub fn handle(
        &self,
        stage: &mut BmiStage,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<BmiReply, AppError> {
        match *stage {
            BmiStage::Start => {
                let intent = self.classifier.classify("calcular su IMC", message, cancel)?;
                Ok(BmiReply::text(match intent {
                    Intent::Yes => {
                        *stage = BmiStage::AskWeight;
                        ASK_WEIGHT
                    }
                    Intent::No => DECLINED,
                    Intent::Ambiguous => CLARIFY_START,
                }))
            }
            BmiStage::AskWeight => {
                let weight = self.extract_number("del peso", "kilogramos", message, cancel)?;
                let Some(raw) = weight else {
                    return Ok(BmiReply::text(WEIGHT_UNPARSED));
                };
                match validate_weight(raw) {
                    Ok(weight_kg) => {
                        *stage = BmiStage::AskHeight { weight_kg };
                        Ok(BmiReply::text(format!(
                            "Gracias, he registrado tu peso como {weight_kg} kg. \
Ahora, ¿cuál es tu altura en metros? (por ejemplo, 1.75)"
                        )))
                    }
                    Err(_) => Ok(BmiReply::text(WEIGHT_OUT_OF_RANGE)),
                }
            }
            BmiStage::AskHeight { weight_kg } => {
                let height = self.extract_number("de la altura", "metros", message, cancel)?;
                let Some(raw) = height else {
                    return Ok(BmiReply::text(HEIGHT_UNPARSED));
                };
                let reading = match compute_bmi(weight_kg, raw) {
                    Ok(r) => r,
                    Err(_) => return Ok(BmiReply::text(HEIGHT_OUT_OF_RANGE)),
                };
                let recommendations = self.recommendations(&reading, cancel)?;
                *stage = BmiStage::Result;
                info!(bmi = reading.bmi, category = reading.category.label(), "bmi computed");
                Ok(BmiReply {
                    text: render_result(&reading, &recommendations),
                    reading: Some(reading),
                })
            }
            BmiStage::Result => {
                let intent =
                    self.classifier.classify("calcular su IMC nuevamente", message, cancel)?;
                Ok(BmiReply::text(match intent {
                    Intent::Yes => {
                        *stage = BmiStage::AskWeight;
                        ASK_WEIGHT_AGAIN
                    }
                    Intent::No => {
                        *stage = BmiStage::Start;
                        FAREWELL
                    }
                    Intent::Ambiguous => CLARIFY_AGAIN,
                }))
            }
        }
    }

    /// Model extraction first, then the first number in the user's own text.
    fn extract_number(
        &self,
        field: &str,
        unit: &str,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, AppError> {
        let prompt = prompts::extract_number_prompt(field, unit, message);
        let call = GenerationCall {
            model: &self.settings.model,
            prompt: &prompt,
            temperature: self.settings.classify_temperature,
        };
        let once = RetryPolicy {
            max_attempts: 1,
            ..self.settings.retry
        };
        let from_model = match generate_with_retry(self.llm.as_ref(), &call, once, cancel, None) {
            Ok(reply) => parse_decimal(&reply),
            Err(e) if e.is("SESSION_CANCELLED") => return Err(e),
            Err(e) => {
                warn!(code = %e.code, "number extraction failed, parsing the message locally");
                None
            }
        };
        Ok(from_model.or_else(|| parse_decimal(message)))
    }

    fn recommendations(
        &self,
        reading: &BmiReading,
        cancel: &CancellationToken,
    ) -> Result<String, AppError> {
        let prompt = prompts::recommendation_prompt(reading.bmi, reading.category.label());
        let call = GenerationCall {
            model: &self.settings.model,
            prompt: &prompt,
            temperature: self.settings.recommend_temperature,
        };
        match generate_with_retry(self.llm.as_ref(), &call, self.settings.retry, cancel, None) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) if e.is("SESSION_CANCELLED") => Err(e),
            Err(e) => {
                warn!(code = %e.code, "recommendations unavailable, using fixed disclaimer");
                Ok(FALLBACK_RECOMMENDATION.to_string())
            }
        }
    }
}

fn render_result(reading: &BmiReading, recommendations: &str) -> String {
    format!(
        "**Resultados de tu IMC**\n\n\
Peso: {} kg\n\
Altura: {} m\n\
IMC calculado: {}\n\
Categoría: {}\n\n\
{}\n\n\
¿Te gustaría calcular el IMC nuevamente con otros valores?",
        reading.weight_kg,
        reading.height_m,
        reading.bmi,
        reading.category.label(),
        recommendations
    )
}
