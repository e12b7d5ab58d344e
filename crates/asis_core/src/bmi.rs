use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Heights above this are read as centimetres.
pub const CENTIMETRE_THRESHOLD: f64 = 3.0;
pub const MAX_WEIGHT_KG: f64 = 500.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    ObesityI,
    ObesityII,
    ObesityIII,
}

impl BmiCategory {
    pub fn from_value(bmi: f64) -> Self {
        if bmi < 18.5 {
            Self::Underweight
        } else if bmi < 25.0 {
            Self::Normal
        } else if bmi < 30.0 {
            Self::Overweight
        } else if bmi < 35.0 {
            Self::ObesityI
        } else if bmi < 40.0 {
            Self::ObesityII
        } else {
            Self::ObesityIII
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Underweight => "Bajo peso",
            Self::Normal => "Peso normal",
            Self::Overweight => "Sobrepeso",
            Self::ObesityI => "Obesidad grado I",
            Self::ObesityII => "Obesidad grado II",
            Self::ObesityIII => "Obesidad grado III",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BmiReading {
    pub weight_kg: f64,
    pub height_m: f64,
    /// Rounded to two decimals.
    pub bmi: f64,
    pub category: BmiCategory,
}

pub fn normalize_height(height: f64) -> f64 {
    if height > CENTIMETRE_THRESHOLD {
        height / 100.0
    } else {
        height
    }
}

pub fn validate_weight(weight_kg: f64) -> Result<f64, AppError> {
    if !weight_kg.is_finite() || weight_kg <= 0.0 || weight_kg > MAX_WEIGHT_KG {
        return Err(AppError::new("BMI_WEIGHT_INVALID", "Weight must be in (0, 500] kg")
            .with_details(format!("weight={weight_kg}")));
    }
    Ok(weight_kg)
}

pub fn validate_height(height: f64) -> Result<f64, AppError> {
    let h = normalize_height(height);
    if !h.is_finite() || h <= 0.0 || h > CENTIMETRE_THRESHOLD {
        return Err(AppError::new("BMI_HEIGHT_INVALID", "Height must be in (0, 3] m")
            .with_details(format!("height={height}")));
    }
    Ok(h)
}

pub fn compute_bmi(weight_kg: f64, height: f64) -> Result<BmiReading, AppError> {
    let weight_kg = validate_weight(weight_kg)?;
    let height_m = validate_height(height)?;
    let raw = weight_kg / (height_m * height_m);
    let bmi = (raw * 100.0).round() / 100.0;
    Ok(BmiReading {
        weight_kg,
        height_m,
        bmi,
        category: BmiCategory::from_value(raw),
    })
}

/// First decimal number in free text. Accepts `,` as the decimal separator.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|c| c.is_ascii_digit())?;
    let mut out = String::new();
    let mut seen_sep = false;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            out.push(c);
        } else if (c == '.' || c == ',')
            && !seen_sep
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
        {
            seen_sep = true;
            out.push('.');
        } else {
            break;
        }
        i += 1;
    }
    out.parse::<f64>().ok()
}
