use asis_core::error::AppError;

pub const MAX_QUESTION_CHARS: usize = 4000;

/// Rejects questions that must not reach a model. Returns the trimmed question.
pub fn validate_question(question: &str) -> Result<&str, AppError> {
    let q = question.trim();
    if q.is_empty() {
        return Err(AppError::new("AI_QUESTION_EMPTY", "Question is empty"));
    }
    let len = q.chars().count();
    if len > MAX_QUESTION_CHARS {
        return Err(AppError::new("AI_QUESTION_TOO_LONG", "Question exceeds the length limit")
            .with_details(format!("chars={len}; max={MAX_QUESTION_CHARS}")));
    }
    Ok(q)
}
