pub fn intent_prompt(goal: &str, message: &str) -> String {
    format!(
        r#"Eres un asistente médico. Analiza si el usuario quiere {goal}.
Responde solo con una palabra: SI, NO o DUDA (si no queda claro).

Mensaje del usuario: {message}"#
    )
}

pub fn extract_number_prompt(field: &str, unit: &str, message: &str) -> String {
    format!(
        r#"Eres un asistente médico. Extrae el valor numérico {field} en {unit} del mensaje del usuario. Responde solo con el número.

Mensaje del usuario: {message}"#
    )
}

pub fn recommendation_prompt(bmi: f64, category: &str) -> String {
    format!(
        r#"Eres un asistente médico especializado en nutrición. Un paciente tiene un IMC de {bmi} que corresponde a la categoría: {category}.
Proporciona:
1. Una breve explicación de lo que significa su IMC (máximo 2 oraciones)
2. Entre 2-3 recomendaciones generales de salud relacionadas con su categoría de IMC
3. Recuerda que esto no reemplaza el consejo médico profesional
Responde de manera concisa y amigable."#
    )
}
