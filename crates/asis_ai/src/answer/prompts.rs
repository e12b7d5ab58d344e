/// Shown to the model in place of document excerpts when retrieval found nothing.
pub const NO_CONTEXT_MARKER: &str =
    "[SIN CONTEXTO] No se encontraron fragmentos del documento para esta pregunta.";

/// Leading line of every answer produced without document excerpts.
pub const NO_CONTEXT_NOTICE: &str =
    "(No se encontró contexto en el documento para esta pregunta.)";

pub fn condense_question_prompt(transcript: &str, question: &str) -> String {
    format!(
        r#"Dada la siguiente conversación y una pregunta de seguimiento, reformula la pregunta de seguimiento para que sea una pregunta independiente, en su idioma original.

Conversación:
{transcript}
Pregunta de seguimiento: {question}

Responde solo con la pregunta reformulada."#
    )
}

pub fn answer_prompt(context_blocks: &str, transcript: &str, question: &str) -> String {
    let history = if transcript.trim().is_empty() {
        "(sin conversación previa)"
    } else {
        transcript.trim_end()
    };
    format!(
        r#"Eres un asistente que responde preguntas sobre un documento subido por el usuario.

Reglas:
1) Usa SOLO los fragmentos del documento que aparecen abajo. No inventes datos.
2) Si los fragmentos no contienen la respuesta, dilo claramente.
3) Puedes mencionar los fragmentos por su etiqueta, por ejemplo [[source_0]].
4) Responde en el idioma de la pregunta, de forma breve y clara.

Fragmentos del documento:
{context_blocks}

Conversación previa:
{history}

Pregunta: {question}
Respuesta:"#
    )
}
