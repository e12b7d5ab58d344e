use serde::{Deserialize, Serialize};

/// Where a chunk came from inside its document. Never null: formats without
/// positional information use `Unknown`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "kind", content = "number")]
pub enum PagePosition {
    Page(u32),
    Unknown,
}

impl PagePosition {
    /// Human label used in prompts and the sources footer.
    pub fn label(&self) -> String {
        match self {
            PagePosition::Page(n) => format!("Página {n}"),
            PagePosition::Unknown => "Página desconocida".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentPage {
    pub position: PagePosition,
    pub text: String,
}

/// Raw uploaded content. Consumed by chunking, then dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// The upload's file name.
    pub source_id: String,
    pub kind: DocumentKind,
    pub pages: Vec<DocumentPage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: String,
    pub sequence_index: u32,
    pub page: PagePosition,
    /// `[start, end)` in chars within the page text.
    pub char_range: [u32; 2],
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}
