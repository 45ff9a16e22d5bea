//! System prompt construction for the extractor (§4.3 step 2). Prompts are
//! selected by file kind (text/csv/image) and interpolate the allowed
//! entity types and the file's base name; a "Document metadata:" section is
//! appended when the file carries extracted metadata.

use graph_types::{DEFAULT_ENTITY_TYPES, FACT_ENTITY_TYPE};

pub const EXTRACT_SCHEMA_NAME: &str = "extract_entities_and_relationships";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Text,
    Csv,
    Image,
}

fn allowed_types_clause() -> String {
    let mut types: Vec<&str> = DEFAULT_ENTITY_TYPES.to_vec();
    types.push(FACT_ENTITY_TYPE);
    types.join(", ")
}

/// Builds the system prompt for one unit's extraction call.
pub fn system_prompt(kind: PromptKind, base_name: &str, metadata: Option<&serde_json::Value>) -> String {
    let allowed = allowed_types_clause();
    let mut prompt = match kind {
        PromptKind::Text => format!(
            "You are extracting a knowledge graph from a document named \"{base_name}\". \
             Identify entities and the relationships between them from the text that \
             follows. Use only these entity types: {allowed}. Entities that are facts, \
             claims, or statements without a clear name should use the {FACT_ENTITY_TYPE} \
             type. Be precise: only extract what is explicitly stated."
        ),
        PromptKind::Csv => format!(
            "You are extracting a knowledge graph from tabular data in \"{base_name}\". \
             Each row describes one or more records; treat column headers as field names. \
             Identify entities and relationships implied by the rows. Use only these entity \
             types: {allowed}."
        ),
        PromptKind::Image => format!(
            "You are extracting a knowledge graph from an image named \"{base_name}\" (already \
             captioned as text below). Identify entities and relationships visible in the \
             description. Use only these entity types: {allowed}."
        ),
    };

    if let Some(meta) = metadata {
        prompt.push_str("\n\nDocument metadata:\n");
        prompt.push_str(&meta.to_string());
    }

    prompt
}

/// JSON schema for the `extract_entities_and_relationships` structured
/// output call: a flat list of entities and a flat list of relationships,
/// the latter referencing the former by exact name.
pub fn extract_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "type": {"type": "string"},
                        "description": {"type": "string"}
                    },
                    "required": ["name", "type", "description"]
                }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source_entity": {"type": "string"},
                        "target_entity": {"type": "string"},
                        "description": {"type": "string"},
                        "relationship_strength": {"type": "number"}
                    },
                    "required": ["source_entity", "target_entity", "description", "relationship_strength"]
                }
            }
        },
        "required": ["entities", "relationships"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_prompt_interpolates_base_name_and_types() {
        let prompt = system_prompt(PromptKind::Text, "report.pdf", None);
        assert!(prompt.contains("report.pdf"));
        assert!(prompt.contains("FACT"));
        assert!(prompt.contains("PERSON"));
    }

    #[test]
    fn appends_metadata_section_when_present() {
        let meta = serde_json::json!({"author": "Jane"});
        let prompt = system_prompt(PromptKind::Csv, "data.csv", Some(&meta));
        assert!(prompt.contains("Document metadata:"));
        assert!(prompt.contains("Jane"));
    }

    #[test]
    fn omits_metadata_section_when_absent() {
        let prompt = system_prompt(PromptKind::Image, "photo.jpg", None);
        assert!(!prompt.contains("Document metadata:"));
    }
}
