use serde_json::json;

/// System message for the single structured-output enrichment call
///.
pub static ENRICHMENT_SYSTEM_MESSAGE: &str = "You are a librarian cataloguing a document for a \
knowledge base. Given the document's title and text, produce a short neutral abstract, a small \
set of topical subjects, a best-guess classification code with confidence, any citations you can \
identify (as URLs with surrounding context), and scholarly metadata only if the document is \
academic in nature. Do not invent facts not present in the text. Leave a field null/empty when \
you are not confident rather than guessing.";

pub fn get_enrichment_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "description": { "type": ["string", "null"] },
            "subjects": {
                "type": "array",
                "items": { "type": "string" }
            },
            "classification": {
                "type": ["object", "null"],
                "properties": {
                    "code": { "type": "string" },
                    "confidence": { "type": "number" }
                },
                "required": ["code", "confidence"],
                "additionalProperties": false
            },
            "citations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "target_url": { "type": "string" },
                        "citation_type": {
                            "type": "string",
                            "enum": ["reference", "dataset", "code", "general"]
                        },
                        "context": { "type": ["string", "null"] },
                        "position": { "type": ["integer", "null"] }
                    },
                    "required": ["target_url", "citation_type", "context", "position"],
                    "additionalProperties": false
                }
            },
            "scholarly": {
                "type": ["object", "null"],
                "properties": {
                    "authors": {
                        "type": "array",
                        "items": { "type": "string" }
                    },
                    "doi": { "type": ["string", "null"] },
                    "equation_count": { "type": "integer" },
                    "table_count": { "type": "integer" }
                },
                "required": ["authors", "doi", "equation_count", "table_count"],
                "additionalProperties": false
            }
        },
        "required": ["description", "subjects", "classification", "citations", "scholarly"],
        "additionalProperties": false
    })
}
