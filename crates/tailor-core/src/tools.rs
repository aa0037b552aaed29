use serde::{Deserialize, Serialize};

/// One entry in a worker's tool catalog, as sent to the reasoning service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Textual result of one executed tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_serde_roundtrip() {
        let desc = ToolDescriptor {
            name: "compile_latex".into(),
            description: "Compile LaTeX to PDF".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "required": ["source"],
                "properties": {"source": {"type": "string"}}
            }),
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["name"], "compile_latex");
        let parsed: ToolDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.description, desc.description);
    }

    #[test]
    fn text_output_is_not_error() {
        let out = ToolOutput::text("ok");
        assert!(!out.is_error);
        assert_eq!(out.content, "ok");
    }
}
