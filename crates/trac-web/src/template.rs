//! Template rendering collaborator

use serde_json::{Value, json};
use trac_core::Result;

/// Turns a template name and its data into a response body.
pub trait TemplateRenderer: Send + Sync {
    /// Returns the content type and the rendered bytes.
    fn render(&self, template: &str, data: &Value) -> Result<(String, Vec<u8>)>;
}

/// Serves the template data itself as JSON, tagged with the template name.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRenderer;

impl TemplateRenderer for JsonRenderer {
    fn render(&self, template: &str, data: &Value) -> Result<(String, Vec<u8>)> {
        let body = serde_json::to_vec_pretty(&json!({
            "template": template,
            "data": data,
        }))?;
        Ok(("application/json".to_string(), body))
    }
}
