//! Structured entity queries and their embedding text.
use rulebook_core::config::QueryConfig;
use rulebook_core::types::MetadataFilter;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    pub entity_name: String,
    /// Free-text context; scanned in full for references.
    pub context_text: String,
    /// Extra labelled fields folded into the query text in order.
    pub fields: Vec<(String, String)>,
    pub filter: Option<MetadataFilter>,
}

impl EntityQuery {
    pub fn new(entity_name: impl Into<String>, context_text: impl Into<String>) -> Self {
        Self { entity_name: entity_name.into(), context_text: context_text.into(), fields: Vec::new(), filter: None }
    }

    pub fn with_field(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((label.into(), value.into()));
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// `"<entity_label>: <name> | <field>: <value> | <context_label>: <context> | <suffix>"`,
/// with the context cut to `max_context_chars`.
pub fn build_query_text(config: &QueryConfig, query: &EntityQuery) -> String {
    let mut parts = vec![format!("{}: {}", config.entity_label, query.entity_name.trim())];
    for (label, value) in &query.fields {
        if !value.trim().is_empty() {
            parts.push(format!("{}: {}", label.trim(), value.trim()));
        }
    }
    let context = query.context_text.trim();
    if !context.is_empty() {
        let truncated: String = context.chars().take(config.max_context_chars).collect();
        parts.push(format!("{}: {}", config.context_label, truncated.trim_end()));
    }
    if !config.suffix.trim().is_empty() {
        parts.push(config.suffix.trim().to_string());
    }
    parts.join(" | ")
}
