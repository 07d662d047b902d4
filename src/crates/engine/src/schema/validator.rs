//! Structural and semantic schema validation.
//!
//! Validation is pure and side-effect-free and always runs before any
//! persistence — submitted schemas, merged schemas, and live-update targets
//! all pass through the same `SchemaValidator`.

use std::collections::{HashMap, HashSet};

use jsonschema::JSONSchema;
use serde_json::Value;

use super::Schema;
use crate::error::{EngineError, Result};

/// A connection a template requires, by logical kind (e.g. "trigger", "tool").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequiredConnection {
    pub kind: String,
    pub direction: ConnectionDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionDirection {
    Incoming,
    Outgoing,
}

/// What the validator needs to know about a template: its declared config
/// schema and the connections it requires. Concrete node implementations are
/// out of scope; this descriptor is the minimal contract the validator
/// depends on, supplied by whatever `TemplateRegistry` the caller wires up.
#[derive(Debug, Clone)]
pub struct TemplateDescriptor {
    pub kind: String,
    pub config_schema: Option<Value>,
    pub required: Vec<RequiredConnection>,
}

/// Validates a `Schema` against structural invariants and, where a
/// `TemplateDescriptor` catalog is supplied, template-level semantic rules.
pub struct SchemaValidator {
    templates: HashMap<String, TemplateDescriptor>,
    catalog_provided: bool,
}

impl SchemaValidator {
    /// `templates` is the full catalog the caller intends to validate
    /// against. An entry missing from it (a node referencing a template
    /// that didn't resolve) is still a catalog that was provided, so
    /// `validate` must still run `check_templates` and raise
    /// `INVALID_TEMPLATE` for it — not skip template checks outright.
    pub fn new(templates: HashMap<String, TemplateDescriptor>) -> Self {
        Self {
            templates,
            catalog_provided: true,
        }
    }

    /// A validator with no template catalog at all — only structural checks
    /// run. Useful for tests and for contexts where the template catalog
    /// isn't available (e.g. three-way merge re-validation where the caller
    /// has already confirmed every referenced template exists once
    /// elsewhere). Distinct from `new` with an empty map: that means "a
    /// catalog was built and nothing in it resolved," which must still fail.
    pub fn structural() -> Self {
        Self {
            templates: HashMap::new(),
            catalog_provided: false,
        }
    }

    pub fn validate(&self, schema: &Schema) -> Result<()> {
        self.check_duplicate_node_ids(schema)?;
        self.check_dangling_edges(schema)?;
        if self.catalog_provided {
            self.check_templates(schema)?;
            self.check_required_connections(schema)?;
        }
        Ok(())
    }

    fn check_duplicate_node_ids(&self, schema: &Schema) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &schema.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(EngineError::DuplicateNodeId(node.id.clone()));
            }
        }
        Ok(())
    }

    fn check_dangling_edges(&self, schema: &Schema) -> Result<()> {
        let ids = schema.node_ids();
        for edge in &schema.edges {
            if !ids.contains(edge.from.as_str()) {
                return Err(EngineError::DanglingEdge(format!(
                    "edge references unknown source node {}",
                    edge.from
                )));
            }
            if !ids.contains(edge.to.as_str()) {
                return Err(EngineError::DanglingEdge(format!(
                    "edge references unknown target node {}",
                    edge.to
                )));
            }
        }
        Ok(())
    }

    fn check_templates(&self, schema: &Schema) -> Result<()> {
        for node in &schema.nodes {
            let descriptor = self
                .templates
                .get(&node.template)
                .ok_or_else(|| EngineError::InvalidTemplate(node.template.clone()))?;

            if let Some(config_schema) = &descriptor.config_schema {
                let compiled = JSONSchema::compile(config_schema).map_err(|e| {
                    EngineError::InvalidTemplate(format!(
                        "template {} has an invalid config schema: {}",
                        node.template, e
                    ))
                })?;
                if let Err(mut errors) = compiled.validate(&node.config) {
                    let message = errors
                        .next()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "config does not match schema".to_string());
                    return Err(EngineError::InvalidConfig(format!(
                        "node {}: {}",
                        node.id, message
                    )));
                };
            }
        }
        Ok(())
    }

    fn check_required_connections(&self, schema: &Schema) -> Result<()> {
        for node in &schema.nodes {
            let Some(descriptor) = self.templates.get(&node.template) else {
                continue;
            };
            for required in &descriptor.required {
                let satisfied = match required.direction {
                    ConnectionDirection::Incoming => !schema.incoming(&node.id).is_empty(),
                    ConnectionDirection::Outgoing => !schema.outgoing(&node.id).is_empty(),
                };
                if !satisfied {
                    return Err(EngineError::MissingRequiredConnection(format!(
                        "node {} ({}) requires a {:?} {} connection",
                        node.id, node.template, required.direction, required.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Edge, Node};

    fn node(id: &str, template: &str) -> Node {
        Node {
            id: id.to_string(),
            template: template.to_string(),
            config: serde_json::json!({}),
        }
    }

    #[test]
    fn detects_duplicate_node_ids() {
        let schema = Schema::new(vec![node("a", "t"), node("a", "t")], vec![]);
        let err = SchemaValidator::structural().validate(&schema).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_NODE_ID");
    }

    #[test]
    fn detects_dangling_edges() {
        let schema = Schema::new(
            vec![node("a", "t")],
            vec![Edge {
                from: "a".to_string(),
                to: "missing".to_string(),
            }],
        );
        let err = SchemaValidator::structural().validate(&schema).unwrap_err();
        assert_eq!(err.code(), "DANGLING_EDGE");
    }

    #[test]
    fn valid_schema_passes_structural_checks() {
        let schema = Schema::new(
            vec![node("a", "t"), node("b", "t")],
            vec![Edge {
                from: "a".to_string(),
                to: "b".to_string(),
            }],
        );
        assert!(SchemaValidator::structural().validate(&schema).is_ok());
    }

    #[test]
    fn rejects_unknown_template() {
        let mut templates = HashMap::new();
        templates.insert(
            "known".to_string(),
            TemplateDescriptor {
                kind: "agent".to_string(),
                config_schema: None,
                required: vec![],
            },
        );
        let schema = Schema::new(vec![node("a", "unknown")], vec![]);
        let err = SchemaValidator::new(templates).validate(&schema).unwrap_err();
        assert_eq!(err.code(), "INVALID_TEMPLATE");
    }

    #[test]
    fn rejects_unknown_template_even_when_catalog_resolves_nothing() {
        // A catalog was built (`new`, not `structural`) but every node in
        // the schema references a template that failed to resolve, so the
        // descriptor map itself is empty — this must still fail, not be
        // treated the same as "no catalog was ever supplied".
        let schema = Schema::new(vec![node("a", "unknown")], vec![]);
        let err = SchemaValidator::new(HashMap::new()).validate(&schema).unwrap_err();
        assert_eq!(err.code(), "INVALID_TEMPLATE");
    }

    #[test]
    fn enforces_required_connection() {
        let mut templates = HashMap::new();
        templates.insert(
            "simple-agent".to_string(),
            TemplateDescriptor {
                kind: "agent".to_string(),
                config_schema: None,
                required: vec![RequiredConnection {
                    kind: "trigger".to_string(),
                    direction: ConnectionDirection::Incoming,
                }],
            },
        );
        let schema = Schema::new(vec![node("agent-1", "simple-agent")], vec![]);
        let err = SchemaValidator::new(templates).validate(&schema).unwrap_err();
        assert_eq!(err.code(), "MISSING_REQUIRED_CONNECTION");
    }

    #[test]
    fn enforces_config_schema() {
        let mut templates = HashMap::new();
        templates.insert(
            "simple-agent".to_string(),
            TemplateDescriptor {
                kind: "agent".to_string(),
                config_schema: Some(serde_json::json!({
                    "type": "object",
                    "required": ["instructions"],
                    "properties": { "instructions": { "type": "string" } }
                })),
                required: vec![],
            },
        );
        let schema = Schema::new(vec![node("agent-1", "simple-agent")], vec![]);
        let err = SchemaValidator::new(templates).validate(&schema).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }
}
