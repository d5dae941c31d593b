// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-registry
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Loads the declarative tool catalog (spec.md §4.1, §6 "Tool Registry
//! file") once at startup and exposes a read-only lookup. Invariants R1
//! ("no mutation at runtime") and R2 ("names are unique") are enforced by
//! construction: [`Registry::load`] is the only way to build one, and it
//! consumes the input rather than exposing a mutator afterward.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tb_core::{IdempotencyMode, Tool};
use tb_error::{ErrorCode, TbError};

/// Top-level shape of a Tool Registry catalog document (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// Catalog schema version (informational; not the contract version).
    pub version: String,
    /// The declared tools.
    pub tools: Vec<Tool>,
}

/// An immutable, read-only catalog of tools, loaded once at startup
/// (invariant R1).
#[derive(Debug, Clone)]
pub struct Registry {
    version: String,
    tools: BTreeMap<String, Tool>,
}

impl Registry {
    /// Parse and validate a catalog document, rejecting every violation
    /// spec.md §4.1 names. Startup fails loudly — this never masks a
    /// problem by dropping the offending tool.
    ///
    /// # Errors
    ///
    /// Returns one [`TbError`] with `code = invalid_registry` per violation
    /// found; all violations are collected before returning so operators see
    /// the whole picture in one run.
    pub fn load(catalog: Catalog) -> Result<Self, Vec<TbError>> {
        let mut errors = Vec::new();
        let mut tools = BTreeMap::new();

        for tool in catalog.tools {
            if tools.contains_key(&tool.name) {
                errors.push(invalid_registry(&tool.name, "duplicate tool name"));
                continue;
            }
            if let Err(mut tool_errors) = validate_tool(&tool) {
                errors.append(&mut tool_errors);
                continue;
            }
            tools.insert(tool.name.clone(), tool);
        }

        if errors.is_empty() {
            Ok(Self {
                version: catalog.version,
                tools,
            })
        } else {
            Err(errors)
        }
    }

    /// The catalog's declared version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a tool by its dotted name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Iterate every registered tool, in name order.
    pub fn all(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// `true` when the catalog declared no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn invalid_registry(tool_name: &str, reason: &str) -> TbError {
    TbError::new(
        ErrorCode::InvalidRegistry,
        format!("tool `{tool_name}`: {reason}"),
    )
    .with_details(serde_json::json!({ "tool_name": tool_name, "reason": reason }))
}

/// Apply the per-tool load-time rules: mode=keyed requires a non-empty
/// `key_field` present in `input_schema.required` (invariant R3);
/// `timeout_ms` must be positive; both schemas must compile as JSON Schema.
fn validate_tool(tool: &Tool) -> Result<(), Vec<TbError>> {
    let mut errors = Vec::new();

    if tool.idempotency.mode == IdempotencyMode::Keyed {
        match &tool.idempotency.key_field {
            None => errors.push(invalid_registry(&tool.name, "mode=keyed requires a key_field")),
            Some(field) if field.is_empty() => {
                errors.push(invalid_registry(&tool.name, "key_field must not be empty"));
            }
            Some(field) => {
                let required = tool
                    .input_schema
                    .get("required")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str()).any(|s| s == field))
                    .unwrap_or(false);
                if !required {
                    errors.push(invalid_registry(
                        &tool.name,
                        &format!("key_field `{field}` is not in input_schema.required"),
                    ));
                }
            }
        }
    }

    if tool.timeout_ms == 0 {
        errors.push(invalid_registry(&tool.name, "timeout_ms must be positive"));
    }

    if let Err(e) = jsonschema::validator_for(&tool.input_schema) {
        errors.push(invalid_registry(&tool.name, &format!("invalid input_schema: {e}")));
    }
    if let Err(e) = jsonschema::validator_for(&tool.output_schema) {
        errors.push(invalid_registry(&tool.name, &format!("invalid output_schema: {e}")));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tb_core::Idempotency;

    fn base_tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: "test tool".into(),
            permissions: Default::default(),
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "object"}),
            idempotency: Idempotency {
                mode: IdempotencyMode::None,
                key_field: None,
            },
            timeout_ms: 1000,
            receipt_fields: vec![],
        }
    }

    #[test]
    fn loads_valid_catalog() {
        let catalog = Catalog {
            version: "1".into(),
            tools: vec![base_tool("os.create_note")],
        };
        let reg = Registry::load(catalog).unwrap();
        assert!(reg.get("os.create_note").is_some());
        assert!(reg.get("unknown.tool").is_none());
    }

    #[test]
    fn rejects_duplicate_names() {
        let catalog = Catalog {
            version: "1".into(),
            tools: vec![base_tool("dup.tool"), base_tool("dup.tool")],
        };
        let errs = Registry::load(catalog).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("duplicate")));
    }

    #[test]
    fn rejects_keyed_without_key_field() {
        let mut t = base_tool("leads.create");
        t.idempotency = Idempotency {
            mode: IdempotencyMode::Keyed,
            key_field: None,
        };
        let catalog = Catalog {
            version: "1".into(),
            tools: vec![t],
        };
        let errs = Registry::load(catalog).unwrap_err();
        assert!(errs.iter().any(|e| e.code == ErrorCode::InvalidRegistry));
    }

    #[test]
    fn rejects_key_field_not_in_required() {
        let mut t = base_tool("leads.create");
        t.input_schema = json!({"type": "object", "properties": {"phone": {"type": "string"}}, "required": []});
        t.idempotency = Idempotency {
            mode: IdempotencyMode::Keyed,
            key_field: Some("phone".into()),
        };
        let catalog = Catalog {
            version: "1".into(),
            tools: vec![t],
        };
        let errs = Registry::load(catalog).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("not in input_schema.required")));
    }

    #[test]
    fn accepts_keyed_with_key_field_in_required() {
        let mut t = base_tool("leads.create");
        t.input_schema = json!({"type": "object", "properties": {"phone": {"type": "string"}}, "required": ["phone"]});
        t.idempotency = Idempotency {
            mode: IdempotencyMode::Keyed,
            key_field: Some("phone".into()),
        };
        let catalog = Catalog {
            version: "1".into(),
            tools: vec![t],
        };
        assert!(Registry::load(catalog).is_ok());
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let mut t = base_tool("slow.tool");
        t.timeout_ms = 0;
        let catalog = Catalog {
            version: "1".into(),
            tools: vec![t],
        };
        let errs = Registry::load(catalog).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("timeout_ms")));
    }
}
