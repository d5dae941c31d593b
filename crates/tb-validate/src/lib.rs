// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-validate
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Compiles and caches JSON-schema validators per tool (spec.md §4.2).
//! Coercion is disabled — `jsonschema` validates structurally, never
//! mutates the instance — and additional-properties policy is whatever
//! each tool's schema declares.

use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tb_core::Tool;
use tb_error::FieldError;

/// Outcome of validating a call's input against `tool.input_schema`.
#[derive(Debug, Clone)]
pub enum InputValidation {
    /// The input satisfies the schema.
    Ok,
    /// The input does not satisfy the schema; every violation is reported
    /// (validation does not short-circuit on the first error).
    Invalid(Vec<FieldError>),
}

impl InputValidation {
    /// `true` for [`InputValidation::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Compiles [`jsonschema::Validator`]s lazily and caches them by tool name.
///
/// A `Validator` here is cheap to hold across calls: schema compilation is
/// the expensive part, and the Registry guarantees tool definitions never
/// change after load (invariant R1), so the cache never needs invalidation.
pub struct SchemaValidator {
    input_cache: RwLock<HashMap<String, Validator>>,
    output_cache: RwLock<HashMap<String, Validator>>,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    /// Construct an empty validator cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            input_cache: RwLock::new(HashMap::new()),
            output_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `input` against `tool.input_schema`, compiling and caching
    /// the validator on first use.
    ///
    /// A compile failure here is treated as every input failing, since a
    /// tool that passed `Registry::load` always has a compilable schema;
    /// seeing one fail to compile post-load means something tampered with
    /// the in-memory `Tool`, which is itself a bug worth surfacing loudly.
    pub fn validate_input(&self, tool: &Tool, input: &Value) -> InputValidation {
        self.validate_against(&self.input_cache, &tool.name, &tool.input_schema, input)
    }

    /// Soft-validate `result` against `tool.output_schema`. Mismatches are
    /// logged at `warn` level via `tracing` and never block the receipt —
    /// this is intentionally forgiving for forward-compatible handlers.
    pub fn validate_output(&self, tool: &Tool, result: &Value) {
        if let InputValidation::Invalid(errors) =
            self.validate_against(&self.output_cache, &tool.name, &tool.output_schema, result)
        {
            tracing::warn!(
                tool_name = %tool.name,
                error_count = errors.len(),
                "output failed soft schema validation"
            );
        }
    }

    fn validate_against(
        &self,
        cache: &RwLock<HashMap<String, Validator>>,
        tool_name: &str,
        schema: &Value,
        instance: &Value,
    ) -> InputValidation {
        if !self.contains(cache, tool_name) {
            match jsonschema::validator_for(schema) {
                Ok(compiled) => {
                    cache.write().unwrap().insert(tool_name.to_string(), compiled);
                }
                Err(e) => {
                    return InputValidation::Invalid(vec![FieldError::new(
                        "/",
                        "schema_compile_error",
                        e.to_string(),
                    )]);
                }
            }
        }

        let guard = cache.read().unwrap();
        let validator = guard.get(tool_name).expect("just inserted or already cached");
        let errors: Vec<FieldError> = validator
            .iter_errors(instance)
            .map(|e| {
                let path = e.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                FieldError::new(path, keyword_of(&e), e.to_string())
            })
            .collect();

        if errors.is_empty() {
            InputValidation::Ok
        } else {
            InputValidation::Invalid(errors)
        }
    }

    fn contains(&self, cache: &RwLock<HashMap<String, Validator>>, tool_name: &str) -> bool {
        cache.read().unwrap().contains_key(tool_name)
    }
}

/// Best-effort extraction of a schema-validation keyword (e.g. `"required"`,
/// `"type"`, `"min_length"`) from a `jsonschema::ValidationError`'s kind.
fn keyword_of(error: &jsonschema::ValidationError<'_>) -> String {
    let debug = format!("{:?}", error.kind);
    let variant = debug.split(['(', ' ', '{']).next().unwrap_or("validation");
    to_snake_case(variant)
}

fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, ch) in s.char_indices() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
