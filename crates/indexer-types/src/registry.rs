//! Registry of document types and their aggregators.
//!
//! The builder resolves each type's physical index name and checks that every
//! aggregate refers to a registered type, so the engine never meets a dangling
//! reference at write time.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::document::Document;
use crate::error::TypesError;
use crate::type_config::{AggregatorsConfig, TypeConfig};

/// Name of the built-in search query type.
pub const SEARCH_QUERY_TYPE: &str = "searchQuery";

/// Immutable set of registered types.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    instance_name: String,
    types: HashMap<String, Arc<TypeConfig>>,
    aggregators: HashMap<String, Arc<AggregatorsConfig>>,
}

impl TypeRegistry {
    pub fn builder(instance_name: impl Into<String>) -> TypeRegistryBuilder {
        TypeRegistryBuilder {
            instance_name: instance_name.into(),
            types: Vec::new(),
            aggregators: Vec::new(),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn get(&self, name: &str) -> Option<Arc<TypeConfig>> {
        self.types.get(name).cloned()
    }

    /// Aggregators whose source type is `name`.
    pub fn aggregators(&self, name: &str) -> Option<Arc<AggregatorsConfig>> {
        self.aggregators.get(name).cloned()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

/// Collects type and aggregator configs, then validates them in [`build`](Self::build).
pub struct TypeRegistryBuilder {
    instance_name: String,
    types: Vec<TypeConfig>,
    aggregators: Vec<(String, AggregatorsConfig)>,
}

impl TypeRegistryBuilder {
    pub fn register(mut self, config: TypeConfig) -> Self {
        self.types.push(config);
        self
    }

    /// Attach aggregators to a source type.
    pub fn aggregators(mut self, source_type: impl Into<String>, config: AggregatorsConfig) -> Self {
        self.aggregators.push((source_type.into(), config));
        self
    }

    /// Register the built-in `searchQuery` type.
    pub fn with_default_types(self) -> Self {
        self.register(search_query_type())
    }

    pub fn build(self) -> Result<TypeRegistry, TypesError> {
        let instance = self.instance_name.to_lowercase();
        let mut types = HashMap::with_capacity(self.types.len());

        for mut config in self.types {
            if config.name.is_empty() {
                return Err(TypesError::InvalidInput("type name is empty".to_string()));
            }
            config.store_index = match &config.index {
                Some(index) => format!("{}:{}_store", instance, snake_case(index)),
                None => format!("{instance}_store"),
            };
            let name = config.name.clone();
            if types.insert(name.clone(), Arc::new(config)).is_some() {
                return Err(TypesError::DuplicateType(name));
            }
        }

        let mut aggregators = HashMap::with_capacity(self.aggregators.len());
        for (source, config) in self.aggregators {
            if !types.contains_key(&source) {
                return Err(TypesError::UnknownType(source));
            }
            for aggregate in &config.aggregates {
                if !types.contains_key(&aggregate.index_type) {
                    return Err(TypesError::UnknownType(format!(
                        "{} (aggregate '{}' of '{}')",
                        aggregate.index_type, aggregate.name, source
                    )));
                }
            }
            if aggregators.insert(source.clone(), Arc::new(config)).is_some() {
                return Err(TypesError::InvalidInput(format!(
                    "aggregators for '{source}' configured twice"
                )));
            }
        }

        Ok(TypeRegistry {
            instance_name: self.instance_name,
            types,
            aggregators,
        })
    }
}

fn search_query_type() -> TypeConfig {
    TypeConfig::new(SEARCH_QUERY_TYPE)
        .with_index("search_query")
        .with_id_field("key")
        .with_weight_fn(|doc| doc.get("count").and_then(Value::as_f64).unwrap_or(0.0))
        .aggregate_mode(Vec::new(), |_existing, doc| {
            let mut aggregate = Document::new();
            for field in ["key", "_lang", "query", "unicodeQuery", "hasResults"] {
                if let Some(value) = doc.get(field) {
                    aggregate.insert(field.to_string(), value.clone());
                }
            }
            aggregate
        })
}

/// `searchQuery` -> `search_query`, `Product Catalog` -> `product_catalog`.
fn snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in input.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower_or_digit && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower_or_digit = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
