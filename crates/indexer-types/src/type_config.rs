//! Per-type configuration: identity, weighting, filtering and aggregation.
//!
//! Type configs hold user functions, so they are built in code rather than
//! deserialized. Aggregator configs describe how documents of a source type
//! contribute to aggregate documents of other types.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::document::{value_as_id, Document};
use crate::measure::MeasureSpec;

/// Derives a document id.
pub type IdFn = Arc<dyn Fn(&Document) -> Option<String> + Send + Sync>;
/// Derives the raw weight of a document before `log1p` scaling.
pub type WeightFn = Arc<dyn Fn(&Document) -> f64 + Send + Sync>;
/// Derives the language tag of a document.
pub type LangFn = Arc<dyn Fn(&Document) -> String + Send + Sync>;
/// `(doc, existing, partial) -> keep`
pub type DocFilter = Arc<dyn Fn(&Document, Option<&Document>, bool) -> bool + Send + Sync>;
/// Rewrites an incoming document before it is indexed.
pub type TransformFn = Arc<dyn Fn(Document) -> Document + Send + Sync>;
/// Lazy aggregate mode: `(existing aggregate, incoming doc) -> aggregate fields`.
pub type LazyAggregateBuilder = Arc<dyn Fn(Option<&Document>, &Document) -> Document + Send + Sync>;
/// Aggregator: `(member doc, one field value) -> aggregate fields`.
pub type AggregateBuilder = Arc<dyn Fn(&Document, &Value) -> Document + Send + Sync>;

/// How writes of a type reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeMode {
    /// Every write goes to the store immediately.
    #[default]
    Direct,
    /// `upsert` merges into the aggregator cache and is flushed later.
    Aggregate,
}

/// Configuration of one registered document type.
#[derive(Clone)]
pub struct TypeConfig {
    pub name: String,
    /// Logical index declared by the type, if any.
    pub index: Option<String>,
    /// Physical index name, resolved when the registry is built.
    pub store_index: String,
    pub mode: TypeMode,
    pub id_fn: IdFn,
    pub weight_fn: WeightFn,
    pub lang_fn: LangFn,
    pub filter: Option<DocFilter>,
    pub transform: Option<TransformFn>,
    /// Measures applied by lazy aggregate `upsert`.
    pub measures: Vec<MeasureSpec>,
    pub aggregate_builder: Option<LazyAggregateBuilder>,
}

impl TypeConfig {
    /// A direct-mode type with default id (`doc.id`), weight (`1.0`) and
    /// language (`"en"`) functions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
            store_index: String::new(),
            mode: TypeMode::Direct,
            id_fn: Arc::new(|doc: &Document| doc.get("id").and_then(value_as_id)),
            weight_fn: Arc::new(|_: &Document| 1.0),
            lang_fn: Arc::new(|_: &Document| "en".to_string()),
            filter: None,
            transform: None,
            measures: Vec::new(),
            aggregate_builder: None,
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_id_fn(
        mut self,
        f: impl Fn(&Document) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.id_fn = Arc::new(f);
        self
    }

    /// Take the id from a named field.
    pub fn with_id_field(self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.with_id_fn(move |doc| doc.get(&field).and_then(value_as_id))
    }

    pub fn with_weight_fn(mut self, f: impl Fn(&Document) -> f64 + Send + Sync + 'static) -> Self {
        self.weight_fn = Arc::new(f);
        self
    }

    pub fn with_lang_fn(
        mut self,
        f: impl Fn(&Document) -> String + Send + Sync + 'static,
    ) -> Self {
        self.lang_fn = Arc::new(f);
        self
    }

    pub fn with_filter(
        mut self,
        f: impl Fn(&Document, Option<&Document>, bool) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn with_transform(mut self, f: impl Fn(Document) -> Document + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }

    /// Switch the type to lazy aggregate mode.
    pub fn aggregate_mode(
        mut self,
        measures: Vec<MeasureSpec>,
        builder: impl Fn(Option<&Document>, &Document) -> Document + Send + Sync + 'static,
    ) -> Self {
        self.mode = TypeMode::Aggregate;
        self.measures = measures;
        self.aggregate_builder = Some(Arc::new(builder));
        self
    }

    pub fn is_aggregate_mode(&self) -> bool {
        self.mode == TypeMode::Aggregate
    }

    /// Apply the type filter. Types without a filter accept everything.
    pub fn accepts(&self, doc: &Document, existing: Option<&Document>, partial: bool) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter(doc, existing, partial))
    }

    /// Lock and cache key of a document of this type.
    pub fn key(&self, id: &str) -> String {
        format!("{}:{}", self.name, id)
    }
}

impl fmt::Debug for TypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeConfig")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("store_index", &self.store_index)
            .field("mode", &self.mode)
            .field("filter", &self.filter.is_some())
            .field("transform", &self.transform.is_some())
            .field("measures", &self.measures)
            .finish()
    }
}

/// One aggregate derived from a field of the source document.
#[derive(Clone)]
pub struct AggregateConfig {
    pub name: String,
    /// Source field; a scalar or an array of values.
    pub field: String,
    /// Registered type name of the aggregate documents.
    pub index_type: String,
    pub builder: AggregateBuilder,
    /// Overrides the aggregator-level measures when set.
    pub measures: Option<Vec<MeasureSpec>>,
}

impl AggregateConfig {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        index_type: impl Into<String>,
        builder: impl Fn(&Document, &Value) -> Document + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            index_type: index_type.into(),
            builder: Arc::new(builder),
            measures: None,
        }
    }

    pub fn with_measures(mut self, measures: Vec<MeasureSpec>) -> Self {
        self.measures = Some(measures);
        self
    }
}

impl fmt::Debug for AggregateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateConfig")
            .field("name", &self.name)
            .field("field", &self.field)
            .field("index_type", &self.index_type)
            .field("measures", &self.measures)
            .finish()
    }
}

/// Aggregators attached to one source type.
#[derive(Clone, Default)]
pub struct AggregatorsConfig {
    /// Rejecting treats the new document as absent for aggregation.
    pub filter: Option<DocFilter>,
    pub measures: Vec<MeasureSpec>,
    pub aggregates: Vec<AggregateConfig>,
}

impl AggregatorsConfig {
    pub fn new(measures: Vec<MeasureSpec>) -> Self {
        Self {
            filter: None,
            measures,
            aggregates: Vec::new(),
        }
    }

    pub fn with_aggregate(mut self, aggregate: AggregateConfig) -> Self {
        self.aggregates.push(aggregate);
        self
    }

    pub fn with_filter(
        mut self,
        f: impl Fn(&Document, Option<&Document>, bool) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn accepts(&self, doc: &Document, existing: Option<&Document>, partial: bool) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter(doc, existing, partial))
    }

    /// Measures in effect for one aggregate.
    pub fn measures_for<'a>(&'a self, aggregate: &'a AggregateConfig) -> &'a [MeasureSpec] {
        aggregate.measures.as_deref().unwrap_or(&self.measures)
    }
}

impl fmt::Debug for AggregatorsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorsConfig")
            .field("filter", &self.filter.is_some())
            .field("measures", &self.measures)
            .field("aggregates", &self.aggregates)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_functions() {
        let config = TypeConfig::new("product");
        let d = doc(json!({"id": 7, "title": "lamp"}));
        assert_eq!((config.id_fn)(&d), Some("7".to_string()));
        assert_eq!((config.weight_fn)(&d), 1.0);
        assert_eq!((config.lang_fn)(&d), "en");
        assert!(config.accepts(&d, None, false));
        assert_eq!(config.key("7"), "product:7");
    }

    #[test]
    fn test_id_field_and_filter() {
        let config = TypeConfig::new("query")
            .with_id_field("key")
            .with_filter(|doc, _, _| doc.get("hidden").is_none());
        assert_eq!((config.id_fn)(&doc(json!({"key": "k1"}))), Some("k1".to_string()));
        assert!(!config.accepts(&doc(json!({"hidden": true})), None, false));
    }

    #[test]
    fn test_measures_for_prefers_aggregate_override() {
        let tags = AggregateConfig::new("tags", "tags", "tag", |_, v| {
            doc(json!({"id": v.clone()}))
        })
        .with_measures(vec![MeasureSpec::count("count")]);
        let brand = AggregateConfig::new("brand", "brand", "brand", |_, v| {
            doc(json!({"id": v.clone()}))
        });
        let config = AggregatorsConfig::new(vec![MeasureSpec::sum("views")])
            .with_aggregate(tags.clone())
            .with_aggregate(brand.clone());

        assert_eq!(config.measures_for(&tags)[0].field(), "count");
        assert_eq!(config.measures_for(&brand)[0].field(), "views");
    }
}
