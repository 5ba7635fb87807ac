//! Measure specifications.
//!
//! A measure names a numeric field on an aggregate document and how it is
//! maintained as member documents come and go. The arithmetic lives in the
//! aggregation engine; this module only describes the configuration.

use std::fmt;
use std::sync::Arc;

use crate::document::Document;
use crate::op::OpType;

/// Rounding precision used when a measure does not specify one.
pub const DEFAULT_ROUND: u32 = 3;

/// User function for [`MeasureSpec::Function`]. Receives the merged aggregate
/// and the op being applied.
pub type MeasureFn = Arc<dyn Fn(&Document, OpType) -> f64 + Send + Sync>;

/// Post-processing applied to a function measure before rounding.
#[derive(Clone, Default)]
pub enum Modifier {
    #[default]
    Log1p,
    Identity,
    Custom(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl Modifier {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Modifier::Log1p => value.ln_1p(),
            Modifier::Identity => value,
            Modifier::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Log1p => f.write_str("Log1p"),
            Modifier::Identity => f.write_str("Identity"),
            Modifier::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// How one aggregate field is maintained.
///
/// `field` is both the aggregate field written and, for `Sum` and the
/// averages, the member-document field read.
#[derive(Clone)]
pub enum MeasureSpec {
    Sum {
        field: String,
    },
    Count {
        field: String,
    },
    Average {
        field: String,
        count_field: String,
        round: u32,
    },
    WeightedAverage {
        field: String,
        weight_field: String,
        round: u32,
    },
    Function {
        field: String,
        func: MeasureFn,
        modifier: Modifier,
        round: u32,
    },
}

impl MeasureSpec {
    pub fn sum(field: impl Into<String>) -> Self {
        MeasureSpec::Sum {
            field: field.into(),
        }
    }

    pub fn count(field: impl Into<String>) -> Self {
        MeasureSpec::Count {
            field: field.into(),
        }
    }

    pub fn average(field: impl Into<String>, count_field: impl Into<String>) -> Self {
        MeasureSpec::Average {
            field: field.into(),
            count_field: count_field.into(),
            round: DEFAULT_ROUND,
        }
    }

    pub fn weighted_average(field: impl Into<String>, weight_field: impl Into<String>) -> Self {
        MeasureSpec::WeightedAverage {
            field: field.into(),
            weight_field: weight_field.into(),
            round: DEFAULT_ROUND,
        }
    }

    pub fn function(
        field: impl Into<String>,
        func: impl Fn(&Document, OpType) -> f64 + Send + Sync + 'static,
    ) -> Self {
        MeasureSpec::Function {
            field: field.into(),
            func: Arc::new(func),
            modifier: Modifier::default(),
            round: DEFAULT_ROUND,
        }
    }

    /// Override the rounding precision. No effect on `Sum` and `Count`.
    pub fn with_round(mut self, precision: u32) -> Self {
        match &mut self {
            MeasureSpec::Average { round, .. }
            | MeasureSpec::WeightedAverage { round, .. }
            | MeasureSpec::Function { round, .. } => *round = precision,
            MeasureSpec::Sum { .. } | MeasureSpec::Count { .. } => {}
        }
        self
    }

    /// Override the modifier of a `Function` measure.
    pub fn with_modifier(mut self, new_modifier: Modifier) -> Self {
        if let MeasureSpec::Function { modifier, .. } = &mut self {
            *modifier = new_modifier;
        }
        self
    }

    /// The aggregate field this measure writes.
    pub fn field(&self) -> &str {
        match self {
            MeasureSpec::Sum { field }
            | MeasureSpec::Count { field }
            | MeasureSpec::Average { field, .. }
            | MeasureSpec::WeightedAverage { field, .. }
            | MeasureSpec::Function { field, .. } => field,
        }
    }

    /// Fields that must be read from a stored aggregate to apply this measure.
    pub fn projection_fields(&self) -> Vec<&str> {
        match self {
            MeasureSpec::Average {
                field, count_field, ..
            } => vec![field.as_str(), count_field.as_str()],
            MeasureSpec::WeightedAverage {
                field,
                weight_field,
                ..
            } => vec![field.as_str(), weight_field.as_str()],
            other => vec![other.field()],
        }
    }
}

impl fmt::Debug for MeasureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureSpec::Sum { field } => write!(f, "Sum({field})"),
            MeasureSpec::Count { field } => write!(f, "Count({field})"),
            MeasureSpec::Average {
                field,
                count_field,
                round,
            } => write!(f, "Average({field}, {count_field}, round={round})"),
            MeasureSpec::WeightedAverage {
                field,
                weight_field,
                round,
            } => write!(f, "WeightedAverage({field}, {weight_field}, round={round})"),
            MeasureSpec::Function {
                field,
                modifier,
                round,
                ..
            } => write!(f, "Function({field}, {modifier:?}, round={round})"),
        }
    }
}
