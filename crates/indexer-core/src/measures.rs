//! Incremental measure maintenance.
//!
//! Every measure is recomputed from the aggregate's previous value plus the
//! contribution of one member document entering, changing or leaving the
//! aggregate. Member documents are never re-read.

use std::collections::HashSet;

use indexer_types::{number_field, number_value, round_to, Document, MeasureSpec, OpType};

/// One member-document change applied to an aggregate.
#[derive(Debug, Clone, Copy)]
pub struct MemberChange<'a> {
    /// Membership delta of the member document.
    pub op: OpType,
    pub new_doc: Option<&'a Document>,
    pub old_doc: Option<&'a Document>,
    /// Measures whose field the new document lacks are left untouched.
    pub partial: bool,
}

impl<'a> MemberChange<'a> {
    pub fn new(op: OpType, new_doc: Option<&'a Document>, old_doc: Option<&'a Document>) -> Self {
        Self {
            op,
            new_doc,
            old_doc,
            partial: false,
        }
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial && self.new_doc.is_some();
        self
    }

    fn skips(&self, field: &str) -> bool {
        self.partial && self.new_doc.is_some_and(|doc| !doc.contains_key(field))
    }
}

/// Apply `measures` in order, writing results into `target`.
///
/// `existing` is the aggregate before the change and `target` the aggregate
/// after merging the freshly built aggregate document over it. Function
/// measures see `target` as it stands when they run and receive
/// `function_op`.
pub fn apply_measures(
    measures: &[MeasureSpec],
    existing: &Document,
    target: &mut Document,
    change: &MemberChange<'_>,
    function_op: OpType,
) {
    let maintained: HashSet<&str> = measures.iter().map(MeasureSpec::field).collect();

    for measure in measures {
        let field = measure.field();
        if change.skips(field) {
            continue;
        }
        let current = number_field(Some(existing), field);

        let value = match measure {
            MeasureSpec::Count { .. } => match change.op {
                OpType::Add => current + 1.0,
                OpType::Remove => current - 1.0,
                OpType::Update => current,
            },
            MeasureSpec::Sum { .. } => {
                let added = number_field(change.new_doc, field);
                let removed = number_field(change.old_doc, field);
                match change.op {
                    OpType::Add => current + added,
                    OpType::Update => current + added - removed,
                    OpType::Remove => current - removed,
                }
            }
            MeasureSpec::Average {
                count_field, round, ..
            }
            | MeasureSpec::WeightedAverage {
                weight_field: count_field,
                round,
                ..
            } => {
                let (total_count, total_value) =
                    weighted_totals(current, existing, field, count_field, change);
                if !maintained.contains(count_field.as_str()) {
                    target.insert(count_field.clone(), number_value(total_count));
                }
                let average = if total_count > 0.0 {
                    total_value / total_count
                } else {
                    0.0
                };
                round_to(average, *round)
            }
            MeasureSpec::Function {
                func,
                modifier,
                round,
                ..
            } => round_to(modifier.apply(func(target, function_op)), *round),
        };

        target.insert(field.to_string(), number_value(value));
    }
}

/// Total weight and weighted total after the change.
fn weighted_totals(
    current: f64,
    existing: &Document,
    field: &str,
    count_field: &str,
    change: &MemberChange<'_>,
) -> (f64, f64) {
    let existing_count = number_field(Some(existing), count_field);
    let total = current * existing_count;

    let new_value = number_field(change.new_doc, field);
    let new_count = number_field(change.new_doc, count_field);
    let old_value = number_field(change.old_doc, field);
    let old_count = number_field(change.old_doc, count_field);

    match change.op {
        OpType::Add => (existing_count + new_count, total + new_value * new_count),
        OpType::Update => (
            existing_count - old_count + new_count,
            total - old_value * old_count + new_value * new_count,
        ),
        OpType::Remove => (existing_count - old_count, total - old_value * old_count),
    }
}

/// Fields to read when seeding an aggregate from the store.
pub fn projection(measures: &[MeasureSpec]) -> Vec<&str> {
    let mut fields: Vec<&str> = Vec::new();
    for field in measures.iter().flat_map(MeasureSpec::projection_fields) {
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}
