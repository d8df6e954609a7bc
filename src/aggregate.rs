//! Insertion-ordered grouping of projected rows with per-field reductions.
//!
//! Whether a field compares numerically or lexically is decided once per
//! field, before grouping, by [`ValueKind::detect`].

use std::{cmp::Ordering, collections::HashMap, fmt, str::FromStr};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    rows::ProjectedRow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Concat,
}

impl FromStr for AggregateFunction {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateFunction::Sum),
            "avg" | "average" | "mean" => Ok(AggregateFunction::Avg),
            "count" => Ok(AggregateFunction::Count),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "concat" => Ok(AggregateFunction::Concat),
            other => Err(PipelineError::validation(format!(
                "Unknown aggregate function '{other}' (expected sum, avg, count, min, max or concat)"
            ))),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Concat => "concat",
        };
        f.write_str(label)
    }
}

/// Declared reductions, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub fields: Vec<(String, AggregateFunction)>,
}

impl AggregateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, function: AggregateFunction) -> Self {
        self.fields.retain(|(name, _)| name != field);
        self.fields.push((field.to_string(), function));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses `field:function` directives such as `quantity:sum`.
    pub fn parse(directives: &[String]) -> PipelineResult<Self> {
        let mut spec = Self::new();
        for directive in directives
            .iter()
            .flat_map(|d| d.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            let (field, function) = directive.split_once(':').ok_or_else(|| {
                PipelineError::validation(format!(
                    "Invalid aggregate '{directive}'; expected field:function"
                ))
            })?;
            let field = field.trim().to_ascii_lowercase();
            if field.is_empty() {
                return Err(PipelineError::validation(format!(
                    "Invalid aggregate '{directive}'; field cannot be empty"
                )));
            }
            spec = spec.with(&field, function.parse()?);
        }
        Ok(spec)
    }

    /// Rejects reductions over fields that are not part of the mapped output.
    pub fn validate_against(&self, targets: &[String]) -> PipelineResult<()> {
        for (field, function) in &self.fields {
            if !targets.iter().any(|t| t == field) {
                return Err(PipelineError::validation(format!(
                    "Cannot {function} unmapped field '{field}'"
                )));
            }
        }
        Ok(())
    }
}

/// How values of one field compare for min/max.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Numeric,
    Text,
}

impl ValueKind {
    /// Numeric when every non-empty value parses and at least one exists.
    pub fn detect<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut seen = false;
        for value in values {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                continue;
            }
            if parse_number(trimmed).is_none() {
                return ValueKind::Text;
            }
            seen = true;
        }
        if seen {
            ValueKind::Numeric
        } else {
            ValueKind::Text
        }
    }

    fn compare(self, left: &str, right: &str) -> Ordering {
        match self {
            ValueKind::Numeric => {
                let l = parse_number(left.trim()).unwrap_or(0.0);
                let r = parse_number(right.trim()).unwrap_or(0.0);
                l.total_cmp(&r)
            }
            ValueKind::Text => left.cmp(right),
        }
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Renders integral values without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

struct Reducer {
    field: String,
    function: AggregateFunction,
    kind: ValueKind,
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: usize,
    extreme: Option<String>,
    text: Option<String>,
}

impl Accumulator {
    fn ingest(&mut self, reducer: &Reducer, value: &str) {
        self.count += 1;
        match reducer.function {
            AggregateFunction::Sum | AggregateFunction::Avg => {
                self.sum += parse_number(value.trim()).unwrap_or(0.0);
            }
            AggregateFunction::Count => {}
            AggregateFunction::Min | AggregateFunction::Max => {
                if value.trim().is_empty() {
                    return;
                }
                let wanted = if reducer.function == AggregateFunction::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                match &self.extreme {
                    Some(current) if reducer.kind.compare(value, current) != wanted => {}
                    _ => self.extreme = Some(value.to_string()),
                }
            }
            AggregateFunction::Concat => match &mut self.text {
                None => self.text = Some(value.to_string()),
                Some(current) => {
                    if current != value {
                        current.push_str(", ");
                        current.push_str(value);
                    }
                }
            },
        }
    }

    fn finish(&self, function: AggregateFunction) -> String {
        match function {
            AggregateFunction::Sum => format_number(self.sum),
            AggregateFunction::Avg => {
                if self.count == 0 {
                    "0".to_string()
                } else {
                    format_number(self.sum / self.count as f64)
                }
            }
            AggregateFunction::Count => self.count.to_string(),
            AggregateFunction::Min | AggregateFunction::Max => {
                self.extreme.clone().unwrap_or_default()
            }
            AggregateFunction::Concat => self.text.clone().unwrap_or_default(),
        }
    }
}

struct Group {
    first: ProjectedRow,
    accumulators: Vec<Accumulator>,
}

/// Collapses rows sharing the same `group_by` values into one row per group.
///
/// Groups come out in order of first appearance. Fields without a declared
/// function keep the first row's value. An empty `group_by` returns `rows`
/// unchanged.
pub fn aggregate(
    rows: Vec<ProjectedRow>,
    group_by: &[String],
    spec: &AggregateSpec,
) -> Vec<ProjectedRow> {
    if rows.is_empty() || group_by.is_empty() {
        return rows;
    }

    let reducers = spec
        .fields
        .iter()
        .filter(|(field, function)| {
            let is_key = group_by.contains(field);
            if is_key {
                debug!("Ignoring {function} on group-by field '{field}'");
            }
            !is_key
        })
        .map(|(field, function)| Reducer {
            field: field.clone(),
            function: *function,
            kind: ValueKind::detect(rows.iter().map(|row| row.get(field))),
        })
        .collect::<Vec<_>>();

    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    let source_rows = rows.len();

    for row in rows {
        let key = group_by
            .iter()
            .map(|field| row.get(field).to_string())
            .collect::<Vec<_>>();
        let slot = match index.get(&key) {
            Some(slot) => *slot,
            None => {
                index.insert(key, groups.len());
                groups.push(Group {
                    accumulators: reducers.iter().map(|_| Accumulator::default()).collect(),
                    first: row.clone(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[slot];
        for (reducer, acc) in reducers.iter().zip(group.accumulators.iter_mut()) {
            acc.ingest(reducer, row.get(&reducer.field));
        }
    }

    debug!(
        "Grouped {} row(s) into {} group(s) by {:?}",
        source_rows,
        groups.len(),
        group_by
    );

    groups
        .into_iter()
        .map(|group| {
            let mut row = group.first;
            for (reducer, acc) in reducers.iter().zip(&group.accumulators) {
                row.insert(reducer.field.clone(), acc.finish(reducer.function));
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> ProjectedRow {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn keys(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn sums_quantities_per_sku() {
        let rows = vec![
            row(&[("sku", "A1"), ("qty", "5")]),
            row(&[("sku", "A1"), ("qty", "3")]),
            row(&[("sku", "B2"), ("qty", "2")]),
        ];
        let spec = AggregateSpec::new().with("qty", AggregateFunction::Sum);
        let grouped = aggregate(rows, &keys(&["sku"]), &spec);
        assert_eq!(
            grouped,
            vec![
                row(&[("sku", "A1"), ("qty", "8")]),
                row(&[("sku", "B2"), ("qty", "2")]),
            ]
        );
    }

    #[test]
    fn count_and_avg_cover_every_row() {
        let rows = vec![
            row(&[("sku", "A1"), ("qty", "4"), ("price", "1")]),
            row(&[("sku", "A1"), ("qty", "x"), ("price", "2")]),
        ];
        let spec = AggregateSpec::new()
            .with("qty", AggregateFunction::Count)
            .with("price", AggregateFunction::Avg);
        let grouped = aggregate(rows, &keys(&["sku"]), &spec);
        assert_eq!(grouped[0].get("qty"), "2");
        assert_eq!(grouped[0].get("price"), "1.5");
    }

    #[test]
    fn min_max_use_numeric_ordering_for_numeric_fields() {
        let rows = vec![
            row(&[("sku", "A"), ("price", "9"), ("bin", "b")]),
            row(&[("sku", "A"), ("price", "10"), ("bin", "a")]),
            row(&[("sku", "A"), ("price", ""), ("bin", "c")]),
        ];
        let spec = AggregateSpec::new()
            .with("price", AggregateFunction::Max)
            .with("bin", AggregateFunction::Min);
        let grouped = aggregate(rows, &keys(&["sku"]), &spec);
        assert_eq!(grouped[0].get("price"), "10");
        assert_eq!(grouped[0].get("bin"), "a");

        let lexical = vec![
            row(&[("sku", "A"), ("code", "9")]),
            row(&[("sku", "A"), ("code", "10x")]),
        ];
        let spec = AggregateSpec::new().with("code", AggregateFunction::Max);
        assert_eq!(aggregate(lexical, &keys(&["sku"]), &spec)[0].get("code"), "9");
    }

    #[test]
    fn concat_skips_repeats_of_the_accumulated_value() {
        let rows = vec![
            row(&[("sku", "A"), ("loc", "R1")]),
            row(&[("sku", "A"), ("loc", "R1")]),
            row(&[("sku", "A"), ("loc", "R2")]),
            row(&[("sku", "A"), ("loc", "R1")]),
        ];
        let spec = AggregateSpec::new().with("loc", AggregateFunction::Concat);
        let grouped = aggregate(rows, &keys(&["sku"]), &spec);
        assert_eq!(grouped[0].get("loc"), "R1, R2, R1");
    }

    #[test]
    fn undeclared_fields_keep_first_value_and_empty_group_by_is_noop() {
        let rows = vec![
            row(&[("sku", "A"), ("desc", "first")]),
            row(&[("sku", "A"), ("desc", "second")]),
        ];
        let grouped = aggregate(rows.clone(), &keys(&["sku"]), &AggregateSpec::new());
        assert_eq!(grouped, vec![row(&[("sku", "A"), ("desc", "first")])]);
        assert_eq!(aggregate(rows.clone(), &[], &AggregateSpec::new()), rows);
    }

    #[test]
    fn parse_rejects_unknown_functions() {
        let spec = AggregateSpec::parse(&["qty:sum,price:AVG".to_string()]).expect("spec");
        assert_eq!(
            spec.fields,
            vec![
                ("qty".to_string(), AggregateFunction::Sum),
                ("price".to_string(), AggregateFunction::Avg),
            ]
        );
        assert!(AggregateSpec::parse(&["qty:median".to_string()]).is_err());
        assert!(AggregateSpec::parse(&["qty".to_string()]).is_err());
        let targets = keys(&["sku", "qty"]);
        assert!(spec.validate_against(&targets).is_err());
    }

    #[test]
    fn value_kind_detection() {
        assert_eq!(ValueKind::detect(["1", " 2.5 ", ""]), ValueKind::Numeric);
        assert_eq!(ValueKind::detect(["1", "two"]), ValueKind::Text);
        assert_eq!(ValueKind::detect(["", ""]), ValueKind::Text);
        assert_eq!(format_number(8.0), "8");
        assert_eq!(format_number(2.25), "2.25");
    }
}
