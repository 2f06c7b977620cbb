use std::time::Instant;

use serde_json::Value;

/// A recursive execution-plan node, normalized from either a PostgreSQL JSON
/// plan or (via `plan_text`) a MySQL `EXPLAIN` text plan. Original spec §3.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanNode {
    pub op: String,
    pub cost: f64,
    pub rows: f64,
    pub width: f64,
    pub children: Vec<PlanNode>,
}

/// Why a plan failed to parse: either malformed/unrecognized shape, or the
/// `parse_timeout` budget (original spec §4.1) was exceeded mid-walk. Shared
/// with `plan_text` so `mod.rs` doesn't need to know which format was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Malformed,
    Timeout,
}

const OP_KEYS: &[&str] = &["op", "Node Type", "node_type", "NodeType"];
const COST_KEYS: &[&str] = &["cost", "Total Cost", "total_cost", "TotalCost"];
const ROWS_KEYS: &[&str] = &["rows", "Plan Rows", "plan_rows", "PlanRows"];
const WIDTH_KEYS: &[&str] = &["width", "Plan Width", "plan_width", "PlanWidth"];
const CHILDREN_KEYS: &[&str] = &["children", "Plans", "Children"];

fn find_str(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k)).and_then(|v| v.as_str()).map(str::to_string)
}

fn find_f64(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| obj.get(*k)).and_then(|v| v.as_f64().or_else(|| v.as_i64().map(|i| i as f64)))
}

fn find_children<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|k| obj.get(*k)).and_then(|v| v.as_array())
}

/// Walks the JSON plan depth-first, coercing numeric fields to `f64` and
/// leaving absent fields unmaterialized (defaulted to 0.0 / empty string)
/// rather than erroring -- original spec §4.1's "Normalization" paragraph.
///
/// Checks `deadline` before descending into each node (not just once before
/// the walk starts), so a deeply nested or pathologically wide plan that
/// blows through `parse_timeout` actually surfaces `plan.parse_error=timeout`
/// instead of the deadline having already been spent doing nothing.
fn walk(value: &Value, deadline: Instant) -> Result<PlanNode, ParseError> {
    if Instant::now() > deadline {
        return Err(ParseError::Timeout);
    }

    // Top-level PostgreSQL EXPLAIN (FORMAT JSON) output wraps the real plan in
    // `{"Plan": {...}}`, sometimes inside an outer array.
    let obj = match value {
        Value::Array(items) => return items.first().ok_or(ParseError::Malformed).and_then(|v| walk(v, deadline)),
        Value::Object(obj) => obj,
        _ => return Err(ParseError::Malformed),
    };

    if let Some(Value::Object(inner)) = obj.get("Plan") {
        return walk(&Value::Object(inner.clone()), deadline);
    }

    let op = find_str(obj, OP_KEYS).unwrap_or_default();
    let cost = find_f64(obj, COST_KEYS).unwrap_or(0.0);
    let rows = find_f64(obj, ROWS_KEYS).unwrap_or(0.0);
    let width = find_f64(obj, WIDTH_KEYS).unwrap_or(0.0);

    let mut children = Vec::new();
    if let Some(raw_children) = find_children(obj, CHILDREN_KEYS) {
        for child in raw_children {
            if Instant::now() > deadline {
                return Err(ParseError::Timeout);
            }
            match walk(child, deadline) {
                Ok(node) => children.push(node),
                Err(ParseError::Timeout) => return Err(ParseError::Timeout),
                Err(ParseError::Malformed) => {}
            }
        }
    }

    Ok(PlanNode { op, cost, rows, width, children })
}

/// Parses a PostgreSQL-style JSON execution plan. Returns `Err(Malformed)` on
/// malformed JSON or a shape with no recognizable plan node, and
/// `Err(Timeout)` if `deadline` passes mid-walk; the caller treats both as a
/// non-fatal parse failure (original spec §4.1's error policy).
pub fn parse(plan_json: &str, deadline: Instant) -> Result<PlanNode, ParseError> {
    let value: Value = serde_json::from_str(plan_json).map_err(|_| ParseError::Malformed)?;
    walk(&value, deadline)
}
