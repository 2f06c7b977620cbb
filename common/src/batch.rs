use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One value in an item's attribute map. Mirrors the primitive set the suite's
/// batch interface is allowed to carry (see `SPEC_FULL.md` §A): string, int64,
/// float64, bool, bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    /// Size estimator used by `CostControl`: the serialized-size approximation
    /// is deliberately cheap, not exact (see original spec §4.6).
    pub fn estimated_bytes(&self) -> usize {
        match self {
            AttributeValue::String(s) => s.len(),
            AttributeValue::Int(_) => 8,
            AttributeValue::Float(_) => 8,
            AttributeValue::Bool(_) => 1,
            AttributeValue::Bytes(b) => b.len(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Used by predicate comparisons (`==`, `<`, ...): a loose textual rendering.
    pub fn display(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Int(v) => v.to_string(),
            AttributeValue::Float(v) => v.to_string(),
            AttributeValue::Bool(v) => v.to_string(),
            AttributeValue::Bytes(b) => hex::encode(b),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

pub type Attributes = HashMap<String, AttributeValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Gauge,
    Sum,
    Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDataPoint {
    pub name: String,
    pub unit: String,
    pub kind: MetricKind,
    pub value: f64,
    /// Only populated for `Histogram`; empty otherwise.
    pub bucket_counts: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub body: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemData {
    Metric(MetricDataPoint),
    Log(LogRecord),
}

/// A single metric data point or log record, carrying a nanosecond timestamp
/// and an attribute map. See original spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub timestamp: u64,
    pub attributes: Attributes,
    pub data: ItemData,
}

impl Item {
    pub fn new_metric(timestamp: u64, metric: MetricDataPoint) -> Self {
        Item { timestamp, attributes: Attributes::new(), data: ItemData::Metric(metric) }
    }

    pub fn new_log(timestamp: u64, log: LogRecord) -> Self {
        Item { timestamp, attributes: Attributes::new(), data: ItemData::Log(log) }
    }

    pub fn is_metric(&self) -> bool {
        matches!(self.data, ItemData::Metric(_))
    }

    pub fn attr(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(AttributeValue::as_str)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// A self-observability metric carries `nr.self=true` and is exempt from
    /// CostControl / cardinality drops everywhere in the chain.
    pub fn is_self_metric(&self) -> bool {
        matches!(self.attr("nr.self"), Some(AttributeValue::Bool(true)))
    }

    pub fn mark_self_metric(&mut self) {
        self.set_attr("nr.self", true);
    }

    /// `24 + sum(key_len + value_len + 8)`, the approximate byte estimator from
    /// original spec §4.6.
    pub fn estimated_bytes(&self) -> usize {
        let attrs: usize = self
            .attributes
            .iter()
            .map(|(k, v)| k.len() + v.estimated_bytes() + 8)
            .sum();
        24 + attrs
    }
}

/// Producer identity: receiver name/version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub version: String,
    pub items: Vec<Item>,
}

/// Identifies the monitored entity (host, db.system, db.name, service.name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub attributes: Attributes,
    pub scopes: Vec<Scope>,
}

impl Resource {
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(AttributeValue::as_str)
    }
}

/// The unit consumed by a processor: an ordered tree of resources -> scopes -> items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub resources: Vec<Resource>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn item_count(&self) -> usize {
        self.resources.iter().map(|r| r.scopes.iter().map(|s| s.items.len()).sum::<usize>()).sum()
    }

    /// `item_count`, excluding `nr.self=true` items -- useful for callers
    /// that want to ignore whatever `push_self_metric` appended and look only
    /// at the data the pipeline was actually handed.
    pub fn data_item_count(&self) -> usize {
        self.resources
            .iter()
            .map(|r| r.scopes.iter().map(|s| s.items.iter().filter(|i| !i.is_self_metric()).count()).sum::<usize>())
            .sum()
    }

    /// Visits every item together with the resource it belongs to, allowing
    /// in-place mutation and retain-style dropping. `f` returns `false` to drop
    /// the item; a dropped item never reappears downstream (original spec §3).
    pub fn retain_items<F>(&mut self, mut f: F)
    where
        F: FnMut(&Resource, &mut Item) -> bool,
    {
        for resource in &mut self.resources {
            for scope in &mut resource.scopes {
                let attrs = resource.attributes.clone();
                let dummy = Resource { attributes: attrs, scopes: vec![] };
                scope.items.retain_mut(|item| f(&dummy, item));
            }
        }
    }

    pub fn for_each_item_mut<F: FnMut(&Attributes, &mut Item)>(&mut self, mut f: F) {
        for resource in &mut self.resources {
            for scope in &mut resource.scopes {
                for item in &mut scope.items {
                    f(&resource.attributes, item);
                }
            }
        }
    }

    /// Appends a self-observability metric item to its own synthetic resource/scope,
    /// tagging it `nr.self=true` so downstream budget/cardinality processors skip it.
    pub fn push_self_metric(&mut self, processor: &str, metric: MetricDataPoint, timestamp: u64) {
        let mut item = Item::new_metric(timestamp, metric);
        item.mark_self_metric();
        item.set_attr("processor", processor.to_string());

        if let Some(resource) = self.resources.iter_mut().find(|r| r.attr_str("service.name") == Some("db-intel-processor-suite")) {
            if let Some(scope) = resource.scopes.iter_mut().find(|s| s.name == "self-observability") {
                scope.items.push(item);
                return;
            }
            resource.scopes.push(Scope { name: "self-observability".into(), version: String::new(), items: vec![item] });
            return;
        }

        let mut attrs = Attributes::new();
        attrs.insert("service.name".into(), "db-intel-processor-suite".into());
        self.resources.push(Resource {
            attributes: attrs,
            scopes: vec![Scope { name: "self-observability".into(), version: String::new(), items: vec![item] }],
        });
    }
}
