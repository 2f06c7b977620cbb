//! Enforces data-quality and privacy invariants: PII redaction, then
//! required-field validation, then cardinality protection, then type
//! coercion -- the fixed sub-task order original spec §4.5 calls for.

pub mod cardinality;
pub mod pii;

use async_trait::async_trait;

use common::batch::{AttributeValue as AV, Batch, Item, ItemData};
use common::config::{RequiredFieldPolicy, VerificationConfig};
use common::error::{CResult, CoreError};
use common::host::Host;
use common::processor::{CancellationToken, Processor};

use cardinality::{CardinalityGuard, Verdict};
use pii::PiiDetectors;

pub struct Verification {
    detectors: PiiDetectors,
    required_fields: Vec<String>,
    required_field_policy: RequiredFieldPolicy,
    cardinality: CardinalityGuard,
}

impl Verification {
    pub fn new(config: VerificationConfig) -> Result<Self, CoreError> {
        Ok(Verification {
            detectors: PiiDetectors::compile(&config.pii_detectors)?,
            required_fields: config.required_fields,
            required_field_policy: config.required_field_policy,
            cardinality: CardinalityGuard::new(config.cardinality),
        })
    }

    /// Sub-task 1: redacts every string attribute and log body. Returns
    /// `true` if any detector demanded the whole item be dropped.
    fn redact_pii(&self, item: &mut Item) -> bool {
        for value in item.attributes.values_mut() {
            if let AV::String(s) = value {
                let (redacted, drop_item) = self.detectors.redact(s);
                if drop_item {
                    return true;
                }
                *s = redacted;
            }
        }

        if let ItemData::Log(log) = &mut item.data {
            let (redacted, drop_item) = self.detectors.redact(&log.body);
            if drop_item {
                return true;
            }
            log.body = redacted;
        }

        false
    }

    /// Sub-task 2: items tagged `db.system=*` must carry `{db.name,
    /// db.system, host.name}`. Returns `false` if a `drop` policy applies and
    /// the item should be removed.
    fn validate_required_fields(&self, resource_attrs: &common::batch::Attributes, item: &mut Item) -> bool {
        if !item.attributes.contains_key("db.system") && !resource_attrs.contains_key("db.system") {
            return true;
        }

        for field in &self.required_fields {
            if item.attr(field).is_some() {
                continue;
            }
            match self.required_field_policy {
                RequiredFieldPolicy::Pass => continue,
                RequiredFieldPolicy::Drop => return false,
                RequiredFieldPolicy::Synthesize => {
                    if let Some(value) = resource_attrs.get(field) {
                        item.attributes.insert(field.clone(), value.clone());
                    }
                }
            }
        }

        true
    }

    /// Sub-task 3: caps per-`(metric_name, attribute_name)` cardinality.
    /// Only meaningful for metric items -- the spec keys this by metric
    /// name, which log items don't carry.
    fn enforce_cardinality(&self, item: &mut Item) {
        let metric_name = match &item.data {
            ItemData::Metric(m) => m.name.clone(),
            ItemData::Log(_) => return,
        };

        let mut coarsened = Vec::new();
        let mut dropped = Vec::new();
        for (attr_name, value) in item.attributes.iter() {
            let AV::String(s) = value else { continue };
            match self.cardinality.observe(&metric_name, attr_name, s) {
                Verdict::Keep => {}
                Verdict::Coarsen => coarsened.push((attr_name.clone(), cardinality::coarsen(s))),
                Verdict::Drop => dropped.push(attr_name.clone()),
            }
        }
        for (key, bucket) in coarsened {
            item.attributes.insert(key, AV::String(bucket));
        }
        for key in dropped {
            item.attributes.remove(&key);
        }
    }

    /// Sub-task 4: any `Bytes` attribute that should be a string is coerced,
    /// replacing invalid UTF-8 with U+FFFD rather than rejecting the item.
    fn coerce_types(item: &mut Item) {
        let keys: Vec<String> = item
            .attributes
            .iter()
            .filter_map(|(k, v)| matches!(v, AV::Bytes(_)).then(|| k.clone()))
            .collect();
        for key in keys {
            if let Some(AV::Bytes(bytes)) = item.attributes.get(&key) {
                let text = String::from_utf8_lossy(bytes).into_owned();
                item.attributes.insert(key, AV::String(text));
            }
        }
    }
}

#[async_trait]
impl Processor for Verification {
    fn name(&self) -> &'static str {
        "verification"
    }

    async fn consume_batch(&self, ctx: &CancellationToken, batch: &mut Batch, host: &dyn Host) -> CResult<()> {
        let mut dropped_pii: u64 = 0;
        let mut dropped_required: u64 = 0;

        batch.retain_items(|resource, item| {
            if self.redact_pii(item) {
                dropped_pii += 1;
                return false;
            }

            if !self.validate_required_fields(&resource.attributes, item) {
                dropped_required += 1;
                return false;
            }

            self.enforce_cardinality(item);
            Self::coerce_types(item);

            true
        });

        ctx.check()?;

        if dropped_pii > 0 {
            host.metrics().incr_counter("verification.dropped.pii", dropped_pii as f64);
        }
        if dropped_required > 0 {
            host.metrics().incr_counter("verification.dropped.required_field", dropped_required as f64);
        }

        Ok(())
    }
}
