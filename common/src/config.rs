use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

fn default_true() -> bool {
    true
}

// ---- PlanAttributeExtractor -------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanAttributeExtractorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_plan_bytes")]
    pub max_plan_bytes: usize,
    #[serde(default = "default_parse_timeout_ms")]
    pub parse_timeout_ms: u64,
    #[serde(default = "default_regression_ttl_secs")]
    pub regression_ttl_secs: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_max_plan_bytes() -> usize {
    20_480
}
fn default_parse_timeout_ms() -> u64 {
    50
}
fn default_regression_ttl_secs() -> u64 {
    24 * 3600
}
fn default_cache_size() -> usize {
    10_000
}

impl Default for PlanAttributeExtractorConfig {
    fn default() -> Self {
        PlanAttributeExtractorConfig {
            enabled: true,
            max_plan_bytes: default_max_plan_bytes(),
            parse_timeout_ms: default_parse_timeout_ms(),
            regression_ttl_secs: default_regression_ttl_secs(),
            cache_size: default_cache_size(),
        }
    }
}

// ---- QueryCorrelator ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryCorrelatorConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_max_queries_tracked")]
    pub max_queries_tracked: usize,
}

fn default_retention_secs() -> u64 {
    600
}
fn default_max_queries_tracked() -> usize {
    10_000
}

impl Default for QueryCorrelatorConfig {
    fn default() -> Self {
        QueryCorrelatorConfig { retention_secs: default_retention_secs(), max_queries_tracked: default_max_queries_tracked() }
    }
}

// ---- AdaptiveSampler -----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    Keep,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub name: String,
    /// A small boolean-expression language over attributes and literals; see
    /// `processors::adaptive_sampler::predicate`.
    pub predicate: String,
    pub key_attribute: String,
    #[serde(default = "default_min_rate")]
    pub min_rate: f64,
    pub max_rate: f64,
    pub target_budget_per_sec: f64,
    #[serde(default = "default_burst_seconds")]
    pub burst_seconds: f64,
    #[serde(default = "default_sample_on_match")]
    pub sample_on_match: f64,
    #[serde(default)]
    pub priority: i32,
}

fn default_min_rate() -> f64 {
    0.0
}
fn default_burst_seconds() -> f64 {
    2.0
}
fn default_sample_on_match() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveSamplerConfig {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default = "default_default_action")]
    pub default_action: DefaultAction,
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,
    #[serde(default = "default_adjust_interval_secs")]
    pub adjust_interval_secs: u64,
}

fn default_default_action() -> DefaultAction {
    DefaultAction::Keep
}
fn default_rng_seed() -> u64 {
    0x5EED
}
fn default_adjust_interval_secs() -> u64 {
    10
}

impl Default for AdaptiveSamplerConfig {
    fn default() -> Self {
        AdaptiveSamplerConfig {
            rules: vec![],
            default_action: default_default_action(),
            rng_seed: default_rng_seed(),
            adjust_interval_secs: default_adjust_interval_secs(),
        }
    }
}

// ---- CircuitBreaker --------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
    #[serde(default = "default_max_open_duration_secs")]
    pub max_open_duration_secs: u64,
    #[serde(default = "default_half_open_probes")]
    pub half_open_probes: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_open_duration_secs() -> u64 {
    30
}
fn default_max_open_duration_secs() -> u64 {
    300
}
fn default_half_open_probes() -> u32 {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: default_failure_threshold(),
            open_duration_secs: default_open_duration_secs(),
            max_open_duration_secs: default_max_open_duration_secs(),
            half_open_probes: default_half_open_probes(),
        }
    }
}

// ---- Verification -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiAction {
    Redact,
    Hash,
    DropItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PiiDetectorConfig {
    pub kind: String,
    pub action: PiiAction,
    /// Only present for `kind = "custom"`; built-in detectors (email, phone,
    /// ssn, credit_card, secret) carry their own compiled pattern.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowAction {
    Coarsen,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CardinalityConfig {
    #[serde(default = "default_max_unique_values")]
    pub max_unique_values: u64,
    #[serde(default = "default_overflow_action")]
    pub overflow_action: OverflowAction,
}

fn default_max_unique_values() -> u64 {
    10_000
}
fn default_overflow_action() -> OverflowAction {
    OverflowAction::Coarsen
}

impl Default for CardinalityConfig {
    fn default() -> Self {
        CardinalityConfig { max_unique_values: default_max_unique_values(), overflow_action: default_overflow_action() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredFieldPolicy {
    Drop,
    Synthesize,
    Pass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    #[serde(default)]
    pub pii_detectors: Vec<PiiDetectorConfig>,
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
    #[serde(default = "default_required_field_policy")]
    pub required_field_policy: RequiredFieldPolicy,
    #[serde(default)]
    pub cardinality: CardinalityConfig,
}

fn default_required_fields() -> Vec<String> {
    vec!["db.name".into(), "db.system".into(), "host.name".into()]
}
fn default_required_field_policy() -> RequiredFieldPolicy {
    RequiredFieldPolicy::Synthesize
}

impl Default for VerificationConfig {
    fn default() -> Self {
        VerificationConfig {
            pii_detectors: default_pii_detectors(),
            required_fields: default_required_fields(),
            required_field_policy: default_required_field_policy(),
            cardinality: CardinalityConfig::default(),
        }
    }
}

fn default_pii_detectors() -> Vec<PiiDetectorConfig> {
    ["email", "phone", "ssn", "credit_card", "secret"]
        .iter()
        .map(|kind| PiiDetectorConfig { kind: kind.to_string(), action: PiiAction::Redact, pattern: None })
        .collect()
}

// ---- CostControl ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostControlThresholds {
    #[serde(default = "default_throttle_threshold")]
    pub throttle: f64,
    #[serde(default = "default_drop_attrs_threshold")]
    pub drop_attrs: f64,
    #[serde(default = "default_emergency_threshold")]
    pub emergency: f64,
    #[serde(default = "default_circuit_threshold")]
    pub circuit: f64,
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,
}

fn default_throttle_threshold() -> f64 {
    0.8
}
fn default_drop_attrs_threshold() -> f64 {
    0.9
}
fn default_emergency_threshold() -> f64 {
    0.95
}
fn default_circuit_threshold() -> f64 {
    1.10
}
fn default_hysteresis() -> f64 {
    0.05
}

impl Default for CostControlThresholds {
    fn default() -> Self {
        CostControlThresholds {
            throttle: default_throttle_threshold(),
            drop_attrs: default_drop_attrs_threshold(),
            emergency: default_emergency_threshold(),
            circuit: default_circuit_threshold(),
            hysteresis: default_hysteresis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostControlConfig {
    pub monthly_budget_bytes: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default)]
    pub thresholds: CostControlThresholds,
    /// A predicate in the same language `AdaptiveSampler` uses. `None` means
    /// "drop everything except self-metrics" once emergency mode is entered
    /// (original spec §9's adopted default for the ambiguous source behavior).
    #[serde(default)]
    pub critical_predicate: Option<String>,
    #[serde(default)]
    pub non_essential_attributes: Vec<String>,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_window_secs() -> u64 {
    3600
}
fn default_cooldown_secs() -> u64 {
    60
}

impl Default for CostControlConfig {
    fn default() -> Self {
        CostControlConfig {
            monthly_budget_bytes: 100 * 1024 * 1024 * 1024,
            window_secs: default_window_secs(),
            thresholds: CostControlThresholds::default(),
            critical_predicate: None,
            non_essential_attributes: vec![],
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

// ---- NRErrorMonitor ----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NrErrorMonitorConfig {
    #[serde(default = "default_max_attr_bytes")]
    pub max_attr_bytes: usize,
    #[serde(default = "default_max_attrs_per_item")]
    pub max_attrs_per_item: usize,
    #[serde(default = "default_max_metric_name_bytes")]
    pub max_metric_name_bytes: usize,
}

fn default_max_attr_bytes() -> usize {
    4_095
}
fn default_max_attrs_per_item() -> usize {
    254
}
fn default_max_metric_name_bytes() -> usize {
    255
}

impl Default for NrErrorMonitorConfig {
    fn default() -> Self {
        NrErrorMonitorConfig {
            max_attr_bytes: default_max_attr_bytes(),
            max_attrs_per_item: default_max_attrs_per_item(),
            max_metric_name_bytes: default_max_metric_name_bytes(),
        }
    }
}

// ---- aggregate ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    #[serde(default)]
    pub plan_attribute_extractor: PlanAttributeExtractorConfig,
    #[serde(default)]
    pub query_correlator: QueryCorrelatorConfig,
    #[serde(default)]
    pub adaptive_sampler: AdaptiveSamplerConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    pub cost_control: CostControlConfig,
    #[serde(default)]
    pub nrerror_monitor: NrErrorMonitorConfig,
}

/// Reads and parses a TOML suite configuration. Unknown keys at any level
/// reject at start (original spec §6); a parse failure is a fatal
/// `CoreError::Config`, never a runtime surprise.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SuiteConfig, CoreError> {
    let text = fs::read_to_string(path.as_ref()).map_err(|e| CoreError::Config(format!("reading {:?}: {e}", path.as_ref())))?;
    toml::from_str(&text).map_err(|e| CoreError::Config(format!("parsing {:?}: {e}", path.as_ref())))
}
