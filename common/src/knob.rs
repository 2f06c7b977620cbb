/// A narrow cross-processor control surface: lets `CostControl` throttle
/// `AdaptiveSampler`'s rate without either processor knowing the other's
/// concrete type, preserving the "processors do not know each other; they
/// compose purely through `Batch` semantics" contract for everything except
/// this one deliberate, pipeline-wired exception (original spec §4.6's
/// "increase AdaptiveSampler drop rate... via a control knob").
pub trait SamplerRateKnob: Send + Sync {
    /// Sets the multiplier applied to every rule's current rate. `1.0` is
    /// unthrottled; `0.75` matches the 25% reduction original spec §4.6
    /// calls for at the `throttle` threshold.
    fn set_rate_multiplier(&self, multiplier: f64);

    fn rate_multiplier(&self) -> f64;
}
