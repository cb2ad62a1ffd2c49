use rand::Rng;

/// Outcome of the per-request sampling draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingDecision {
    pub accepted: bool,
    /// Real views one accepted sample stands for; always the configured rate.
    pub weight: u32,
}

/// Accept with probability `1/rate`. Summing `weight` over accepted samples
/// is an unbiased estimate of the true view count.
pub fn decide<R: Rng + ?Sized>(rate: u32, rng: &mut R) -> SamplingDecision {
    let rate = rate.max(1);
    if rate == 1 {
        return SamplingDecision {
            accepted: true,
            weight: 1,
        };
    }
    SamplingDecision {
        accepted: rng.gen_range(1..=rate) == 1,
        weight: rate,
    }
}
