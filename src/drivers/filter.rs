use micromath::F32Ext;

/// First-order low pass whose weight switches to a faster value while the
/// input departs from the current estimate by more than `fast_change`
/// (relative). A zero estimate is seeded directly from the next input.
pub struct AdaptiveLowPass {
    alpha: f32,
    alpha_fast: f32,
    fast_change: f32,
    output: f32,
}

impl AdaptiveLowPass {
    pub const fn new(alpha: f32, alpha_fast: f32, fast_change: f32) -> Self {
        Self {
            alpha,
            alpha_fast,
            fast_change,
            output: 0.0,
        }
    }

    pub fn filter(&mut self, input: f32) -> f32 {
        if self.output <= 0.0 {
            self.output = input;
        } else {
            let change = (input - self.output).abs() / self.output;
            let alpha = if change > self.fast_change {
                self.alpha_fast
            } else {
                self.alpha
            };
            self.output = alpha * input + (1.0 - alpha) * self.output;
        }
        self.output
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    /// Overwrite the estimate (decay, injected values).
    pub fn set(&mut self, value: f32) {
        self.output = value.max(0.0);
    }

    pub fn reset(&mut self) {
        self.output = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_taken_unfiltered() {
        let mut f = AdaptiveLowPass::new(0.4, 0.6, 0.2);
        assert_eq!(f.filter(60.0), 60.0);
    }

    #[test]
    fn small_change_uses_normal_weight() {
        let mut f = AdaptiveLowPass::new(0.4, 0.6, 0.2);
        f.filter(60.0);
        // 10 % change -> 0.4 weight
        let out = f.filter(66.0);
        assert!((out - (60.0 * 0.6 + 66.0 * 0.4)).abs() < 1e-4);
    }

    #[test]
    fn large_change_uses_fast_weight() {
        let mut f = AdaptiveLowPass::new(0.4, 0.6, 0.2);
        f.filter(60.0);
        // 50 % change -> 0.6 weight
        let out = f.filter(90.0);
        assert!((out - (60.0 * 0.4 + 90.0 * 0.6)).abs() < 1e-4);
    }

    #[test]
    fn reset_reseeds_from_next_input() {
        let mut f = AdaptiveLowPass::new(0.4, 0.6, 0.2);
        f.filter(60.0);
        f.reset();
        assert_eq!(f.filter(30.0), 30.0);
    }
}
