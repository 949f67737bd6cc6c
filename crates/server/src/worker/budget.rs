use rand::Rng;

/// Draws a per-worker count uniformly from `[min, max]`, or `max` when no smaller minimum is set.
///
/// Jittering keeps workers spawned together from all retiring together.
pub fn jitter<R>(min: Option<u64>, max: u64, rng: &mut R) -> u64
where
    R: Rng + ?Sized,
{
    match min {
        Some(min) if min < max => rng.gen_range(min..=max),
        _ => max,
    }
}

/// How many requests this worker may still serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBudget {
    /// `0` means unlimited.
    limit: u64,
    served: u64,
}

impl RequestBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit, served: 0 }
    }

    pub fn draw<R>(min: Option<u64>, max: u64, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        Self::new(jitter(min, max, rng))
    }

    #[inline]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[inline]
    pub fn served(&self) -> u64 {
        self.served
    }

    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }

    /// Counts one handled connection.
    pub fn record(&mut self) {
        self.served += 1;
    }

    pub fn is_exhausted(&self) -> bool {
        !self.is_unlimited() && self.served >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn max_is_used_without_smaller_min() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(jitter(None, 100, &mut rng), 100);
        assert_eq!(jitter(Some(100), 100, &mut rng), 100);
        assert_eq!(jitter(Some(200), 100, &mut rng), 100);
    }

    #[test]
    fn jitter_stays_in_range_and_covers_it() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = [false; 6];
        for _ in 0..1000 {
            let n = jitter(Some(5), 10, &mut rng);
            assert!((5..=10).contains(&n));
            seen[usize::try_from(n - 5).unwrap()] = true;
        }
        assert!(seen.iter().all(|hit| *hit));
    }

    #[test]
    fn same_seed_same_budget() {
        let a = RequestBudget::draw(Some(10), 1000, &mut StdRng::seed_from_u64(3));
        let b = RequestBudget::draw(Some(10), 1000, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn exhausts_after_limit() {
        let mut budget = RequestBudget::new(2);
        assert!(!budget.is_exhausted());
        budget.record();
        assert!(!budget.is_exhausted());
        budget.record();
        assert!(budget.is_exhausted());
        assert_eq!(budget.served(), 2);
    }

    #[test]
    fn zero_is_unlimited() {
        let mut budget = RequestBudget::new(0);
        for _ in 0..10_000 {
            budget.record();
        }
        assert!(budget.is_unlimited());
        assert!(!budget.is_exhausted());
    }
}
