//! Replay interval jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Spreads replay ticks so a fleet of devices does not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterStrategy {
    /// Fixed interval.
    #[default]
    None,
    /// Random from 0 to interval
    Full,
    /// Half fixed, half random
    Equal,
}

impl JitterStrategy {
    /// Computes the next delay for a base interval.
    #[must_use]
    pub fn apply(self, interval: Duration) -> Duration {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return interval;
        }

        let mut rng = rand::thread_rng();
        match self {
            Self::None => interval,
            Self::Full => Duration::from_millis(rng.gen_range(0..=millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rng.gen_range(0..=millis - half))
            }
        }
    }
}
