use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_PATH: &str = "/_groupcache/";
pub const DEFAULT_MULTI_PATH: &str = "/_groupcachemulti/";
pub const DEFAULT_REPLICAS: usize = 50;

/// Configuration for an [`HttpPool`](crate::HttpPool).
///
/// # Default Values
/// - `base_path`: `/_groupcache/`
/// - `multi_path`: `/_groupcachemulti/`
/// - `replicas`: 50 virtual positions per peer
/// - `request_timeout`: none
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// HTTP path prefix serving single-key requests
    pub base_path: String,

    /// HTTP path prefix serving multi-key requests
    pub multi_path: String,

    /// Number of ring positions per peer
    pub replicas: usize,

    /// Optional timeout applied to every outbound peer request
    pub request_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            multi_path: DEFAULT_MULTI_PATH.to_string(),
            replicas: DEFAULT_REPLICAS,
            request_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Replace blank or zero settings with their defaults and make both paths
    /// start and end with `/`.
    pub(crate) fn normalized(mut self) -> Self {
        self.base_path = normalize_path(&self.base_path, DEFAULT_BASE_PATH);
        self.multi_path = normalize_path(&self.multi_path, DEFAULT_MULTI_PATH);
        if self.replicas == 0 {
            self.replicas = DEFAULT_REPLICAS;
        }
        self
    }
}

fn normalize_path(path: &str, default: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return default.to_string();
    }
    format!("/{}/", trimmed)
}

/// Policy for mirroring values fetched from a remote owner into the hot cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HotPromotion {
    Always,
    Never,
    /// Mirror with the given probability in `[0.0, 1.0]`
    Probability(f64),
}

impl Default for HotPromotion {
    fn default() -> Self {
        HotPromotion::Probability(0.1)
    }
}

impl HotPromotion {
    pub fn should_promote(&self) -> bool {
        match *self {
            HotPromotion::Always => true,
            HotPromotion::Never => false,
            HotPromotion::Probability(p) if p >= 1.0 => true,
            HotPromotion::Probability(p) if p <= 0.0 => false,
            HotPromotion::Probability(p) => rand::random::<f64>() < p,
        }
    }
}

/// Configuration for a [`Group`](crate::Group).
///
/// `cache_bytes` is split between the two tiers: the hot cache receives
/// `cache_bytes / hot_cache_divisor`, the main cache the remainder. A budget of
/// zero leaves both tiers unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Total byte budget across main and hot caches
    pub cache_bytes: usize,

    /// Fraction denominator of the budget reserved for the hot cache
    pub hot_cache_divisor: usize,

    /// Mirroring policy for remote fetches
    pub hot_promotion: HotPromotion,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            cache_bytes: 64 * 1024 * 1024, // 64MB
            hot_cache_divisor: 8,
            hot_promotion: HotPromotion::default(),
        }
    }
}

impl GroupConfig {
    pub fn with_cache_bytes(cache_bytes: usize) -> Self {
        Self {
            cache_bytes,
            ..Default::default()
        }
    }

    /// Byte budgets for `(main, hot)`.
    pub fn tier_budgets(&self) -> (usize, usize) {
        if self.cache_bytes == 0 {
            return (0, 0);
        }
        let divisor = self.hot_cache_divisor.max(1);
        let hot = (self.cache_bytes / divisor).max(1);
        (self.cache_bytes.saturating_sub(hot).max(1), hot)
    }
}
