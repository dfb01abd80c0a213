use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; Sitescout/0.2)";

/// Operational settings read once per extraction request.
///
/// Supplied by the surrounding tooling's configuration loader; the defaults
/// here match what the extraction pipeline expects in production.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Per-fetch deadline in seconds.
    pub timeout_secs: u64,
    /// Transient fetch failures retried up to this many times per URL.
    pub max_retries: u32,
    /// Upper bound applied to any request's crawl depth.
    pub max_crawl_depth: u8,
    /// Cap on nested pages fetched during link-following, per request.
    pub max_product_pages: usize,
    pub user_agent: String,
    /// Master switch for AI-backed enrichment.
    pub enable_advanced_features: bool,
    /// When enrichment fails, keep the unenriched draft instead of failing.
    pub fallback_to_basic: bool,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            max_crawl_depth: 3,
            max_product_pages: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            enable_advanced_features: true,
            fallback_to_basic: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_max_product_pages(mut self, max: usize) -> Self {
        self.max_product_pages = max;
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn with_fallback_to_basic(mut self, fallback: bool) -> Self {
        self.fallback_to_basic = fallback;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
