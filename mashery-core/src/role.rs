//! The role model: `RoleKeys`, `RoleUsage`, and the predicates that drive
//! every handler's blocking chain (capability, expiry, depletion, token staleness).

use serde::{Deserialize, Serialize};

/// Renewal window: a cached V3 token is treated as needing renewal once its
/// expiry is within this many seconds of `now`.
pub const TOKEN_RENEWAL_WINDOW_SECS: i64 = 300;

/// Sentinel meaning "no term/use bound configured". Any value `<= 0` reads
/// the same way, but this is the canonical value written on creation.
pub const UNBOUNDED: i64 = -1;

/// Immutable-by-policy credential material for a role.
///
/// `Imported` roles reject any further in-place edits to `Keys` — see
/// `CoreError::StateInvariant` callers in `mashery-engine`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub area_id: String,
    pub area_nid: i64,
    pub api_key: String,
    pub key_secret: String,
    pub username: String,
    pub password: String,
    pub max_qps: i32,
    #[serde(default)]
    pub force_proxy_mode: bool,
    #[serde(default)]
    pub imported: bool,
    #[serde(default)]
    pub exportable: bool,
}

impl RoleKeys {
    pub const DEFAULT_QPS: i32 = 2;

    pub fn new() -> Self {
        Self {
            max_qps: Self::DEFAULT_QPS,
            exportable: true,
            ..Default::default()
        }
    }

    /// `IsV2Capable ≡ AreaNid > 0 ∧ ApiKey ≠ "" ∧ KeySecret ≠ ""`.
    pub fn is_v2_capable(&self) -> bool {
        self.area_nid > 0 && !self.api_key.is_empty() && !self.key_secret.is_empty()
    }

    /// `IsV3Capable ≡ AreaId ≠ "" ∧ ApiKey ≠ "" ∧ KeySecret ≠ "" ∧ Username ≠ "" ∧ Password ≠ ""`.
    pub fn is_v3_capable(&self) -> bool {
        !self.area_id.is_empty()
            && !self.api_key.is_empty()
            && !self.key_secret.is_empty()
            && !self.username.is_empty()
            && !self.password.is_empty()
    }

    pub fn supplies_key_and_secret(&self) -> bool {
        !self.api_key.is_empty() && !self.key_secret.is_empty()
    }
}

/// Mutable usage accounting for a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleUsage {
    #[serde(default)]
    pub v3_token: String,
    /// Unix seconds; 0 means "never obtained".
    #[serde(default)]
    pub v3_token_obtained: i64,
    /// Unix seconds; 0 means "no token cached".
    #[serde(default)]
    pub v3_token_expiry: i64,
    /// Unix seconds; `<= 0` means unbounded.
    #[serde(default)]
    pub explicit_term: i64,
    /// `<= 0` means unbounded.
    #[serde(default)]
    pub explicit_num_uses: i64,
    pub remaining_num_uses: i64,
}

impl Default for RoleUsage {
    fn default() -> Self {
        Self {
            v3_token: String::new(),
            v3_token_obtained: 0,
            v3_token_expiry: 0,
            explicit_term: UNBOUNDED,
            explicit_num_uses: UNBOUNDED,
            remaining_num_uses: UNBOUNDED,
        }
    }
}

impl RoleUsage {
    /// Resets all quota/term fields to unbounded. Any of `{-1, 0, negative}`
    /// would read as unbounded, but creation always writes `-1`.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded_usage(&self) -> bool {
        self.explicit_num_uses <= 0
    }

    /// `HasUsageQuota ≡ ExplicitNumUses > 0`.
    pub fn has_usage_quota(&self) -> bool {
        self.explicit_num_uses > 0
    }

    /// Decrements only while bounded and positive. A no-op otherwise.
    pub fn reduce_remaining_quota(&mut self) {
        if self.has_usage_quota() && self.remaining_num_uses > 0 {
            self.remaining_num_uses -= 1;
        }
    }

    /// `Depleted ≡ ExplicitNumUses > 0 ∧ RemainingNumUses <= 0`.
    pub fn depleted(&self) -> bool {
        self.has_usage_quota() && self.remaining_num_uses <= 0
    }

    /// `Expired ≡ ExplicitTerm > 0 ∧ now > ExplicitTerm`.
    pub fn expired(&self, now: i64) -> bool {
        self.explicit_term > 0 && now > self.explicit_term
    }

    pub fn has_not_expired(&self, now: i64) -> bool {
        !self.expired(now)
    }

    /// Seconds past the term boundary; meaningless (but harmless) when unbounded.
    pub fn after_expiry_term(&self, now: i64) -> i64 {
        now - self.explicit_term
    }

    /// `V3TokenExpired ≡ TokenExpiry > 0 ∧ now > TokenExpiry`.
    pub fn v3_token_expired(&self, now: i64) -> bool {
        self.v3_token_expiry > 0 && now > self.v3_token_expiry
    }

    /// `V3TokenNeedsRenew ≡ Token = "" ∨ now > TokenExpiry − 300s`.
    pub fn v3_token_needs_renew(&self, now: i64) -> bool {
        self.v3_token.is_empty() || now > self.v3_token_expiry - TOKEN_RENEWAL_WINDOW_SECS
    }

    /// Clears the cached token without touching quota or term state.
    pub fn reset_token(&mut self) {
        self.v3_token.clear();
        self.v3_token_obtained = 0;
        self.v3_token_expiry = 0;
    }

    pub fn replace_access_token(&mut self, token: String, obtained: i64, expiry: i64) {
        self.v3_token = token;
        self.v3_token_obtained = obtained;
        self.v3_token_expiry = expiry;
    }

    /// Human-readable term boundary itself: `"∞"`, or the term's timestamp
    /// formatted RFC 2822-style (`renderRole`'s `term` field).
    pub fn term_string(&self) -> String {
        if self.explicit_term <= 0 {
            "∞".to_string()
        } else {
            chrono::DateTime::from_timestamp(self.explicit_term, 0)
                .map(|dt| dt.to_rfc2822())
                .unwrap_or_else(|| "∞".to_string())
        }
    }

    /// Human-readable term remaining: `"∞"`, a duration, or `"---EXPIRED---"`.
    pub fn term_remaining_string(&self, now: i64) -> String {
        if self.explicit_term <= 0 {
            "∞".to_string()
        } else if self.expired(now) {
            "---EXPIRED---".to_string()
        } else {
            humanize_seconds(self.explicit_term - now)
        }
    }

    /// Human-readable use remaining: `"∞"`, `"N times (P% used)"`, or `"---DEPLETED---"`.
    pub fn use_remaining_string(&self) -> String {
        if !self.has_usage_quota() {
            "∞".to_string()
        } else if self.depleted() {
            "---DEPLETED---".to_string()
        } else {
            let used = self.explicit_num_uses - self.remaining_num_uses;
            let pct = (used as f64 / self.explicit_num_uses as f64) * 100.0;
            format!("{} times ({:.0}% used)", self.remaining_num_uses, pct)
        }
    }

    /// `"---NOT-SET---"|"---ACQUIRED---"|"---NEEDS-RENEW---"|"---EXPIRED---"`.
    pub fn token_status_string(&self, now: i64) -> &'static str {
        if self.v3_token.is_empty() {
            "---NOT-SET---"
        } else if self.v3_token_expired(now) {
            "---EXPIRED---"
        } else if self.v3_token_needs_renew(now) {
            "---NEEDS-RENEW---"
        } else {
            "---ACQUIRED---"
        }
    }

    /// Token remaining life, paired with `token_status_string`: `"n/a"` when
    /// no token is cached, otherwise how long ago it expired or how long
    /// until it does.
    pub fn v3_token_life_string(&self, now: i64) -> String {
        if self.v3_token.is_empty() {
            "n/a".to_string()
        } else if self.v3_token_expired(now) {
            format!("expired {} ago", humanize_seconds(now - self.v3_token_expiry))
        } else {
            humanize_seconds(self.v3_token_expiry - now)
        }
    }
}

fn humanize_seconds(secs: i64) -> String {
    if secs < 0 {
        return format!("-{}", humanize_seconds(-secs));
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    if days > 0 {
        format!("{days}d{hours}h")
    } else {
        let minutes = (secs % 3_600) / 60;
        if hours > 0 {
            format!("{hours}h{minutes}m")
        } else {
            format!("{minutes}m")
        }
    }
}

/// The three sibling records that make up a role, as loaded into memory for a request.
#[derive(Debug, Clone)]
pub struct StoredRole {
    pub name: String,
    pub keys: RoleKeys,
    pub usage: RoleUsage,
    /// `None` until a PEM export/import lazily generates the keypair.
    pub private_key: Option<Vec<u8>>,
}

impl StoredRole {
    pub fn new(name: impl Into<String>, keys: RoleKeys) -> Self {
        Self {
            name: name.into(),
            keys,
            usage: RoleUsage::unbounded(),
            private_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_capability_requires_nid_key_and_secret() {
        let mut k = RoleKeys::new();
        assert!(!k.is_v2_capable());
        k.area_nid = 456;
        k.api_key = "k".into();
        k.key_secret = "s".into();
        assert!(k.is_v2_capable());
    }

    #[test]
    fn v3_capability_requires_all_five_fields() {
        let mut k = RoleKeys::new();
        k.area_id = "area".into();
        k.api_key = "k".into();
        k.key_secret = "s".into();
        assert!(!k.is_v3_capable());
        k.username = "u".into();
        k.password = "p".into();
        assert!(k.is_v3_capable());
    }

    #[test]
    fn depletion_boundary() {
        let mut u = RoleUsage {
            explicit_num_uses: 2,
            remaining_num_uses: 2,
            ..RoleUsage::unbounded()
        };
        assert!(!u.depleted());
        u.reduce_remaining_quota();
        assert_eq!(u.remaining_num_uses, 1);
        assert!(!u.depleted());
        u.reduce_remaining_quota();
        assert_eq!(u.remaining_num_uses, 0);
        assert!(u.depleted());
        // Further decrements are a no-op.
        u.reduce_remaining_quota();
        assert_eq!(u.remaining_num_uses, 0);
    }

    #[test]
    fn unbounded_usage_never_depletes() {
        let mut u = RoleUsage::unbounded();
        for _ in 0..100 {
            u.reduce_remaining_quota();
        }
        assert!(!u.depleted());
    }

    #[test]
    fn negative_term_is_unbounded() {
        let u = RoleUsage {
            explicit_term: -5,
            ..RoleUsage::unbounded()
        };
        assert!(!u.expired(1_000_000));
        assert_eq!(u.term_remaining_string(1_000_000), "∞");
    }

    #[test]
    fn term_equal_to_now_is_not_expired() {
        let u = RoleUsage {
            explicit_term: 1000,
            ..RoleUsage::unbounded()
        };
        assert!(!u.expired(1000));
        assert!(u.expired(1001));
    }

    #[test]
    fn token_needs_renew_exactly_at_window_boundary() {
        let u = RoleUsage {
            v3_token: "tok".into(),
            v3_token_expiry: 1300,
            ..RoleUsage::unbounded()
        };
        // now = expiry - 300 exactly: `now > expiry - 300` is false, so NOT yet renewing.
        assert!(!u.v3_token_needs_renew(1000));
        // one second later it does.
        assert!(u.v3_token_needs_renew(1001));
    }

    #[test]
    fn empty_token_always_needs_renew() {
        let u = RoleUsage::unbounded();
        assert!(u.v3_token_needs_renew(0));
    }
}
