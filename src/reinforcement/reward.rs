// Reward system for the reinforcement learning agent
// Converts an execution outcome into a scalar reward

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::executor::ActionOutcome;
use crate::reinforcement::action::Category;

/// Coarse classification of a handler error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Build, release or rollout failures
    Deployment,
    /// Rejected credentials or tokens
    Authentication,
    /// Timeouts and unreachable endpoints
    Network,
    /// Expected early on: a prerequisite has not been set up yet
    NotConfigured,
    /// Anything else
    Other,
}

impl ErrorClass {
    /// Classify an error message
    ///
    /// A missing prerequisite is recognized first, whatever it names.
    /// Keywords inside identifiers, file names and URLs are ignored, so
    /// `SOCIAL_NETWORK_TOKEN` or `https://deploy.example.com` never decide
    /// the class. The remaining classes are checked most severe first.
    pub fn classify(message: &str) -> Self {
        static NOT_CONFIGURED: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?i)\bnot configured\b|\bnot set\b|\bunconfigured\b|\bnot found on path\b")
                .expect("valid not-configured pattern")
        });
        static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"\S*[_./]\S+").expect("valid identifier pattern")
        });
        static DEPLOYMENT: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?i)\bdeploy(ment|ing)?\b|\bbuild failed\b|\brelease failed\b|\brollback\b|\bmigration failed\b")
                .expect("valid deployment pattern")
        });
        static AUTHENTICATION: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?i)\bauth(entication|orization)?\b|\bunauthori[sz]ed\b|\bforbidden\b|\b401\b|\b403\b|\binvalid (api )?(key|token)\b|\bcredentials?\b")
                .expect("valid authentication pattern")
        });
        static NETWORK: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?i)\btimed? ?out\b|\bconnection refused\b|\bunreachable\b|\bdns\b|\bnetwork\b")
                .expect("valid network pattern")
        });

        let words = IDENTIFIER.replace_all(message, " ");
        if NOT_CONFIGURED.is_match(&words) {
            ErrorClass::NotConfigured
        } else if DEPLOYMENT.is_match(&words) {
            ErrorClass::Deployment
        } else if AUTHENTICATION.is_match(&words) {
            ErrorClass::Authentication
        } else if NETWORK.is_match(&words) {
            ErrorClass::Network
        } else {
            ErrorClass::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Deployment => "deployment",
            ErrorClass::Authentication => "authentication",
            ErrorClass::Network => "network",
            ErrorClass::NotConfigured => "not_configured",
            ErrorClass::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunable reward constants
///
/// These are operator-tunable parameters rather than fixed truths; the
/// defaults keep the ordering deployment > integration > configuration >
/// testing > tooling for success bonuses and deployment > authentication >
/// network > not-configured for failure penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Reward for any successful action
    pub success_base: f64,
    /// Reward for any failed action
    pub failure_base: f64,

    pub deployment_bonus: f64,
    pub integration_bonus: f64,
    pub configuration_bonus: f64,
    pub testing_bonus: f64,
    pub tooling_bonus: f64,
    pub resilience_bonus: f64,

    /// Successes at or under this duration get `very_fast_bonus`
    pub very_fast_ms: u64,
    pub very_fast_bonus: f64,
    /// Successes at or under this duration get `fast_bonus`
    pub fast_ms: u64,
    pub fast_bonus: f64,

    pub deployment_penalty: f64,
    pub authentication_penalty: f64,
    pub network_penalty: f64,
    pub not_configured_penalty: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            success_base: 10.0,
            failure_base: -5.0,
            deployment_bonus: 20.0,
            integration_bonus: 15.0,
            configuration_bonus: 10.0,
            testing_bonus: 5.0,
            tooling_bonus: 3.0,
            resilience_bonus: 0.0,
            very_fast_ms: 1_000,
            very_fast_bonus: 5.0,
            fast_ms: 5_000,
            fast_bonus: 2.0,
            deployment_penalty: -8.0,
            authentication_penalty: -5.0,
            network_penalty: -3.0,
            not_configured_penalty: 0.0,
        }
    }
}

impl RewardConfig {
    /// Every scalar reward term by its config key
    pub fn constants(&self) -> [(&'static str, f64); 14] {
        [
            ("success_base", self.success_base),
            ("failure_base", self.failure_base),
            ("deployment_bonus", self.deployment_bonus),
            ("integration_bonus", self.integration_bonus),
            ("configuration_bonus", self.configuration_bonus),
            ("testing_bonus", self.testing_bonus),
            ("tooling_bonus", self.tooling_bonus),
            ("resilience_bonus", self.resilience_bonus),
            ("very_fast_bonus", self.very_fast_bonus),
            ("fast_bonus", self.fast_bonus),
            ("deployment_penalty", self.deployment_penalty),
            ("authentication_penalty", self.authentication_penalty),
            ("network_penalty", self.network_penalty),
            ("not_configured_penalty", self.not_configured_penalty),
        ]
    }

    /// Additive bonus for a successful action of this category
    pub fn category_bonus(&self, category: Category) -> f64 {
        match category {
            Category::Deployment => self.deployment_bonus,
            Category::Integration => self.integration_bonus,
            Category::Configuration => self.configuration_bonus,
            Category::Testing => self.testing_bonus,
            Category::Tooling => self.tooling_bonus,
            Category::Resilience => self.resilience_bonus,
        }
    }

    /// Additive bonus for finishing quickly
    pub fn duration_bonus(&self, duration_ms: u64) -> f64 {
        if duration_ms <= self.very_fast_ms {
            self.very_fast_bonus
        } else if duration_ms <= self.fast_ms {
            self.fast_bonus
        } else {
            0.0
        }
    }

    /// Additive penalty for a failure of this class
    pub fn error_penalty(&self, class: ErrorClass) -> f64 {
        match class {
            ErrorClass::Deployment => self.deployment_penalty,
            ErrorClass::Authentication => self.authentication_penalty,
            ErrorClass::Network => self.network_penalty,
            ErrorClass::NotConfigured => self.not_configured_penalty,
            ErrorClass::Other => 0.0,
        }
    }
}

/// Calculate the reward for an execution outcome
///
/// Pure and total: unknown categories and unclassified errors earn the base
/// reward only.
pub fn calculate_reward(outcome: &ActionOutcome, config: &RewardConfig) -> f64 {
    if outcome.success {
        let category_bonus = outcome
            .category
            .map(|c| config.category_bonus(c))
            .unwrap_or(0.0);
        config.success_base + category_bonus + config.duration_bonus(outcome.duration_ms)
    } else {
        let penalty = outcome
            .error
            .as_deref()
            .map(|e| config.error_penalty(ErrorClass::classify(e)))
            .unwrap_or(0.0);
        config.failure_base + penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(category: Option<Category>, duration_ms: u64) -> ActionOutcome {
        ActionOutcome {
            action: "a".to_string(),
            category,
            success: true,
            error: None,
            details: serde_json::Value::Null,
            duration_ms,
        }
    }

    fn failure(error: &str) -> ActionOutcome {
        ActionOutcome {
            action: "a".to_string(),
            category: Some(Category::Testing),
            success: false,
            error: Some(error.to_string()),
            details: serde_json::Value::Null,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_fast_deployment_success() {
        let config = RewardConfig::default();
        let reward = calculate_reward(&success(Some(Category::Deployment), 50), &config);
        assert_eq!(
            reward,
            config.success_base + config.deployment_bonus + config.very_fast_bonus
        );
    }

    #[test]
    fn test_duration_tiers() {
        let config = RewardConfig::default();
        assert_eq!(config.duration_bonus(0), config.very_fast_bonus);
        assert_eq!(config.duration_bonus(1_000), config.very_fast_bonus);
        assert_eq!(config.duration_bonus(1_001), config.fast_bonus);
        assert_eq!(config.duration_bonus(5_000), config.fast_bonus);
        assert_eq!(config.duration_bonus(5_001), 0.0);
    }

    #[test]
    fn test_category_bonus_ordering() {
        let config = RewardConfig::default();
        let slow = |c| calculate_reward(&success(Some(c), 60_000), &config);
        assert!(slow(Category::Deployment) > slow(Category::Integration));
        assert!(slow(Category::Integration) > slow(Category::Configuration));
        assert!(slow(Category::Configuration) > slow(Category::Testing));
        assert!(slow(Category::Testing) > slow(Category::Tooling));
    }

    #[test]
    fn test_unknown_category_success_gets_base_only() {
        let config = RewardConfig::default();
        assert_eq!(
            calculate_reward(&success(None, 60_000), &config),
            config.success_base
        );
    }

    #[test]
    fn test_not_configured_is_least_penalized() {
        let config = RewardConfig::default();
        let not_configured = calculate_reward(&failure("STRIPE_SECRET_KEY not configured"), &config);
        let auth = calculate_reward(&failure("401 Unauthorized"), &config);
        let deploy = calculate_reward(&failure("deploy of backend failed"), &config);
        assert_eq!(not_configured, config.failure_base);
        assert!(auth < not_configured);
        assert!(deploy < auth);
    }

    #[test]
    fn test_unrecognized_error_gets_base_failure() {
        let config = RewardConfig::default();
        assert_eq!(
            calculate_reward(&failure("unknown action"), &config),
            config.failure_base
        );
    }

    #[test]
    fn test_failure_is_smaller_in_magnitude_than_success() {
        let config = RewardConfig::default();
        assert!(config.failure_base < 0.0);
        assert!(config.failure_base.abs() < config.success_base);
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(ErrorClass::classify("Forbidden"), ErrorClass::Authentication);
        assert_eq!(ErrorClass::classify("invalid api key"), ErrorClass::Authentication);
        assert_eq!(ErrorClass::classify("request timed out"), ErrorClass::Network);
        assert_eq!(ErrorClass::classify("connection refused"), ErrorClass::Network);
        assert_eq!(ErrorClass::classify("DATABASE_URL not set"), ErrorClass::NotConfigured);
        assert_eq!(ErrorClass::classify("rollback triggered"), ErrorClass::Deployment);
        assert_eq!(
            ErrorClass::classify("deploy rejected: unauthorized"),
            ErrorClass::Deployment
        );
        assert_eq!(ErrorClass::classify("exit status 2"), ErrorClass::Other);
        // Variable names mentioning a class do not change the class.
        assert_eq!(
            ErrorClass::classify("OAUTH_CLIENT_ID not configured"),
            ErrorClass::NotConfigured
        );
        assert_eq!(
            ErrorClass::classify("DEPLOY_HOOK_URL not configured"),
            ErrorClass::NotConfigured
        );
    }

    #[test]
    fn test_missing_prerequisite_wins_over_keywords() {
        assert_eq!(
            ErrorClass::classify("deployment prerequisite not configured"),
            ErrorClass::NotConfigured
        );
        assert_eq!(
            ErrorClass::classify("SOCIAL_NETWORK_TOKEN not configured"),
            ErrorClass::NotConfigured
        );
        assert_eq!(
            ErrorClass::classify("deploy.sh not configured: not found on PATH"),
            ErrorClass::NotConfigured
        );
        assert_eq!(ErrorClass::classify("AUTH_TOKEN not set"), ErrorClass::NotConfigured);
    }

    #[test]
    fn test_urls_and_file_names_do_not_decide_class() {
        assert_eq!(
            ErrorClass::classify("authentication failed: HTTP 401 from https://deploy.example.com/health"),
            ErrorClass::Authentication
        );
        assert_eq!(
            ErrorClass::classify("request to https://auth.example.com/network timed out"),
            ErrorClass::Network
        );
        assert_eq!(
            ErrorClass::classify("connection refused or unreachable: http://deploy.internal:8080"),
            ErrorClass::Network
        );
        assert_eq!(
            ErrorClass::classify("HTTP 500 from https://deploy.example.com/release"),
            ErrorClass::Other
        );
        assert_eq!(
            ErrorClass::classify("deploy.sh exited with exit status: 1: boom"),
            ErrorClass::Other
        );
        assert_eq!(ErrorClass::classify("deploy.sh timed out after 120s"), ErrorClass::Network);
        // Sentence punctuation is not an identifier.
        assert_eq!(ErrorClass::classify("rollback."), ErrorClass::Deployment);
    }

    #[test]
    fn test_handler_messages_keep_penalty_tiers() {
        let config = RewardConfig::default();
        let reward = |message: &str| calculate_reward(&failure(message), &config);

        // Simulated prerequisites and missing programs are the mildest failures.
        assert_eq!(reward("deployment prerequisite not configured"), config.failure_base);
        assert_eq!(reward("configuration prerequisite not configured"), config.failure_base);
        assert_eq!(reward("kubectl not configured: not found on PATH"), config.failure_base);
        assert_eq!(reward("STRIPE_SECRET_KEY not configured"), config.failure_base);

        let network = reward("request to https://api.example.com/health timed out");
        let auth = reward("authentication failed: HTTP 403 from https://deploy.example.com/health");
        let deploy = reward("deployment failed: build error");
        assert_eq!(network, config.failure_base + config.network_penalty);
        assert_eq!(auth, config.failure_base + config.authentication_penalty);
        assert_eq!(deploy, config.failure_base + config.deployment_penalty);
        assert!(deploy < auth && auth < network && network < config.failure_base);
    }
}
