use serde::{Deserialize, Serialize};

use super::risk::{RiskLevel, RiskPolicy};

/// Which risk levels the approval workflow may approve without an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoApproval {
    Disabled,
    NoRiskOnly,
    UpToPolicyCheck,
}

impl AutoApproval {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" | "disabled" | "never" => Some(Self::Disabled),
            "none" | "no_risk" => Some(Self::NoRiskOnly),
            "policy_check" | "policycheck" => Some(Self::UpToPolicyCheck),
            _ => None,
        }
    }

    /// `High` is never auto-approvable.
    pub fn permits(self, level: RiskLevel) -> bool {
        match (self, level) {
            (_, RiskLevel::High) => false,
            (AutoApproval::Disabled, _) => false,
            (AutoApproval::NoRiskOnly, RiskLevel::None) => true,
            (AutoApproval::NoRiskOnly, _) => false,
            (AutoApproval::UpToPolicyCheck, _) => true,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            AutoApproval::Disabled => "off",
            AutoApproval::NoRiskOnly => "none",
            AutoApproval::UpToPolicyCheck => "policy_check",
        }
    }
}

/// Runtime-tunable screening knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreeningPolicy {
    /// Automated scores at or above this move `AIScreened` applications to `Shortlisted`.
    pub shortlist_threshold: u8,
    pub risk: RiskPolicy,
    pub auto_approve: AutoApproval,
}

impl ScreeningPolicy {
    pub const DEFAULT_SHORTLIST_THRESHOLD: u8 = 75;

    pub fn summary(&self) -> String {
        format!(
            "shortlist >= {}, flag threshold {}, ratios {:.2}/{:.2}, auto-approve {}",
            self.shortlist_threshold,
            self.risk.flag_threshold,
            self.risk.policy_check_ratio,
            self.risk.high_ratio,
            self.auto_approve.label()
        )
    }
}

impl Default for ScreeningPolicy {
    fn default() -> Self {
        Self {
            shortlist_threshold: Self::DEFAULT_SHORTLIST_THRESHOLD,
            risk: RiskPolicy::default(),
            auto_approve: AutoApproval::NoRiskOnly,
        }
    }
}
