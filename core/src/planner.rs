//! Stage planner: decides which evidence stages a case is worth.
//!
//! The classification service proposes a plan; the hard rules below
//! always have the last word:
//!   - The basic lookup always runs.
//!   - The most expensive stage runs only on strong signal: an
//!     account-takeover/network fraud type or a strong keyword in the
//!     narrative. An external scam never gets it.
//!   - Other stages: if the service's flags and its chosen route
//!     disagree, run both (completeness over latency).
//!   - An external scam with no device identifier skips risk signals.
//!
//! The plan keeps the route the service chose even when the rules change
//! its stages. `enabled_stages()` is what runs.

use crate::{
    case::{Case, StructuredFields},
    classifier::{ClassifierAdapter, PlanResponse},
    collaborator::ClassificationService,
    config::TriageConfig,
    error::TriageResult,
    executor::StageName,
    extractor::IdentifierSet,
    timeout::call_with_timeout,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FraudType {
    DeviceTampering,
    AccountTakeover,
    CashLoanFraud,
    PaymentFraud,
    NetworkFraud,
    ExternalScam,
    IdentityTheft,
    DsrMisconduct,
    Unknown,
}

impl FraudType {
    pub const ALL: [FraudType; 9] = [
        Self::DeviceTampering,
        Self::AccountTakeover,
        Self::CashLoanFraud,
        Self::PaymentFraud,
        Self::NetworkFraud,
        Self::ExternalScam,
        Self::IdentityTheft,
        Self::DsrMisconduct,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceTampering => "device_tampering",
            Self::AccountTakeover => "account_takeover",
            Self::CashLoanFraud   => "cash_loan_fraud",
            Self::PaymentFraud    => "payment_fraud",
            Self::NetworkFraud    => "network_fraud",
            Self::ExternalScam    => "external_scam",
            Self::IdentityTheft   => "identity_theft",
            Self::DsrMisconduct   => "dsr_misconduct",
            Self::Unknown         => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low      => "low",
            Self::Medium   => "medium",
            Self::High     => "high",
            Self::Critical => "critical",
        }
    }
}

/// Canonical combinations of enabled stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    DeviceTamperingStandard,
    AccountTakeoverFull,
    CashLoanComprehensive,
    PaymentFraudBasic,
    ExternalScamQuick,
    QuickLookup,
}

impl Route {
    pub const ALL: [Route; 6] = [
        Self::DeviceTamperingStandard,
        Self::AccountTakeoverFull,
        Self::CashLoanComprehensive,
        Self::PaymentFraudBasic,
        Self::ExternalScamQuick,
        Self::QuickLookup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceTamperingStandard => "device_tampering_standard",
            Self::AccountTakeoverFull     => "account_takeover_full",
            Self::CashLoanComprehensive   => "cash_loan_comprehensive",
            Self::PaymentFraudBasic       => "payment_fraud_basic",
            Self::ExternalScamQuick       => "external_scam_quick",
            Self::QuickLookup             => "quick_lookup",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagePlan {
    pub risk_signal: bool,
    pub historical:  bool,
    pub behavioral:  bool,
    pub fraud_type:  FraudType,
    pub risk_tier:   RiskTier,
    /// Route as requested. Not re-derived after the hard rules run.
    pub route:       Route,
    pub rationale:   String,
    pub confidence:  f64,
    pub key_concerns: Vec<String>,
    /// Identifiers the service spotted; raw, normalized on merge.
    pub suggested_identifiers: StructuredFields,
    /// Every hard rule that changed what the service proposed.
    pub overrides:   Vec<String>,
}

impl StagePlan {
    pub fn enabled(&self, stage: StageName) -> bool {
        match stage {
            StageName::BasicLookup => true,
            StageName::RiskSignal  => self.risk_signal,
            StageName::Historical  => self.historical,
            StageName::Behavioral  => self.behavioral,
        }
    }

    fn set(&mut self, stage: StageName, on: bool) {
        match stage {
            StageName::BasicLookup => {}
            StageName::RiskSignal  => self.risk_signal = on,
            StageName::Historical  => self.historical = on,
            StageName::Behavioral  => self.behavioral = on,
        }
    }

    pub fn enabled_stages(&self) -> Vec<StageName> {
        StageName::ORDER.into_iter().filter(|s| self.enabled(*s)).collect()
    }
}

pub struct StagePlanner {
    config:  Arc<TriageConfig>,
    adapter: Arc<ClassifierAdapter>,
    service: Arc<dyn ClassificationService>,
}

impl StagePlanner {
    pub fn new(
        config: Arc<TriageConfig>,
        adapter: Arc<ClassifierAdapter>,
        service: Arc<dyn ClassificationService>,
    ) -> Self {
        Self { config, adapter, service }
    }

    /// Ask the service for a plan and enforce the hard rules on it.
    /// An unparsable or invalid answer fails; no default plan is made up.
    pub fn plan(&self, case: &Case, ids: &IdentifierSet) -> TriageResult<StagePlan> {
        let request = self.adapter.planning_request(case, ids);
        let service = Arc::clone(&self.service);
        let raw = call_with_timeout("planning", self.config.timeouts.planning(), move || {
            service.plan(&request)
        })?;
        let response = self.adapter.parse_plan(&raw)?;
        let plan = self.enforce(case, ids, response);
        log::info!(
            "case {}: route {} ({}, {} risk), stages {:?}",
            case.case_id,
            plan.route.as_str(),
            plan.fraud_type.as_str(),
            plan.risk_tier.as_str(),
            plan.enabled_stages().iter().map(StageName::as_str).collect::<Vec<_>>(),
        );
        Ok(plan)
    }

    /// Apply the hard rules to a validated response. Pure.
    pub fn enforce(&self, case: &Case, ids: &IdentifierSet, response: PlanResponse) -> StagePlan {
        let mut plan = StagePlan {
            risk_signal:  response.execute_risk_signal,
            historical:   response.execute_historical,
            behavioral:   response.execute_behavioral,
            fraud_type:   response.fraud_type,
            risk_tier:    response.risk_level,
            route:        response.investigation_route,
            rationale:    response.reasoning,
            confidence:   response.confidence,
            key_concerns: response.key_concerns,
            suggested_identifiers: response.identifiers_extracted.unwrap_or_default(),
            overrides:    Vec::new(),
        };

        let expensive = self.config.expensive_stage();
        let route_stages = self.config.route_stages(plan.route).to_vec();

        for stage in StageName::OPTIONAL {
            if stage == expensive {
                continue;
            }
            if !plan.enabled(stage) && route_stages.contains(&stage) {
                plan.set(stage, true);
                plan.overrides.push(format!(
                    "{} enabled: route {} includes it",
                    stage.as_str(),
                    plan.route.as_str()
                ));
            }
        }

        let keyword = self.strong_keyword(case);
        let strong_type = self.config.expensive_stage_fraud_types.contains(&plan.fraud_type);
        let want_expensive = plan.fraud_type != FraudType::ExternalScam
            && (strong_type || keyword.is_some());
        if want_expensive != plan.enabled(expensive) {
            plan.set(expensive, want_expensive);
            let why = match (want_expensive, keyword) {
                (true, Some(k)) if !strong_type => format!("narrative mentions '{k}'"),
                (true, _) => format!("fraud type {}", plan.fraud_type.as_str()),
                (false, _) if plan.fraud_type == FraudType::ExternalScam => {
                    "external scams never need it".to_string()
                }
                (false, _) => "no strong signal".to_string(),
            };
            plan.overrides.push(format!(
                "{} {}: {why}",
                expensive.as_str(),
                if want_expensive { "enabled" } else { "disabled" },
            ));
        }

        if plan.fraud_type == FraudType::ExternalScam
            && expensive != StageName::RiskSignal
            && plan.risk_signal
            && !ids.has_device_identifier()
        {
            plan.risk_signal = false;
            plan.overrides.push(
                "risk_signal disabled: external scam with no device identifier".to_string(),
            );
        }

        for o in &plan.overrides {
            log::info!("case {}: plan override: {o}", case.case_id);
        }
        plan
    }

    /// First configured strong keyword found in the narrative.
    fn strong_keyword(&self, case: &Case) -> Option<String> {
        let narrative = case.narrative().to_lowercase();
        self.config
            .strong_keywords
            .iter()
            .find(|k| narrative.contains(&k.to_lowercase()))
            .cloned()
    }
}
