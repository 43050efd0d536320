use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Namespace for case ids derived from transaction ids.
const DERIVED_CASE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c3e_8b4a_4d7e_9a0c_5e2b_7f31_c8d4);

/// Source of identifiers for cases created by the gateway.
pub trait CaseIdGenerator: Send + Sync {
    /// Produce the id of a case created while handling the outcome with `transaction_id`.
    /// `purpose` distinguishes several cases created for one transaction.
    fn generate(&self, transaction_id: Uuid, purpose: &str) -> Uuid;
}

/// Random (v4) ids: every call yields a new case, including redeliveries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCaseIds;

impl CaseIdGenerator for RandomCaseIds {
    fn generate(&self, _transaction_id: Uuid, _purpose: &str) -> Uuid {
        Uuid::new_v4()
    }
}

/// Name-based (v5) ids: a redelivered outcome maps to the case it already created.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedCaseIds;

impl CaseIdGenerator for DerivedCaseIds {
    fn generate(&self, transaction_id: Uuid, purpose: &str) -> Uuid {
        let name = format!("{}:{}", transaction_id, purpose);
        Uuid::new_v5(&DERIVED_CASE_ID_NAMESPACE, name.as_bytes())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CaseIdStrategy {
    Random,
    Derived,
}

impl CaseIdStrategy {
    pub fn generator(&self) -> Box<dyn CaseIdGenerator> {
        match self {
            CaseIdStrategy::Random => Box::new(RandomCaseIds),
            CaseIdStrategy::Derived => Box::new(DerivedCaseIds),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid case id strategy")]
pub struct ParseCaseIdStrategyError(pub String);

impl FromStr for CaseIdStrategy {
    type Err = ParseCaseIdStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "random" => Ok(CaseIdStrategy::Random),
            "derived" => Ok(CaseIdStrategy::Derived),
            invalid => Err(ParseCaseIdStrategyError(invalid.to_owned())),
        }
    }
}
