use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Name of the topic exchange derived outcome events are published to.
pub const OUTCOME_EXCHANGE: &str = "events";

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a known routing key")]
pub struct ParseRoutingKeyError(pub String);

/// The channel a routing key is delivered through.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Channel {
    /// The topic exchange shared by every outcome event.
    Outcome,
    /// The direct channel consumed by property listing.
    PropertyListing,
}

/// Fixed vocabulary of routing keys understood by the case-management system.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum RoutingKey {
    RespondentRefusal,
    AddressUpdate,
    FulfilmentRequest,
    QuestionnaireUpdate,
    CcsPropertyListing,
    FieldCaseUpdate,
    CaseAppointment,
    ResponseAuthentication,
    // Reserved: present in the case-management data dictionary but not produced yet.
    FulfilmentConfirmed,
    ResponseReceipt,
    UacUpdate,
    CaseUpdate,
    SampleUnitUpdate,
}

impl RoutingKey {
    pub const ALL: [RoutingKey; 13] = [
        RoutingKey::RespondentRefusal,
        RoutingKey::AddressUpdate,
        RoutingKey::FulfilmentRequest,
        RoutingKey::QuestionnaireUpdate,
        RoutingKey::CcsPropertyListing,
        RoutingKey::FieldCaseUpdate,
        RoutingKey::CaseAppointment,
        RoutingKey::ResponseAuthentication,
        RoutingKey::FulfilmentConfirmed,
        RoutingKey::ResponseReceipt,
        RoutingKey::UacUpdate,
        RoutingKey::CaseUpdate,
        RoutingKey::SampleUnitUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::RespondentRefusal => "event.respondent.refusal",
            RoutingKey::AddressUpdate => "event.case.address.update",
            RoutingKey::FulfilmentRequest => "event.fulfilment.request",
            RoutingKey::QuestionnaireUpdate => "event.questionnaire.update",
            RoutingKey::CcsPropertyListing => "event.ccs.propertylisting",
            RoutingKey::FieldCaseUpdate => "event.fieldcase.update",
            RoutingKey::CaseAppointment => "event.case.appointment",
            RoutingKey::ResponseAuthentication => "event.response.authentication",
            RoutingKey::FulfilmentConfirmed => "event.fulfilment.confirmed",
            RoutingKey::ResponseReceipt => "event.response.receipt",
            RoutingKey::UacUpdate => "event.uac.update",
            RoutingKey::CaseUpdate => "event.case.update",
            RoutingKey::SampleUnitUpdate => "event.sampleunit.update",
        }
    }

    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            RoutingKey::FulfilmentConfirmed
                | RoutingKey::ResponseReceipt
                | RoutingKey::UacUpdate
                | RoutingKey::CaseUpdate
                | RoutingKey::SampleUnitUpdate
        )
    }

    pub fn channel(&self) -> Channel {
        match self {
            RoutingKey::CcsPropertyListing => Channel::PropertyListing,
            _ => Channel::Outcome,
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingKey {
    type Err = ParseRoutingKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutingKey::ALL
            .iter()
            .find(|key| key.as_str() == s)
            .copied()
            .ok_or_else(|| ParseRoutingKeyError(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_keys_parse_back() {
        for key in RoutingKey::ALL {
            assert_eq!(key.as_str().parse::<RoutingKey>(), Ok(key));
        }
        assert_eq!(
            "event.unknown".parse::<RoutingKey>(),
            Err(ParseRoutingKeyError("event.unknown".to_owned()))
        );
    }

    #[test]
    fn test_only_property_listing_is_direct() {
        assert_eq!(
            RoutingKey::CcsPropertyListing.channel(),
            Channel::PropertyListing
        );
        assert_eq!(RoutingKey::AddressUpdate.channel(), Channel::Outcome);
        assert_eq!(RoutingKey::QuestionnaireUpdate.channel(), Channel::Outcome);
    }

    #[test]
    fn test_reserved_keys() {
        let reserved: Vec<_> = RoutingKey::ALL
            .iter()
            .filter(|key| key.is_reserved())
            .collect();
        assert_eq!(reserved.len(), 5);
        assert!(!RoutingKey::AddressUpdate.is_reserved());
    }
}
