//! Rendering of derived events into the JSON documents consumed by case management.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::outcome::{Address, Outcome};

pub const EVENT_SOURCE: &str = "FIELDWORK_GATEWAY";
pub const EVENT_CHANNEL: &str = "FIELD";

/// Format of every timestamp case management receives from us.
const EVENT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn format_event_date(date: &DateTime<Utc>) -> String {
    date.format(EVENT_DATE_FORMAT).to_string()
}

/// The types of derived events the gateway produces.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EventType {
    AddressTypeChanged,
    QuestionnaireLinked,
    NewAddressReported,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AddressTypeChanged => "ADDRESS_TYPE_CHANGED",
            EventType::QuestionnaireLinked => "QUESTIONNAIRE_LINKED",
            EventType::NewAddressReported => "NEW_ADDRESS_REPORTED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("failed to render {event_type} event: {reason}")]
pub struct RenderError {
    pub event_type: EventType,
    pub reason: String,
}

/// The field map a processor hands over for rendering.
#[derive(Debug, Clone, Copy)]
pub enum OutcomeMessage<'a> {
    AddressTypeChanged {
        outcome: &'a Outcome,
        case_id: Uuid,
        new_case_id: Uuid,
        region: Option<&'a str>,
        estab_type: &'a str,
        usual_residents: u32,
    },
    QuestionnaireLinked {
        outcome: &'a Outcome,
        case_id: Uuid,
        questionnaire_id: &'a str,
    },
    NewAddressReported {
        outcome: &'a Outcome,
        new_case_id: Uuid,
    },
}

impl OutcomeMessage<'_> {
    pub fn event_type(&self) -> EventType {
        match self {
            OutcomeMessage::AddressTypeChanged { .. } => EventType::AddressTypeChanged,
            OutcomeMessage::QuestionnaireLinked { .. } => EventType::QuestionnaireLinked,
            OutcomeMessage::NewAddressReported { .. } => EventType::NewAddressReported,
        }
    }

    fn outcome(&self) -> &Outcome {
        match self {
            OutcomeMessage::AddressTypeChanged { outcome, .. }
            | OutcomeMessage::QuestionnaireLinked { outcome, .. }
            | OutcomeMessage::NewAddressReported { outcome, .. } => *outcome,
        }
    }
}

/// Turns a field map into the payload handed to the publisher.
pub trait Render: Send + Sync {
    fn render(&self, message: &OutcomeMessage<'_>) -> Result<String, RenderError>;
}

#[derive(Serialize)]
struct Envelope<P: Serialize> {
    event: EventHeader,
    payload: P,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventHeader {
    r#type: &'static str,
    source: &'static str,
    channel: &'static str,
    date_time: String,
    transaction_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressTypeChangePayload<'a> {
    address_type_change: AddressTypeChange<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressTypeChange<'a> {
    new_case_id: Uuid,
    collection_case: ChangedCollectionCase<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangedCollectionCase<'a> {
    id: Uuid,
    ce_expected_capacity: u32,
    address: RenderedAddress<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderedAddress<'a> {
    #[serde(flatten)]
    address: Option<&'a Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estab_type: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuestionnaireLinkedPayload<'a> {
    uac: LinkedUac<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkedUac<'a> {
    case_id: Uuid,
    questionnaire_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewAddressPayload<'a> {
    new_address: NewAddress<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewAddress<'a> {
    collection_case: NewCollectionCase<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewCollectionCase<'a> {
    id: Uuid,
    case_type: &'static str,
    survey: &'static str,
    field_officer_id: &'a str,
    address: RenderedAddress<'a>,
}

/// Renders derived events as JSON envelopes: an `event` header followed by a typed `payload`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl JsonRenderer {
    fn to_json<P: Serialize>(
        message: &OutcomeMessage<'_>,
        payload: P,
    ) -> Result<String, RenderError> {
        let outcome = message.outcome();
        let envelope = Envelope {
            event: EventHeader {
                r#type: message.event_type().as_str(),
                source: EVENT_SOURCE,
                channel: EVENT_CHANNEL,
                date_time: format_event_date(&outcome.event_date),
                transaction_id: outcome.transaction_id,
            },
            payload,
        };

        serde_json::to_string(&envelope).map_err(|error| RenderError {
            event_type: message.event_type(),
            reason: error.to_string(),
        })
    }
}

impl Render for JsonRenderer {
    fn render(&self, message: &OutcomeMessage<'_>) -> Result<String, RenderError> {
        match *message {
            OutcomeMessage::AddressTypeChanged {
                outcome,
                case_id,
                new_case_id,
                region,
                estab_type,
                usual_residents,
            } => Self::to_json(
                message,
                AddressTypeChangePayload {
                    address_type_change: AddressTypeChange {
                        new_case_id,
                        collection_case: ChangedCollectionCase {
                            id: case_id,
                            ce_expected_capacity: usual_residents,
                            address: RenderedAddress {
                                address: outcome.address.as_ref(),
                                region,
                                address_type: Some(estab_type),
                                estab_type: Some(estab_type),
                            },
                        },
                    },
                },
            ),
            OutcomeMessage::QuestionnaireLinked {
                case_id,
                questionnaire_id,
                ..
            } => Self::to_json(
                message,
                QuestionnaireLinkedPayload {
                    uac: LinkedUac {
                        case_id,
                        questionnaire_id,
                    },
                },
            ),
            OutcomeMessage::NewAddressReported {
                outcome,
                new_case_id,
            } => Self::to_json(
                message,
                NewAddressPayload {
                    new_address: NewAddress {
                        collection_case: NewCollectionCase {
                            id: new_case_id,
                            case_type: "SPG",
                            survey: "CENSUS",
                            field_officer_id: &outcome.officer_id,
                            address: RenderedAddress {
                                address: outcome.address.as_ref(),
                                region: None,
                                address_type: None,
                                estab_type: None,
                            },
                        },
                    },
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn outcome() -> Outcome {
        Outcome {
            case_id: Uuid::parse_str("8ed3fc08-e95f-44db-a6d7-cde4e76a6182").unwrap(),
            transaction_id: Uuid::parse_str("045de4dc-3c3b-11e9-b210-d663bd873d93").unwrap(),
            event_date: Utc.with_ymd_and_hms(2020, 4, 17, 10, 30, 5).unwrap(),
            officer_id: "E1-RL-SAM1-01".to_owned(),
            site_case_id: None,
            access_info: None,
            care_codes: vec![],
            fulfilment_requests: vec![],
            address: Some(Address {
                address_line1: Some("1 Main Street".to_owned()),
                postcode: Some("AB1 2CD".to_owned()),
                ..Address::default()
            }),
        }
    }

    #[test]
    fn test_format_event_date() {
        let date = Utc.with_ymd_and_hms(2020, 4, 17, 10, 30, 5).unwrap();
        assert_eq!(format_event_date(&date), "2020-04-17T10:30:05.000Z");
    }

    #[test]
    fn test_render_address_type_changed() {
        let outcome = outcome();
        let new_case_id = Uuid::parse_str("1f0ae0a1-1a7e-4f6a-92f8-3c8a1b3d4e5f").unwrap();
        let message = OutcomeMessage::AddressTypeChanged {
            outcome: &outcome,
            case_id: outcome.case_id,
            new_case_id,
            region: Some("E1000000"),
            estab_type: "HH",
            usual_residents: 0,
        };

        let rendered = JsonRenderer.render(&message).unwrap();
        let actual: Value = serde_json::from_str(&rendered).unwrap();

        assert_json_include!(
            actual: actual,
            expected: json!({
                "event": {
                    "type": "ADDRESS_TYPE_CHANGED",
                    "source": "FIELDWORK_GATEWAY",
                    "channel": "FIELD",
                    "dateTime": "2020-04-17T10:30:05.000Z",
                    "transactionId": "045de4dc-3c3b-11e9-b210-d663bd873d93"
                },
                "payload": {
                    "addressTypeChange": {
                        "newCaseId": "1f0ae0a1-1a7e-4f6a-92f8-3c8a1b3d4e5f",
                        "collectionCase": {
                            "id": "8ed3fc08-e95f-44db-a6d7-cde4e76a6182",
                            "ceExpectedCapacity": 0,
                            "address": {
                                "addressLine1": "1 Main Street",
                                "postcode": "AB1 2CD",
                                "region": "E1000000",
                                "estabType": "HH"
                            }
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_render_questionnaire_linked() {
        let outcome = outcome();
        let message = OutcomeMessage::QuestionnaireLinked {
            outcome: &outcome,
            case_id: outcome.case_id,
            questionnaire_id: "0120000000000300",
        };

        let rendered = JsonRenderer.render(&message).unwrap();
        let actual: Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(
            actual["payload"],
            json!({
                "uac": {
                    "caseId": "8ed3fc08-e95f-44db-a6d7-cde4e76a6182",
                    "questionnaireId": "0120000000000300"
                }
            })
        );
        assert_eq!(actual["event"]["type"], "QUESTIONNAIRE_LINKED");
    }

    #[test]
    fn test_render_new_address_without_region() {
        let outcome = outcome();
        let new_case_id = Uuid::new_v4();
        let message = OutcomeMessage::NewAddressReported {
            outcome: &outcome,
            new_case_id,
        };

        let rendered = JsonRenderer.render(&message).unwrap();
        let actual: Value = serde_json::from_str(&rendered).unwrap();
        let collection_case = &actual["payload"]["newAddress"]["collectionCase"];

        assert_eq!(collection_case["id"], json!(new_case_id.to_string()));
        assert_eq!(collection_case["fieldOfficerId"], "E1-RL-SAM1-01");
        assert_eq!(collection_case["address"]["postcode"], "AB1 2CD");
        assert!(collection_case["address"].get("region").is_none());
    }
}
