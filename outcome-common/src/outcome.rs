use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An outcome reported by the field tool about a single case.
/// Once deserialized, an `Outcome` is never modified: processors only borrow it.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub case_id: Uuid,
    pub transaction_id: Uuid,
    pub event_date: DateTime<Utc>,
    pub officer_id: String,
    #[serde(default)]
    pub site_case_id: Option<Uuid>,
    #[serde(default)]
    pub access_info: Option<String>,
    #[serde(default)]
    pub care_codes: Vec<String>,
    #[serde(default)]
    pub fulfilment_requests: Vec<FulfilmentRequest>,
    #[serde(default)]
    pub address: Option<Address>,
}

impl Outcome {
    /// Flatten care codes into the single text column kept in the case cache.
    /// An outcome without care codes stores nothing rather than an empty string.
    pub fn care_codes_text(&self) -> Option<String> {
        care_codes_to_text(&self.care_codes)
    }

    /// The site case id as it appears in lifecycle events.
    pub fn site_case_id_label(&self) -> String {
        match self.site_case_id {
            Some(id) => id.to_string(),
            None => "N/A".to_owned(),
        }
    }
}

pub fn care_codes_to_text(care_codes: &[String]) -> Option<String> {
    if care_codes.is_empty() {
        None
    } else {
        Some(care_codes.join(","))
    }
}

/// A request attached to an outcome. Only requests naming a questionnaire
/// are of interest for questionnaire linkage.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FulfilmentRequest {
    #[serde(rename = "questionnaireID", default)]
    pub questionnaire_id: Option<String>,
    #[serde(default)]
    pub fulfilment_code: Option<String>,
    #[serde(default)]
    pub questionnaire_type: Option<String>,
}

impl FulfilmentRequest {
    pub fn is_questionnaire_linked(&self) -> bool {
        self.questionnaire_id.is_some()
    }
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_line2: Option<String>,
    #[serde(default)]
    pub address_line3: Option<String>,
    #[serde(default)]
    pub town_name: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub organisation_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub uprn: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_field_outcome() {
        let raw = r#"{
            "caseId": "8ed3fc08-e95f-44db-a6d7-cde4e76a6182",
            "transactionId": "045de4dc-3c3b-11e9-b210-d663bd873d93",
            "eventDate": "2020-04-17T10:00:00Z",
            "officerId": "E1-RL-SAM1-01",
            "accessInfo": "Door code 1234",
            "careCodes": ["1", "2"],
            "fulfilmentRequests": [
                {"questionnaireID": null},
                {"questionnaireID": "0120000000000300", "questionnaireType": "01"}
            ],
            "address": {"addressLine1": "1 Main Street", "postcode": "AB1 2CD"}
        }"#;

        let outcome: Outcome = serde_json::from_str(raw).expect("failed to parse outcome");

        assert_eq!(outcome.officer_id, "E1-RL-SAM1-01");
        assert_eq!(outcome.site_case_id, None);
        assert_eq!(outcome.care_codes, vec!["1".to_owned(), "2".to_owned()]);
        assert_eq!(outcome.fulfilment_requests.len(), 2);
        assert!(!outcome.fulfilment_requests[0].is_questionnaire_linked());
        assert!(outcome.fulfilment_requests[1].is_questionnaire_linked());
        assert_eq!(
            outcome.address.and_then(|a| a.postcode),
            Some("AB1 2CD".to_owned())
        );
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let raw = r#"{
            "caseId": "8ed3fc08-e95f-44db-a6d7-cde4e76a6182",
            "transactionId": "045de4dc-3c3b-11e9-b210-d663bd873d93",
            "eventDate": "2020-04-17T10:00:00Z",
            "officerId": "W1-RL-SAM1-01"
        }"#;

        let outcome: Outcome = serde_json::from_str(raw).expect("failed to parse outcome");

        assert!(outcome.fulfilment_requests.is_empty());
        assert!(outcome.care_codes.is_empty());
        assert_eq!(outcome.care_codes_text(), None);
        assert_eq!(outcome.site_case_id_label(), "N/A");
    }

    #[test]
    fn test_care_codes_to_text_keeps_order() {
        let codes = vec!["3".to_owned(), "1".to_owned(), "2".to_owned()];
        assert_eq!(care_codes_to_text(&codes), Some("3,1,2".to_owned()));
    }
}
