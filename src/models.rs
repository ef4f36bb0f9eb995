use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single observation submitted by a data source
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: Option<String>,
}

impl Data {
    /// True when `value` is present and non-empty
    pub fn has_value(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    #[serde(default)]
    pub error: Option<f32>,
    #[serde(default)]
    pub is_anomaly: bool,
}

/// Anomaly event broadcast to hub subscribers
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEvent {
    #[serde(default)]
    pub data: Option<Data>,
    #[serde(default)]
    pub prediction: Option<Prediction>,
}

impl AnomalyEvent {
    /// Only events carrying a data value are fanned out
    pub fn is_publishable(&self) -> bool {
        self.data.as_ref().is_some_and(Data::has_value)
    }
}

/// Operator feedback on a previous prediction
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    #[serde(default)]
    pub data: Option<Data>,
    #[serde(default)]
    pub is_anomaly: bool,
}

/// Serialized event handed to the external queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSubmission {
    pub queue_name: String,
    pub serialized_content: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_value_emptiness() {
        assert!(!Data::default().has_value());
        assert!(!Data { value: Some(String::new()), ..Data::default() }.has_value());
        assert!(Data { value: Some("x".into()), ..Data::default() }.has_value());
    }

    #[test]
    fn test_anomaly_publishable_requires_data_value() {
        let event: AnomalyEvent =
            serde_json::from_str(r#"{"data":{"value":"x"},"prediction":{"isAnomaly":true}}"#)
                .unwrap();
        assert!(event.is_publishable());

        let no_data: AnomalyEvent =
            serde_json::from_str(r#"{"prediction":{"isAnomaly":true}}"#).unwrap();
        assert!(!no_data.is_publishable());

        let empty_value: AnomalyEvent = serde_json::from_str(r#"{"data":{"value":""}}"#).unwrap();
        assert!(!empty_value.is_publishable());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let event = AnomalyEvent {
            data: Some(Data {
                id: Uuid::nil(),
                timestamp: None,
                value: Some("42.0".into()),
            }),
            prediction: Some(Prediction {
                error: Some(0.5),
                is_anomaly: true,
            }),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["value"], "42.0");
        assert_eq!(json["prediction"]["isAnomaly"], true);
        assert_eq!(json["prediction"]["error"], 0.5);
    }
}
