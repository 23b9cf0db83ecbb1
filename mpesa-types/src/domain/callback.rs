//! Inbound result and timeout notifications.
//!
//! Every asynchronous API posts the same envelope:
//!
//! ```json
//! {
//!   "Result": {
//!     "ResultType": 0,
//!     "ResultCode": "0",
//!     "ResultDesc": "The service request is processed successfully.",
//!     "OriginatorConversationID": "16917-22577599-3",
//!     "ConversationID": "AG_20200206_00005e091a8ec6b9eac5",
//!     "TransactionID": "OA90000000",
//!     "ResultParameters": {
//!       "ResultParameter": [
//!         { "Key": "AccountBalance", "Value": "Working Account|KES|346568.83|6186.83|340382.00|0.00" }
//!       ]
//!     }
//!   }
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};

use super::balance::AccountBalance;
use super::operation::SUCCESS_RESULT_CODE;

/// Result parameter key carrying the encoded balance string.
pub const ACCOUNT_BALANCE_KEY: &str = "AccountBalance";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Result")]
    pub result: CallbackResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackResult {
    #[serde(default)]
    pub result_type: i32,
    #[serde(deserialize_with = "string_or_number")]
    pub result_code: String,
    #[serde(default)]
    pub result_desc: String,
    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: Option<String>,
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_parameters: Option<ResultParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultParameters {
    #[serde(rename = "ResultParameter", default, deserialize_with = "one_or_many")]
    pub result_parameter: Vec<ResultParameter>,
}

/// A `{Key, Value}` pair. Values arrive as strings or numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultParameter {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

impl ResultParameter {
    /// The value rendered as text, without JSON quoting.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl CallbackResult {
    pub fn is_success(&self) -> bool {
        self.result_code.trim() == SUCCESS_RESULT_CODE
    }

    pub fn parameters(&self) -> &[ResultParameter] {
        self.result_parameters
            .as_ref()
            .map(|p| p.result_parameter.as_slice())
            .unwrap_or_default()
    }

    pub fn parameter(&self, key: &str) -> Option<&ResultParameter> {
        self.parameters().iter().find(|p| p.key == key)
    }

    /// Result parameters flattened into a JSON object.
    pub fn parameters_json(&self) -> serde_json::Value {
        let map = self
            .parameters()
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Balances decoded from the `AccountBalance` parameter, if present.
    pub fn account_balances(&self) -> Vec<AccountBalance> {
        self.parameter(ACCOUNT_BALANCE_KEY)
            .map(|p| AccountBalance::parse_all(&p.value_text()))
            .unwrap_or_default()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<ResultParameter>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(ResultParameter),
        Many(Vec<ResultParameter>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(p)) => vec![p],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}
