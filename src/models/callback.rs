// models/callback.rs
//
// Daraja STK callback wire format. The provider reports result metadata as an
// array of {Name, Value} pairs; `CallbackMetadata::lookup` turns that into a
// map so the rest of the flow never touches the array shape.
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i32,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,

    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

impl CallbackMetadata {
    fn lookup(&self) -> HashMap<&str, &serde_json::Value> {
        self.items
            .iter()
            .map(|item| (item.name.as_str(), &item.value))
            .collect()
    }

    /// Confirmed amount in whole KES. The provider sends a JSON number that
    /// may carry a fractional part; it is truncated here.
    pub fn amount(&self) -> Option<i64> {
        let value = *self.lookup().get("Amount")?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|amount| amount as i64))
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.lookup()
            .get("MpesaReceiptNumber")
            .and_then(|value| value.as_str())
            .map(|receipt| receipt.to_string())
    }

    /// The provider sends the confirmed MSISDN as a bare number.
    pub fn phone_number(&self) -> Option<String> {
        let value = *self.lookup().get("PhoneNumber")?;
        match value {
            serde_json::Value::String(phone) => Some(phone.clone()),
            serde_json::Value::Number(phone) => Some(phone.to_string()),
            _ => None,
        }
    }
}
