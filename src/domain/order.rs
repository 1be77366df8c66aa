//! Order records as returned by the Shopify Admin `orders.json` endpoint.
//!
//! Orders are semi-structured: any requested field may be missing or `null`,
//! and both cases are treated as absent. Only the nested fields that end up
//! in the output log are kept for `billing_address` and `customer`, and a
//! value there that is not an object is also treated as absent.

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields requested from the source, in request order.
///
/// The output log's columns are derived from this list, so adding a field
/// here changes both the query and the CSV layout.
pub const ORDER_FIELDS: [&str; 18] = [
    "id",
    "email",
    "closed_at",
    "created_at",
    "updated_at",
    "number",
    "token",
    "total_price",
    "financial_status",
    "cancel_reason",
    "user_id",
    "processed_at",
    "phone",
    "order_number",
    "processing_method",
    "source_name",
    "billing_address",
    "customer",
];

/// A single order as received from the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Billing address (only the province code is retained)
    #[serde(default, deserialize_with = "object_or_none")]
    pub billing_address: Option<BillingAddress>,

    /// Customer who placed the order
    #[serde(default, deserialize_with = "object_or_none")]
    pub customer: Option<Customer>,

    /// All remaining top-level fields, keyed by field name
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Order {
    /// Look up a top-level scalar field. `null` is reported as absent.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|v| !v.is_null())
    }
}

/// Nested records only come from JSON objects; anything else is absent
fn object_or_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => serde_json::from_value(value)
            .map(Some)
            .map_err(D::Error::custom),
        _ => Ok(None),
    }
}

/// Billing address of an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingAddress {
    #[serde(default)]
    pub province_code: Option<Value>,
}

/// Customer attached to an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub first_name: Option<Value>,

    #[serde(default)]
    pub last_name: Option<Value>,

    #[serde(default)]
    pub phone: Option<Value>,

    #[serde(default)]
    pub orders_count: Option<Value>,
}

/// One page of the `orders.json` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderPage {
    #[serde(default)]
    pub orders: Vec<Order>,
}
