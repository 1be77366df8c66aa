//! CSV row encoding for the order log.
//!
//! The column layout is declared once as a schema derived from
//! [`ORDER_FIELDS`]: fields are sorted by name, and each field expands to
//! one or more columns. `billing_address` becomes a single `billingState`
//! column and `customer` becomes four columns; every other field is one
//! column named after itself. The header and every row are produced from the
//! same schema, so they always line up.
//!
//! There is no quoting. Commas are removed from values and line breaks are
//! replaced with spaces, which keeps each order on one line with a fixed
//! number of columns.

use serde_json::Value;

use crate::domain::{BillingAddress, Customer, Order, ORDER_FIELDS};

/// Field delimiter
pub const DELIMITER: char = ',';

/// Row terminator
pub const ROW_END: &str = "\r\n";

/// How a column pulls its value out of an order
#[derive(Clone, Copy)]
enum Extractor {
    /// Top-level scalar field with the given name
    Attribute(&'static str),
    Billing(fn(&BillingAddress) -> Option<&Value>),
    Customer(fn(&Customer) -> Option<&Value>),
}

/// One output column
#[derive(Clone, Copy)]
pub struct Column {
    header: &'static str,
    extract: Extractor,
}

impl Column {
    pub fn header(&self) -> &'static str {
        self.header
    }

    fn value<'a>(&self, order: &'a Order) -> Option<&'a Value> {
        match self.extract {
            Extractor::Attribute(name) => order.attribute(name),
            Extractor::Billing(f) => order.billing_address.as_ref().and_then(f),
            Extractor::Customer(f) => order.customer.as_ref().and_then(f),
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Column").field(&self.header).finish()
    }
}

/// A source field and the columns it expands to
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub columns: Vec<Column>,
}

fn province_code(address: &BillingAddress) -> Option<&Value> {
    address.province_code.as_ref()
}

fn first_name(customer: &Customer) -> Option<&Value> {
    customer.first_name.as_ref()
}

fn last_name(customer: &Customer) -> Option<&Value> {
    customer.last_name.as_ref()
}

fn customer_phone(customer: &Customer) -> Option<&Value> {
    customer.phone.as_ref()
}

fn orders_count(customer: &Customer) -> Option<&Value> {
    customer.orders_count.as_ref()
}

impl Field {
    fn for_name(name: &'static str) -> Self {
        let columns = match name {
            "billing_address" => vec![Column {
                header: "billingState",
                extract: Extractor::Billing(province_code),
            }],
            "customer" => vec![
                Column {
                    header: "firstname",
                    extract: Extractor::Customer(first_name),
                },
                Column {
                    header: "lastname",
                    extract: Extractor::Customer(last_name),
                },
                Column {
                    header: "customerphone",
                    extract: Extractor::Customer(customer_phone),
                },
                Column {
                    header: "orders_count",
                    extract: Extractor::Customer(orders_count),
                },
            ],
            _ => vec![Column {
                header: name,
                extract: Extractor::Attribute(name),
            }],
        };

        Self { name, columns }
    }
}

/// Encodes orders as CSV rows matching the log header
#[derive(Debug, Clone)]
pub struct RowEncoder {
    fields: Vec<Field>,
}

impl Default for RowEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RowEncoder {
    pub fn new() -> Self {
        let mut names = ORDER_FIELDS.to_vec();
        names.sort_unstable();

        Self {
            fields: names.into_iter().map(Field::for_name).collect(),
        }
    }

    /// Fields in output order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// All columns in output order
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.fields.iter().flat_map(|f| f.columns.iter())
    }

    pub fn column_count(&self) -> usize {
        self.columns().count()
    }

    /// Comma-joined field list in request order, for the source query
    pub fn requested_fields(&self) -> String {
        ORDER_FIELDS.join(",")
    }

    /// Header line, terminated with CRLF
    pub fn header(&self) -> String {
        let names: Vec<&str> = self.columns().map(Column::header).collect();
        format!("{}{}", names.join(","), ROW_END)
    }

    /// One order as a CRLF-terminated row
    pub fn encode(&self, order: &Order) -> String {
        let values: Vec<String> = self
            .columns()
            .map(|column| render(column.value(order)))
            .collect();
        format!("{}{}", values.join(","), ROW_END)
    }

    /// All orders of a page as one block of rows
    pub fn encode_page(&self, orders: &[Order]) -> String {
        orders.iter().map(|order| self.encode(order)).collect()
    }
}

/// Text form of a value; absent values and nested structures are empty
fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => sanitize(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => String::new(),
    }
}

/// Drop delimiters and flatten line breaks
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != DELIMITER)
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}
