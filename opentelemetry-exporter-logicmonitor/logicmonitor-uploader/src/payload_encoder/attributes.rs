use base64::{engine::general_purpose, Engine as _};
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Attribute whose value identifies the host a record came from.
pub(crate) const HOSTNAME_KEY: &str = "hostname";
/// Name the ingestion API expects for the host identity inside `_lm.resourceId`.
pub(crate) const HOSTNAME_PROPERTY: &str = "system.hostname";

/// Record attributes after resolution: key to rendered string value.
pub(crate) type Attributes = BTreeMap<String, String>;

/// Decides which value survives when a resource attribute and a record
/// attribute share the same key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttributePrecedence {
    /// The record keeps its own value; resource attributes only fill gaps.
    #[default]
    Record,
    /// The resource value replaces the record value.
    Resource,
}

/// State that lives for exactly one encode call.
///
/// Holds the resource identity seen so far. Once a `hostname` attribute has
/// been observed, every later record of the same call carries it, until another
/// resource group supplies a different one.
#[derive(Debug, Default)]
pub(crate) struct ExportContext {
    hostname: Option<String>,
}

impl ExportContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn observe(&mut self, attributes: &Attributes) {
        if let Some(hostname) = attributes.get(HOSTNAME_KEY) {
            self.hostname = Some(hostname.clone());
        }
    }

    /// The single identity pair, or an empty pair before any identity was seen.
    pub(crate) fn resource_id(&self) -> BTreeMap<&str, &str> {
        let mut resource_id = BTreeMap::new();
        match &self.hostname {
            Some(hostname) => resource_id.insert(HOSTNAME_PROPERTY, hostname.as_str()),
            None => resource_id.insert("", ""),
        };
        resource_id
    }
}

/// Renders a record's own attributes into string form.
pub(crate) fn record_attributes(attributes: &[KeyValue]) -> Attributes {
    attributes
        .iter()
        .map(|kv| (kv.key.clone(), optional_value_to_string(kv.value.as_ref())))
        .collect()
}

/// Copies every resource attribute into `record_attributes`.
///
/// Record attributes are never removed; on a key collision `precedence` picks
/// the surviving value.
pub(crate) fn merge_resource_attributes(
    record_attributes: &mut Attributes,
    resource_attributes: &[KeyValue],
    precedence: AttributePrecedence,
) {
    for kv in resource_attributes {
        let value = optional_value_to_string(kv.value.as_ref());
        match (record_attributes.entry(kv.key.clone()), precedence) {
            (Entry::Vacant(entry), _) => {
                entry.insert(value);
            }
            (Entry::Occupied(mut entry), AttributePrecedence::Resource) => {
                entry.insert(value);
            }
            (Entry::Occupied(_), AttributePrecedence::Record) => {}
        }
    }
}

pub(crate) fn optional_value_to_string(value: Option<&AnyValue>) -> String {
    value.map(any_value_to_string).unwrap_or_default()
}

fn any_value_to_string(value: &AnyValue) -> String {
    match &value.value {
        Some(Value::StringValue(s)) => s.clone(),
        Some(Value::BoolValue(b)) => b.to_string(),
        Some(Value::IntValue(i)) => i.to_string(),
        Some(Value::DoubleValue(d)) => d.to_string(),
        Some(Value::BytesValue(bytes)) => general_purpose::STANDARD.encode(bytes),
        Some(Value::ArrayValue(_)) | Some(Value::KvlistValue(_)) => {
            any_value_to_json(value).to_string()
        }
        None => String::new(),
    }
}

fn any_value_to_json(value: &AnyValue) -> serde_json::Value {
    match &value.value {
        Some(Value::StringValue(s)) => serde_json::Value::from(s.as_str()),
        Some(Value::BoolValue(b)) => serde_json::Value::from(*b),
        Some(Value::IntValue(i)) => serde_json::Value::from(*i),
        // NaN and infinities have no JSON form and become null
        Some(Value::DoubleValue(d)) => serde_json::Value::from(*d),
        Some(Value::BytesValue(bytes)) => {
            serde_json::Value::from(general_purpose::STANDARD.encode(bytes))
        }
        Some(Value::ArrayValue(array)) => {
            serde_json::Value::Array(array.values.iter().map(any_value_to_json).collect())
        }
        Some(Value::KvlistValue(list)) => serde_json::Value::Object(
            list.values
                .iter()
                .map(|kv| {
                    let value = kv
                        .value
                        .as_ref()
                        .map(any_value_to_json)
                        .unwrap_or(serde_json::Value::Null);
                    (kv.key.clone(), value)
                })
                .collect(),
        ),
        None => serde_json::Value::Null,
    }
}
