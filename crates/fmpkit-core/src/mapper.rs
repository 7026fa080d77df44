//! Maps validated JSON payloads into typed records.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::classifier::error_message_in;
use crate::endpoint::{Endpoint, ResponseShape};
use crate::error::ApiError;

/// A mapped payload: one record or a list of records.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped<T> {
    Item(T),
    Items(Vec<T>),
}

impl<T> Mapped<T> {
    /// The record itself, or the first element of a list.
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::Items(items) => items.into_iter().next(),
        }
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Item(item) => vec![item],
            Self::Items(items) => items,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Item(_) => 1,
            Self::Items(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps `payload` into the records `endpoint` declares.
///
/// Lists are mapped element by element and elements that fail are skipped
/// with a warning. Objects carrying an error key fail as `ServerError`.
/// A bare scalar that is not itself a valid `T` is wrapped into the
/// endpoint's fallback field, when one is declared.
pub fn map_response<T: DeserializeOwned>(
    endpoint: &Endpoint<T>,
    payload: Value,
) -> Result<Mapped<T>, ApiError> {
    match payload {
        Value::Array(elements) => Ok(Mapped::Items(map_elements(endpoint, elements))),
        Value::Object(object) => {
            if let Some(message) = error_message_in(&object) {
                return Err(ApiError::server(None, message));
            }
            let item = map_value(endpoint, Value::Object(object))?;
            Ok(match endpoint.response_shape() {
                ResponseShape::ListOfItems => Mapped::Items(vec![item]),
                _ => Mapped::Item(item),
            })
        }
        scalar => map_value(endpoint, scalar).map(Mapped::Item),
    }
}

fn map_elements<T: DeserializeOwned>(endpoint: &Endpoint<T>, elements: Vec<Value>) -> Vec<T> {
    let total = elements.len();
    let items: Vec<T> = elements
        .into_iter()
        .enumerate()
        .filter_map(|(index, element)| match map_value(endpoint, element) {
            Ok(item) => Some(item),
            Err(error) => {
                warn!(
                    endpoint = endpoint.name(),
                    index,
                    error = %error,
                    "skipping list element that failed to map"
                );
                None
            }
        })
        .collect();

    if total > 0 && items.is_empty() {
        warn!(endpoint = endpoint.name(), total, "no list element could be mapped");
    }
    items
}

fn map_value<T: DeserializeOwned>(endpoint: &Endpoint<T>, value: Value) -> Result<T, ApiError> {
    let is_scalar = !(value.is_object() || value.is_array());

    match serde_json::from_value::<T>(value.clone()) {
        Ok(item) => Ok(item),
        Err(direct) if is_scalar => match endpoint.fallback_field() {
            Some(field) => {
                let mut wrapped = Map::new();
                wrapped.insert(field.to_owned(), value);
                serde_json::from_value(Value::Object(wrapped)).map_err(|e| {
                    ApiError::malformed(format!(
                        "scalar response for '{}' does not fit field '{field}': {e}",
                        endpoint.name()
                    ))
                })
            }
            None => Err(ApiError::malformed(format!(
                "unexpected scalar response for '{}': {direct}",
                endpoint.name()
            ))),
        },
        Err(e) => Err(ApiError::malformed(format!(
            "response for '{}' does not match the expected record: {e}",
            endpoint.name()
        ))),
    }
}
