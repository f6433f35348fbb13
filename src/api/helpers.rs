//! Shared helpers for WASM API operations
//!
//! Serialization across the JS boundary and conversion of crate errors into
//! values JavaScript can throw.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use wasm_bindgen::prelude::*;

/// Deserialize a value from JavaScript with automatic error handling
pub fn deserialize<T: DeserializeOwned>(value: JsValue, error_context: &str) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value).map_err(|e| js_error(format!("{}: {}", error_context, e)))
}

/// Serialize a value to JavaScript with automatic error handling
pub fn serialize<T: Serialize>(value: &T, error_context: &str) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value).map_err(|e| js_error(format!("{}: {}", error_context, e)))
}

/// Logs an error and wraps it for throwing
pub fn js_error(error: impl Display) -> JsValue {
    let msg = error.to_string();
    log::error!("{}", msg);
    JsValue::from_str(&msg)
}
