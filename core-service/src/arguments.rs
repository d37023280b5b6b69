//! Typed access to the argument map of a [`MethodCall`].
//!
//! Required accessors fail with `argument_not_found` when the key is absent,
//! `null`, or of the wrong type. Optional accessors treat all three cases as
//! absent.

use crate::error::{Result, ServiceError};

use bridge_traits::channel::MethodCall;
use serde_json::{Map, Value};
use std::collections::HashMap;

const STRING: &str = "String";
const BOOL: &str = "Bool";
const STRING_LIST: &str = "List<String>";

#[derive(Debug, Clone, Copy)]
pub struct Arguments<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Arguments<'a> {
    pub fn new(call: &'a MethodCall) -> Self {
        Self {
            map: call.argument_map(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map
            .and_then(|map| map.get(key))
            .filter(|value| !value.is_null())
    }

    pub fn string(&self, key: &str) -> Result<String> {
        self.optional_string(key)
            .ok_or_else(|| ServiceError::argument(key, STRING))
    }

    pub fn optional_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        self.optional_bool(key)
            .ok_or_else(|| ServiceError::argument(key, BOOL))
    }

    pub fn optional_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// A list whose every element is a string.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        self.get(key)
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| ServiceError::argument(key, STRING_LIST))
    }

    /// A map whose every value is a string.
    pub fn optional_string_map(&self, key: &str) -> Option<HashMap<String, String>> {
        self.get(key).and_then(Value::as_object).and_then(|object| {
            object
                .iter()
                .map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(arguments: Value) -> MethodCall {
        MethodCall::new("encrypt", arguments)
    }

    #[test]
    fn test_required_string() {
        let call = call(json!({ "text": "hi", "n": 1, "none": null }));
        let args = Arguments::new(&call);

        assert_eq!(args.string("text").unwrap(), "hi");
        for key in ["missing", "n", "none"] {
            let err = args.string(key).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("Could not find argument `{}` of type String", key)
            );
        }
    }

    #[test]
    fn test_non_object_arguments_are_empty() {
        let call = call(json!(["text"]));
        let args = Arguments::new(&call);
        assert!(args.string("text").is_err());
        assert!(args.optional_string_map("users").is_none());
    }

    #[test]
    fn test_string_list_rejects_mixed_items() {
        let call = call(json!({ "ok": ["a", "b"], "mixed": ["a", 1], "empty": [] }));
        let args = Arguments::new(&call);

        assert_eq!(args.string_list("ok").unwrap(), vec!["a", "b"]);
        assert!(args.string_list("empty").unwrap().is_empty());
        assert!(matches!(
            args.string_list("mixed"),
            Err(ServiceError::ArgumentNotFound { type_name: "List<String>", .. })
        ));
    }

    #[test]
    fn test_optional_values() {
        let call = call(json!({
            "users": { "bob": "card" },
            "bad": { "bob": 1 },
            "flag": true,
            "user": null
        }));
        let args = Arguments::new(&call);

        assert_eq!(
            args.optional_string_map("users").unwrap().get("bob").map(String::as_str),
            Some("card")
        );
        assert!(args.optional_string_map("bad").is_none());
        assert_eq!(args.optional_bool("flag"), Some(true));
        assert!(args.bool("flag").unwrap());
        assert!(args.optional_string("user").is_none());
    }
}
