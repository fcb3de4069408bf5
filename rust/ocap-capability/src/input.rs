use serde::Deserialize;
use serde_json::Value;

use crate::{Capability, ParseError};

/// The accepted shapes of a capability request.
///
/// Requests usually come from user supplied lists, so they are accepted as
/// a bare action name (a leaf), a `(name, max_derive)` pair, a
/// `{ name, max_derive }` record, or an existing [`Capability`]. Anything
/// else is rejected with a [`ParseError`] rather than coerced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub enum CapabilityInput {
    /// Action name only, requesting a leaf.
    Name(String),
    /// `(name, max_derive)` pair.
    Pair(String, u32),
    /// `{ name, max_derive }` record.
    Record {
        /// Action name.
        name: String,
        /// Requested budget.
        max_derive: u32,
    },
    /// Already constructed capability.
    Capability(Capability),
}

impl CapabilityInput {
    /// Action name this input refers to.
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Pair(name, _) | Self::Record { name, .. } => name,
            Self::Capability(capability) => capability.name(),
        }
    }

    /// Normalize a JSON value.
    ///
    /// Accepts `"name"`, `["name", max_derive]` and
    /// `{"name": .., "max_derive": ..}` (`max_derive` defaults to 0).
    pub fn parse(value: &Value) -> Result<Self, ParseError> {
        match value {
            Value::String(name) => Ok(Self::Name(non_empty(name)?)),
            Value::Array(items) => match items.as_slice() {
                [Value::String(name), budget] => {
                    Ok(Self::Pair(non_empty(name)?, parse_budget(budget)?))
                }
                _ => Err(ParseError::Unsupported(value.to_string())),
            },
            Value::Object(fields) => {
                if let Some(key) = fields
                    .keys()
                    .find(|key| *key != "name" && *key != "max_derive")
                {
                    return Err(ParseError::Unsupported(format!("unknown key '{key}'")));
                }

                let name = match fields.get("name") {
                    Some(Value::String(name)) => non_empty(name)?,
                    Some(other) => return Err(ParseError::Unsupported(other.to_string())),
                    None => return Err(ParseError::MissingField("name")),
                };
                let max_derive = match fields.get("max_derive") {
                    Some(budget) => parse_budget(budget)?,
                    None => 0,
                };

                Ok(Self::Record { name, max_derive })
            }
            _ => Err(ParseError::Unsupported(value.to_string())),
        }
    }
}

fn non_empty(name: &str) -> Result<String, ParseError> {
    if name.trim().is_empty() {
        Err(ParseError::Empty)
    } else {
        Ok(name.to_string())
    }
}

fn parse_budget(value: &Value) -> Result<u32, ParseError> {
    value
        .as_u64()
        .and_then(|budget| u32::try_from(budget).ok())
        .ok_or_else(|| ParseError::InvalidBudget(value.to_string()))
}

impl TryFrom<Value> for CapabilityInput {
    type Error = ParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<&str> for CapabilityInput {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for CapabilityInput {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl<S: Into<String>> From<(S, u32)> for CapabilityInput {
    fn from((name, max_derive): (S, u32)) -> Self {
        Self::Pair(name.into(), max_derive)
    }
}

impl From<Capability> for CapabilityInput {
    fn from(capability: Capability) -> Self {
        Self::Capability(capability)
    }
}

impl From<&Capability> for CapabilityInput {
    fn from(capability: &Capability) -> Self {
        Self::Capability(capability.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_normalizes_every_supported_shape() {
        let expected = Capability::new("action", 12);
        let values = [
            CapabilityInput::parse(&json!(["action", 12])).unwrap(),
            CapabilityInput::parse(&json!({ "name": "action", "max_derive": 12 })).unwrap(),
            CapabilityInput::from(("action", 12)),
            CapabilityInput::from(expected.clone()),
        ];

        for value in values {
            assert_eq!(Capability::from(value), expected);
        }
    }

    #[test]
    fn it_treats_bare_names_as_leaves() {
        let input = CapabilityInput::parse(&json!("action")).unwrap();
        assert_eq!(Capability::from(input), Capability::leaf("action"));
    }

    #[test]
    fn it_defaults_record_budget_to_zero() {
        let input = CapabilityInput::parse(&json!({ "name": "action" })).unwrap();
        assert_eq!(Capability::from(input), Capability::leaf("action"));
    }

    #[test]
    fn it_rejects_unsupported_values() {
        assert!(matches!(
            CapabilityInput::parse(&json!(12.1)),
            Err(ParseError::Unsupported(_))
        ));
        assert!(matches!(
            CapabilityInput::parse(&json!(["action", 1, 2])),
            Err(ParseError::Unsupported(_))
        ));
        assert!(matches!(
            CapabilityInput::parse(&json!({ "name": "action", "extra": true })),
            Err(ParseError::Unsupported(_))
        ));
    }

    #[test]
    fn it_rejects_bad_budgets_and_names() {
        assert_eq!(
            CapabilityInput::parse(&json!(["action", -1])),
            Err(ParseError::InvalidBudget("-1".into()))
        );
        assert_eq!(
            CapabilityInput::parse(&json!({ "max_derive": 1 })),
            Err(ParseError::MissingField("name"))
        );
        assert_eq!(CapabilityInput::parse(&json!("")), Err(ParseError::Empty));
    }

    #[test]
    fn it_deserializes_requests() {
        let inputs: Vec<CapabilityInput> =
            serde_json::from_value(json!(["read", ["write", 2], { "name": "share" }])).unwrap();

        assert_eq!(
            inputs,
            vec![
                CapabilityInput::Name("read".into()),
                CapabilityInput::Pair("write".into(), 2),
                CapabilityInput::Record {
                    name: "share".into(),
                    max_derive: 0
                },
            ]
        );
    }

    #[test]
    fn it_deserializes_capabilities_through_the_same_rules() {
        let capability: Capability =
            serde_json::from_value(json!({ "name": "read", "max_derive": 3 })).unwrap();
        assert_eq!(capability, Capability::new("read", 3));

        assert!(serde_json::from_value::<Capability>(json!(true)).is_err());
    }
}
