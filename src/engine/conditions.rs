// Conditional permission evaluation against resource attributes

use crate::core::models::{PermissionCondition, Principal};
use serde_json::Value;

/// Evaluator for [`PermissionCondition`] trees
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluate `condition` against the resource attributes.
    ///
    /// Missing attributes never satisfy a field test (but do satisfy `Not`
    /// of one). Field paths are dotted: `team.lead_id`.
    pub fn evaluate(condition: &PermissionCondition, attributes: &Value, principal: &Principal) -> bool {
        match condition {
            PermissionCondition::FieldEquals { field, value } => {
                Self::lookup(attributes, field).map_or(false, |actual| Self::loosely_equal(actual, value))
            }
            PermissionCondition::FieldIn { field, values } => Self::lookup(attributes, field)
                .map_or(false, |actual| values.iter().any(|v| Self::loosely_equal(actual, v))),
            PermissionCondition::FieldPresent { field } => {
                Self::lookup(attributes, field).map_or(false, |actual| !actual.is_null())
            }
            PermissionCondition::FieldMatchesPrincipal { field } => Self::lookup(attributes, field)
                .map_or(false, |actual| Self::as_identifier(actual).as_deref() == Some(principal.id.as_str())),
            PermissionCondition::All { conditions } => conditions
                .iter()
                .all(|c| Self::evaluate(c, attributes, principal)),
            PermissionCondition::Any { conditions } => conditions
                .iter()
                .any(|c| Self::evaluate(c, attributes, principal)),
            PermissionCondition::Not { condition } => !Self::evaluate(condition, attributes, principal),
        }
    }

    fn lookup<'a>(attributes: &'a Value, path: &str) -> Option<&'a Value> {
        path.split('.')
            .try_fold(attributes, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
                _ => None,
            })
    }

    /// Numbers compare by value and ids may arrive as strings or numbers
    fn loosely_equal(actual: &Value, expected: &Value) -> bool {
        match (actual, expected) {
            (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (Value::String(a), Value::Number(b)) | (Value::Number(b), Value::String(a)) => {
                a == &b.to_string()
            }
            _ => actual == expected,
        }
    }

    fn as_identifier(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
