use std::collections::HashMap;
use std::fmt;

use crate::model::kinds;

/// One failed check against a resource document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Document validation contract, consumed by the pipeline before any
/// conversion or store access. A failing document never reaches the
/// store.
pub trait SchemaValidator: Send + Sync {
    fn validate(
        &self,
        resource_type: &str,
        body: &serde_json::Value,
    ) -> Result<(), Vec<ValidationFailure>>;
}

struct KindRules {
    required_properties: &'static [&'static str],
}

/// Rule-based validator over the built-in kinds. Constructed once at
/// startup and shared read-only; a full JSON-Schema validator would slot
/// in behind the same trait.
pub struct RuleValidator {
    rules: HashMap<&'static str, KindRules>,
}

impl RuleValidator {
    pub fn builtin() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            kinds::DATA_STORE_TYPE,
            KindRules {
                required_properties: &["environment"],
            },
        );
        rules.insert(
            kinds::CACHE_TYPE,
            KindRules {
                required_properties: &["environment"],
            },
        );
        rules.insert(
            kinds::SERVICE_TYPE,
            KindRules {
                required_properties: &["environment"],
            },
        );
        Self { rules }
    }
}

impl SchemaValidator for RuleValidator {
    fn validate(
        &self,
        resource_type: &str,
        body: &serde_json::Value,
    ) -> Result<(), Vec<ValidationFailure>> {
        let rules = self
            .rules
            .iter()
            .find(|(kind, _)| kind.eq_ignore_ascii_case(resource_type))
            .map(|(_, rules)| rules);
        let Some(rules) = rules else {
            return Err(vec![ValidationFailure {
                field: "type".to_string(),
                message: format!("unknown resource type '{resource_type}'"),
            }]);
        };

        let mut failures = Vec::new();
        let Some(properties) = body.get("properties") else {
            failures.push(ValidationFailure {
                field: "properties".to_string(),
                message: "required property is missing".to_string(),
            });
            return Err(failures);
        };

        for required in rules.required_properties {
            let present = properties
                .get(*required)
                .and_then(|v| v.as_str())
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if !present {
                failures.push(ValidationFailure {
                    field: format!("properties.{required}"),
                    message: "required property is missing or empty".to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_complete_document() {
        let validator = RuleValidator::builtin();
        let body = json!({"properties": {"environment": "env0", "managed": true}});
        assert!(validator.validate(kinds::CACHE_TYPE, &body).is_ok());
    }

    #[test]
    fn reports_missing_required_property() {
        let validator = RuleValidator::builtin();
        let body = json!({"properties": {"managed": true}});
        let failures = validator.validate(kinds::CACHE_TYPE, &body).unwrap_err();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].field, "properties.environment");
    }

    #[test]
    fn rejects_unknown_type() {
        let validator = RuleValidator::builtin();
        let body = json!({"properties": {}});
        assert!(validator.validate("Rudder.Resources/volcanoes", &body).is_err());
    }
}
