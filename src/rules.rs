use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{FlowError, Result};
use crate::record::Record;

/// Pure predicate over a record's current attributes and discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Equals { attribute: String, value: String },
    OneOf { attribute: String, values: Vec<String> },
    IsNull { attribute: String },
    NotNull { attribute: String },
    DiscriminatorAtLeast { value: i64 },
    DiscriminatorBelow { value: i64 },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn equals(attribute: &str, value: &str) -> Self {
        Condition::Equals {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    pub fn is_null(attribute: &str) -> Self {
        Condition::IsNull {
            attribute: attribute.to_string(),
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All { conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Any { conditions }
    }

    pub fn negate(condition: Condition) -> Self {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Condition::Always => true,
            Condition::Equals { attribute, value } => record.get(attribute) == Some(value.as_str()),
            Condition::OneOf { attribute, values } => record
                .get(attribute)
                .map(|v| values.iter().any(|x| x == v))
                .unwrap_or(false),
            Condition::IsNull { attribute } => record.get(attribute).is_none(),
            Condition::NotNull { attribute } => record.get(attribute).is_some(),
            Condition::DiscriminatorAtLeast { value } => record.discriminator >= *value,
            Condition::DiscriminatorBelow { value } => record.discriminator < *value,
            Condition::All { conditions } => conditions.iter().all(|c| c.matches(record)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.matches(record)),
            Condition::Not { condition } => !condition.matches(record),
        }
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Equals { attribute, .. }
            | Condition::OneOf { attribute, .. }
            | Condition::IsNull { attribute }
            | Condition::NotNull { attribute } => out.push(attribute),
            Condition::All { conditions } | Condition::Any { conditions } => {
                for c in conditions {
                    c.collect_attributes(out);
                }
            }
            Condition::Not { condition } => condition.collect_attributes(out),
            Condition::Always
            | Condition::DiscriminatorAtLeast { .. }
            | Condition::DiscriminatorBelow { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub when: Condition,
    #[serde(default)]
    pub value: Option<String>,
}

impl Rule {
    pub fn new(when: Condition, value: &str) -> Self {
        Self {
            when,
            value: Some(value.to_string()),
        }
    }

    pub fn null(when: Condition) -> Self {
        Self { when, value: None }
    }
}

/// A derived attribute is a priority list: the first matching rule wins,
/// no match leaves the attribute null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedAttribute {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl DerivedAttribute {
    pub fn new(name: &str, rules: Vec<Rule>) -> Self {
        Self {
            name: name.to_string(),
            rules,
        }
    }

    pub fn evaluate(&self, record: &Record) -> Option<String> {
        self.rules
            .iter()
            .find(|rule| rule.when.matches(record))
            .and_then(|rule| rule.value.clone())
    }
}

// ─────────────────────────────────────────────────────────────
//  STATUS DERIVER
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct StatusDeriver {
    derived: Vec<DerivedAttribute>,
}

impl StatusDeriver {
    /// Checks that every derived name is new and that each condition only
    /// reads primary attributes or attributes derived earlier in the list.
    pub fn new(primary: &[String], derived: Vec<DerivedAttribute>) -> Result<Self> {
        let mut known: Vec<&str> = primary.iter().map(String::as_str).collect();

        for attr in &derived {
            if known.contains(&attr.name.as_str()) {
                return Err(FlowError::DuplicateAttribute(attr.name.clone()));
            }

            let mut referenced = Vec::new();
            for rule in &attr.rules {
                rule.when.collect_attributes(&mut referenced);
            }
            if let Some(unknown) = referenced.iter().find(|r| !known.contains(*r)) {
                return Err(FlowError::UnknownAttribute {
                    name: unknown.to_string(),
                    context: format!("rules of derived attribute '{}'", attr.name),
                });
            }

            known.push(&attr.name);
        }

        Ok(Self { derived })
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.derived.iter().map(|d| d.name.clone()).collect()
    }

    /// Returns new records carrying the derived attributes; `records` is left
    /// untouched.
    #[instrument(skip_all, fields(records = records.len(), derived = self.derived.len()))]
    pub fn derive(&self, records: &[Record]) -> Vec<Record> {
        let out: Vec<Record> = records.iter().map(|r| self.derive_one(r)).collect();
        debug!("derived attributes applied");
        out
    }

    pub fn derive_one(&self, record: &Record) -> Record {
        let mut row = record.clone();
        for attr in &self.derived {
            let value = attr.evaluate(&row);
            row.attributes.insert(attr.name.clone(), value);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owns(value: &str, disc: i64) -> Record {
        Record::new(1, disc).with("owns", Some(value))
    }

    fn channel() -> DerivedAttribute {
        DerivedAttribute::new(
            "channel",
            vec![
                Rule::new(
                    Condition::all(vec![
                        Condition::equals("owns", "Yes"),
                        Condition::DiscriminatorAtLeast { value: 5 },
                    ]),
                    "Dealer",
                ),
                Rule::new(Condition::equals("owns", "Yes"), "Private"),
            ],
        )
    }

    #[test]
    fn test_earlier_rule_wins_when_two_match() {
        let attr = channel();
        // matches both rules
        assert_eq!(attr.evaluate(&owns("Yes", 8)).as_deref(), Some("Dealer"));
        // only the catch-all
        assert_eq!(attr.evaluate(&owns("Yes", 2)).as_deref(), Some("Private"));
    }

    #[test]
    fn test_reordering_rules_changes_outcome() {
        let mut attr = channel();
        attr.rules.reverse();
        assert_eq!(attr.evaluate(&owns("Yes", 8)).as_deref(), Some("Private"));
    }

    #[test]
    fn test_no_match_yields_null() {
        assert_eq!(channel().evaluate(&owns("No", 9)), None);
    }

    #[test]
    fn test_empty_rule_list_is_always_null() {
        let deriver = StatusDeriver::new(
            &["owns".to_string()],
            vec![DerivedAttribute::new("unused", vec![])],
        )
        .unwrap();
        let out = deriver.derive(&[owns("Yes", 1), owns("No", 10)]);
        assert!(out.iter().all(|r| r.has_attribute("unused") && r.get("unused").is_none()));
    }

    #[test]
    fn test_derive_does_not_touch_input() {
        let deriver = StatusDeriver::new(&["owns".to_string()], vec![channel()]).unwrap();
        let input = vec![owns("Yes", 7)];
        let out = deriver.derive(&input);

        assert!(!input[0].has_attribute("channel"));
        assert_eq!(out[0].get("channel"), Some("Dealer"));
        assert_eq!(out[0].id, input[0].id);
    }

    #[test]
    fn test_later_attribute_reads_earlier_derived_value() {
        let label = DerivedAttribute::new(
            "segment",
            vec![
                Rule::new(Condition::is_null("channel"), "None"),
                Rule::new(Condition::negate(Condition::equals("channel", "Dealer")), "Casual"),
                Rule::new(Condition::Always, "Trade"),
            ],
        );
        let deriver = StatusDeriver::new(&["owns".to_string()], vec![channel(), label]).unwrap();

        let out = deriver.derive(&[owns("Yes", 9), owns("Yes", 1), owns("No", 1)]);
        let segments: Vec<_> = out.iter().map(|r| r.get("segment")).collect();
        assert_eq!(segments, vec![Some("Trade"), Some("Casual"), Some("None")]);
    }

    #[test]
    fn test_one_of_and_any() {
        let c = Condition::any(vec![
            Condition::OneOf {
                attribute: "owns".into(),
                values: vec!["Maybe".into(), "Yes".into()],
            },
            Condition::DiscriminatorBelow { value: 2 },
        ]);
        assert!(c.matches(&owns("Yes", 9)));
        assert!(c.matches(&owns("No", 1)));
        assert!(!c.matches(&owns("No", 5)));
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        let bad = DerivedAttribute::new("x", vec![Rule::new(Condition::equals("nope", "1"), "v")]);
        match StatusDeriver::new(&["owns".to_string()], vec![bad]).unwrap_err() {
            FlowError::UnknownAttribute { name, context } => {
                assert_eq!(name, "nope");
                assert!(context.contains("'x'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let first = DerivedAttribute::new("a", vec![Rule::new(Condition::is_null("b"), "v")]);
        let second = DerivedAttribute::new("b", vec![]);
        assert!(StatusDeriver::new(&[], vec![first, second]).is_err());
    }

    #[test]
    fn test_name_collision_with_primary_is_rejected() {
        let err = StatusDeriver::new(&["owns".to_string()], vec![DerivedAttribute::new("owns", vec![])])
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateAttribute(name) if name == "owns"));
    }

    #[test]
    fn test_condition_deserializes_from_tagged_json() {
        let rule: Rule = serde_json::from_str(
            r#"{"when":{"op":"all","conditions":[{"op":"equals","attribute":"owns","value":"Yes"},{"op":"discriminator_at_least","value":5}]},"value":"Dealer"}"#,
        )
        .unwrap();
        assert_eq!(rule, channel().rules[0]);
    }
}
