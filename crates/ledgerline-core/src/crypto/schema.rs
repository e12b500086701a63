//! Which event fields hold personal data.
//!
//! The table is declared statically by each bounded context and validated
//! once at start-up; encryption never inspects payloads to discover fields.

use std::collections::{HashMap, HashSet};

use crate::error::DomainError;

/// Event name → personal-data field names.
#[derive(Debug, Clone, Default)]
pub struct PersonalDataSchema {
    fields: HashMap<&'static str, &'static [&'static str]>,
}

impl PersonalDataSchema {
    /// Builds a schema from `(event_name, fields)` entries.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an empty event or field name, an
    /// entry without fields, a repeated field, or a repeated event name.
    pub fn new(entries: &[(&'static str, &'static [&'static str])]) -> Result<Self, DomainError> {
        let mut schema = Self::default();
        for &(event_name, fields) in entries {
            schema.insert(event_name, fields)?;
        }
        Ok(schema)
    }

    fn insert(
        &mut self,
        event_name: &'static str,
        fields: &'static [&'static str],
    ) -> Result<(), DomainError> {
        if event_name.trim().is_empty() {
            return Err(DomainError::Validation(
                "personal data schema entry has an empty event name".into(),
            ));
        }
        if fields.is_empty() {
            return Err(DomainError::Validation(format!(
                "personal data schema entry for {event_name} lists no fields"
            )));
        }
        let mut seen = HashSet::new();
        for field in fields {
            if field.trim().is_empty() || !seen.insert(*field) {
                return Err(DomainError::Validation(format!(
                    "personal data schema entry for {event_name} has an empty or repeated field"
                )));
            }
        }
        if self.fields.insert(event_name, fields).is_some() {
            return Err(DomainError::Validation(format!(
                "personal data schema declares {event_name} twice"
            )));
        }
        Ok(())
    }

    /// Combines the schemas of several bounded contexts.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if both declare the same event.
    pub fn merge(mut self, other: &Self) -> Result<Self, DomainError> {
        for (&event_name, &fields) in &other.fields {
            self.insert(event_name, fields)?;
        }
        Ok(self)
    }

    /// Checks every declared event against the event names the decoders know.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the first unknown event.
    pub fn validate_against(&self, known_event_names: &[&str]) -> Result<(), DomainError> {
        let mut declared: Vec<&str> = self.fields.keys().copied().collect();
        declared.sort_unstable();
        match declared
            .into_iter()
            .find(|name| !known_event_names.contains(name))
        {
            Some(unknown) => Err(DomainError::Validation(format!(
                "personal data schema names unknown event {unknown}"
            ))),
            None => Ok(()),
        }
    }

    /// Personal-data fields of `event_name`; empty if it has none.
    #[must_use]
    pub fn fields_for(&self, event_name: &str) -> &'static [&'static str] {
        self.fields.get(event_name).copied().unwrap_or(&[])
    }

    /// Whether `event_name` carries personal data.
    #[must_use]
    pub fn is_personal(&self, event_name: &str) -> bool {
        self.fields.contains_key(event_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMBER_FIELDS: &[&str] = &["email", "display_name"];
    const X: &[&str] = &["x"];
    const Y: &[&str] = &["y"];
    const X_TWICE: &[&str] = &["x", "x"];

    #[test]
    fn test_fields_for_returns_declared_fields() {
        let schema = PersonalDataSchema::new(&[("member.registered", MEMBER_FIELDS)]).unwrap();

        assert_eq!(schema.fields_for("member.registered"), MEMBER_FIELDS);
        assert!(schema.fields_for("category.created").is_empty());
        assert!(schema.is_personal("member.registered"));
    }

    #[test]
    fn test_new_rejects_duplicate_event() {
        let result = PersonalDataSchema::new(&[("a", X), ("a", Y)]);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_new_rejects_repeated_field() {
        let result = PersonalDataSchema::new(&[("a", X_TWICE)]);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_validate_against_rejects_unknown_event() {
        let schema = PersonalDataSchema::new(&[("member.registred", X)]).unwrap();

        let result = schema.validate_against(&["member.registered"]);

        match result {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("member.registred")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_combines_contexts() {
        let a = PersonalDataSchema::new(&[("a", X)]).unwrap();
        let b = PersonalDataSchema::new(&[("b", Y)]).unwrap();

        let merged = a.merge(&b).unwrap();

        assert!(merged.is_personal("a"));
        assert!(merged.is_personal("b"));
    }
}
