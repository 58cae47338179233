//! Query-parameter filtering.
//!
//! Each resource declares a [`FilterSet`]: the parameter names it accepts,
//! the lookups allowed on each, and the SQL column they map to. A request's
//! query string is parsed into a [`Predicate`], a conjunction of typed
//! [`Condition`]s that can be rendered into a `WHERE` clause or evaluated
//! directly against an in-memory row.

mod ordering;
mod sets;

use std::{cmp::Ordering, collections::HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Postgres, QueryBuilder};

use crate::validation::{add_error, FieldErrors};

pub use ordering::{OrderBy, OrderField, OrderTerm};
pub use sets::{FilterSet, HYDROPONICS, SENSOR_READINGS, USERS};

// ---------------------------------------------------------------------------
// Field descriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    Gte,
    Lte,
    IContains,
    IStartsWith,
    /// Inclusive lower bound of a timestamp range.
    After,
    /// Inclusive upper bound of a timestamp range.
    Before,
}

impl Lookup {
    /// Appended to the field name to form the query parameter.
    pub fn suffix(self) -> &'static str {
        match self {
            Lookup::Exact => "",
            Lookup::Gte => "__gte",
            Lookup::Lte => "__lte",
            Lookup::IContains => "__icontains",
            Lookup::IStartsWith => "__istartswith",
            Lookup::After => "_after",
            Lookup::Before => "_before",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Parameter base name, also the key passed to [`Fields::field`].
    pub name: &'static str,
    /// SQL expression, qualified by the table alias the store uses.
    pub column: &'static str,
    pub kind: FieldKind,
    pub lookups: &'static [Lookup],
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// `None` when the two values are of different kinds.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Integer(a), FieldValue::Integer(b)) => Some(a.cmp(b)),
            (FieldValue::Float(a), FieldValue::Float(b)) => Some(a.total_cmp(b)),
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Named field access for in-memory filtering and ordering.
///
/// Names match [`FieldSpec::name`] and [`OrderField::name`]; an absent
/// value (e.g. an unset measurement) is `None`.
pub trait Fields {
    fn field(&self, name: &str) -> Option<FieldValue>;
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: &'static str,
    pub column: &'static str,
    pub lookup: Lookup,
    pub value: FieldValue,
}

impl Condition {
    fn matches(&self, actual: Option<FieldValue>) -> bool {
        let Some(actual) = actual else {
            return false;
        };

        match (self.lookup, &actual, &self.value) {
            (Lookup::IContains, FieldValue::Text(a), FieldValue::Text(n)) => {
                a.to_lowercase().contains(&n.to_lowercase())
            }
            (Lookup::IStartsWith, FieldValue::Text(a), FieldValue::Text(n)) => {
                a.to_lowercase().starts_with(&n.to_lowercase())
            }
            (Lookup::IContains | Lookup::IStartsWith, _, _) => false,
            (Lookup::Exact, _, _) => actual.compare(&self.value) == Some(Ordering::Equal),
            (Lookup::Gte | Lookup::After, _, _) => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            (Lookup::Lte | Lookup::Before, _, _) => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Conjunction of conditions. Empty means "everything".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    /// Unknown parameters are ignored, as are empty values. A malformed
    /// value for a known parameter is reported against that parameter.
    pub fn parse(set: &FilterSet, params: &HashMap<String, String>) -> Result<Self, FieldErrors> {
        let mut conditions = Vec::new();
        let mut errors = FieldErrors::new();

        for spec in set.fields {
            for &lookup in spec.lookups {
                let param = format!("{}{}", spec.name, lookup.suffix());
                let Some(raw) = params.get(&param).filter(|v| !v.trim().is_empty()) else {
                    continue;
                };

                match parse_value(spec.kind, lookup, raw) {
                    Ok(value) => conditions.push(Condition {
                        field: spec.name,
                        column: spec.column,
                        lookup,
                        value,
                    }),
                    Err(message) => add_error(&mut errors, &param, message),
                }
            }
        }

        if errors.is_empty() {
            Ok(Self { conditions })
        } else {
            Err(errors)
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches<T: Fields + ?Sized>(&self, item: &T) -> bool {
        self.conditions
            .iter()
            .all(|c| c.matches(item.field(c.field)))
    }

    /// Appends ` AND <condition>` for every condition. The builder must
    /// already contain a `WHERE` clause (`WHERE TRUE` is fine).
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        for c in &self.conditions {
            qb.push(" AND ").push(c.column).push(match c.lookup {
                Lookup::Exact => " = ",
                Lookup::Gte | Lookup::After => " >= ",
                Lookup::Lte | Lookup::Before => " <= ",
                Lookup::IContains | Lookup::IStartsWith => " ILIKE ",
            });

            match (&c.value, c.lookup) {
                (FieldValue::Text(s), Lookup::IContains) => {
                    qb.push_bind(format!("%{}%", escape_like(s)))
                }
                (FieldValue::Text(s), Lookup::IStartsWith) => {
                    qb.push_bind(format!("{}%", escape_like(s)))
                }
                (FieldValue::Text(s), _) => qb.push_bind(s.clone()),
                (FieldValue::Integer(v), _) => qb.push_bind(*v),
                (FieldValue::Float(v), _) => qb.push_bind(*v),
                (FieldValue::Timestamp(v), _) => qb.push_bind(*v),
            };
        }
    }
}

fn parse_value(kind: FieldKind, lookup: Lookup, raw: &str) -> Result<FieldValue, &'static str> {
    let raw = raw.trim();
    match kind {
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| "Enter a whole number."),
        FieldKind::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(FieldValue::Float)
            .ok_or("Enter a number."),
        FieldKind::Text => Ok(FieldValue::Text(raw.to_owned())),
        FieldKind::Timestamp => parse_timestamp(raw, lookup)
            .map(FieldValue::Timestamp)
            .ok_or("Enter a valid date."),
    }
}

/// RFC 3339 timestamps are taken as-is. A bare `YYYY-MM-DD` date covers the
/// whole day: start of day for lower bounds, last microsecond for upper.
fn parse_timestamp(raw: &str, lookup: Lookup) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let naive = match lookup {
        Lookup::Before | Lookup::Lte => date.and_hms_micro_opt(23, 59, 59, 999_999)?,
        _ => date.and_hms_opt(0, 0, 0)?,
    };
    Some(naive.and_utc())
}

/// Escapes `LIKE` metacharacters using Postgres' default `\` escape.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct Row {
        id: i64,
        name: &'static str,
        ph: Option<f64>,
        created: DateTime<Utc>,
    }

    impl Fields for Row {
        fn field(&self, name: &str) -> Option<FieldValue> {
            match name {
                "id" => Some(FieldValue::Integer(self.id)),
                "name" | "hydroponics__name" => Some(FieldValue::Text(self.name.to_owned())),
                "ph" => self.ph.map(FieldValue::Float),
                "created" => Some(FieldValue::Timestamp(self.created)),
                _ => None,
            }
        }
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn row(id: i64, name: &'static str, ph: Option<f64>) -> Row {
        Row {
            id,
            name,
            ph,
            created: Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn unknown_and_empty_params_are_ignored() {
        let p = Predicate::parse(
            &HYDROPONICS,
            &params(&[("colour", "green"), ("name", ""), ("page", "2"), ("ordering", "-id")]),
        )
        .unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn parses_suffixes_into_lookups() {
        let p = Predicate::parse(
            &HYDROPONICS,
            &params(&[("id__gte", "3"), ("name__icontains", "Test"), ("owner__username", "bob")]),
        )
        .unwrap();

        let lookups: Vec<_> = p.conditions().iter().map(|c| (c.field, c.lookup)).collect();
        assert!(lookups.contains(&("id", Lookup::Gte)));
        assert!(lookups.contains(&("name", Lookup::IContains)));
        assert!(lookups.contains(&("owner__username", Lookup::Exact)));
        assert_eq!(lookups.len(), 3);
    }

    #[test]
    fn operators_not_in_the_set_are_ignored() {
        // Text fields have no ordering lookups; numeric fields have no text lookups.
        let p = Predicate::parse(
            &SENSOR_READINGS,
            &params(&[("hydroponics__name__gte", "a"), ("ph__icontains", "6")]),
        )
        .unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn malformed_values_are_field_errors() {
        let errors = Predicate::parse(
            &SENSOR_READINGS,
            &params(&[("id", "one"), ("ph__gte", "acid"), ("created_after", "yesterday")]),
        )
        .unwrap_err();

        assert_eq!(errors["id"], vec!["Enter a whole number."]);
        assert_eq!(errors["ph__gte"], vec!["Enter a number."]);
        assert_eq!(errors["created_after"], vec!["Enter a valid date."]);
    }

    #[test]
    fn icontains_is_case_insensitive() {
        let p = Predicate::parse(&HYDROPONICS, &params(&[("name__icontains", "test")])).unwrap();
        assert!(p.matches(&row(1, "My Test System", None)));
        assert!(p.matches(&row(2, "TESTING", None)));
        assert!(!p.matches(&row(3, "Production", None)));
    }

    #[test]
    fn istartswith_and_exact() {
        let p = Predicate::parse(&HYDROPONICS, &params(&[("name__istartswith", "sys")])).unwrap();
        assert!(p.matches(&row(1, "System 1", None)));
        assert!(!p.matches(&row(2, "My System", None)));

        let p = Predicate::parse(&HYDROPONICS, &params(&[("name", "System 1")])).unwrap();
        assert!(p.matches(&row(1, "System 1", None)));
        assert!(!p.matches(&row(2, "system 1", None)));
    }

    #[test]
    fn conditions_are_conjunctive() {
        let p = Predicate::parse(
            &SENSOR_READINGS,
            &params(&[("ph__gte", "6.0"), ("ph__lte", "7.0"), ("id__lte", "5")]),
        )
        .unwrap();

        assert!(p.matches(&row(1, "a", Some(6.5))));
        assert!(!p.matches(&row(9, "a", Some(6.5))));
        assert!(!p.matches(&row(1, "a", Some(7.5))));
    }

    #[test]
    fn absent_measurement_never_matches_a_numeric_filter() {
        let p = Predicate::parse(&SENSOR_READINGS, &params(&[("ph__gte", "0")])).unwrap();
        assert!(!p.matches(&row(1, "a", None)));
    }

    #[test]
    fn date_range_bounds_are_inclusive_whole_days() {
        let p = Predicate::parse(
            &SENSOR_READINGS,
            &params(&[("created_after", "2025-03-10"), ("created_before", "2025-03-10")]),
        )
        .unwrap();
        assert!(p.matches(&row(1, "a", None)));

        let p = Predicate::parse(&SENSOR_READINGS, &params(&[("created_before", "2025-03-09")]))
            .unwrap();
        assert!(!p.matches(&row(1, "a", None)));

        let p = Predicate::parse(
            &SENSOR_READINGS,
            &params(&[("created_after", "2025-03-10T12:00:01Z")]),
        )
        .unwrap();
        assert!(!p.matches(&row(1, "a", None)));
    }

    #[test]
    fn sql_rendering_binds_every_value() {
        let p = Predicate::parse(
            &HYDROPONICS,
            &params(&[("id__lte", "10"), ("name__icontains", "50%_off")]),
        )
        .unwrap();

        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM hydroponics h WHERE TRUE");
        p.push_sql(&mut qb);
        let sql = qb.sql();

        assert!(sql.contains("h.id <= $"));
        assert!(sql.contains("h.name ILIKE $"));
        assert!(!sql.contains("50%"));
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like(r"50%_off\"), r"50\%\_off\\");
    }
}
