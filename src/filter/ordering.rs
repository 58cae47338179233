use std::cmp::Ordering;

use sqlx::{Postgres, QueryBuilder};

use super::{FilterSet, Fields};

#[derive(Debug, Clone, Copy)]
pub struct OrderField {
    pub name: &'static str,
    pub column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTerm {
    pub field: &'static str,
    pub column: &'static str,
    pub descending: bool,
}

/// Requested sort order, restricted to a resource's allow-list.
///
/// The identifier is always appended as an ascending tiebreaker so paging
/// is stable across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    terms: Vec<OrderTerm>,
    tiebreak: OrderTerm,
}

impl OrderBy {
    /// Parses `ordering=name,-created`. Unknown terms are dropped; if none
    /// survive, the set's default ordering applies.
    pub fn parse(set: &FilterSet, raw: Option<&str>) -> Self {
        let mut terms: Vec<OrderTerm> = raw
            .unwrap_or_default()
            .split(',')
            .filter_map(|term| set.order_term(term.trim()))
            .collect();

        if terms.is_empty() {
            terms.extend(set.order_term(set.default_ordering));
        }

        Self {
            terms,
            tiebreak: OrderTerm {
                field: "id",
                column: set.id_column,
                descending: false,
            },
        }
    }

    pub fn terms(&self) -> &[OrderTerm] {
        &self.terms
    }

    /// Appends ` ORDER BY ...`. Postgres sorts NULLs last ascending and
    /// first descending, which [`OrderBy::compare`] mirrors.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" ORDER BY ");
        let mut separated = qb.separated(", ");
        for term in self.terms.iter().chain(std::iter::once(&self.tiebreak)) {
            separated.push(format!(
                "{} {}",
                term.column,
                if term.descending { "DESC" } else { "ASC" }
            ));
        }
    }

    pub fn compare<T: Fields + ?Sized>(&self, a: &T, b: &T) -> Ordering {
        self.terms
            .iter()
            .chain(std::iter::once(&self.tiebreak))
            .map(|term| {
                let ord = match (a.field(term.field), b.field(term.field)) {
                    (Some(x), Some(y)) => x.compare(&y).unwrap_or(Ordering::Equal),
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                };
                if term.descending {
                    ord.reverse()
                } else {
                    ord
                }
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}
