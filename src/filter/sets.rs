use super::{FieldKind, FieldSpec, Lookup, OrderField, OrderTerm};

const IDENTIFIER: &[Lookup] = &[Lookup::Exact, Lookup::Gte, Lookup::Lte];
const TEXT: &[Lookup] = &[Lookup::Exact, Lookup::IContains, Lookup::IStartsWith];
const MEASUREMENT: &[Lookup] = &[Lookup::Exact, Lookup::Gte, Lookup::Lte];
const RANGE: &[Lookup] = &[Lookup::After, Lookup::Before];

/// Filterable and orderable fields of one resource.
///
/// Column expressions use the aliases of the store's queries:
/// `u` = users, `h` = hydroponics, `r` = sensor_reading.
#[derive(Debug)]
pub struct FilterSet {
    pub fields: &'static [FieldSpec],
    pub ordering: &'static [OrderField],
    pub default_ordering: &'static str,
    pub id_column: &'static str,
}

impl FilterSet {
    /// `name` or `-name` → term, if `name` is on the allow-list.
    pub fn order_term(&self, term: &str) -> Option<OrderTerm> {
        let (name, descending) = match term.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (term, false),
        };
        self.ordering
            .iter()
            .find(|f| f.name == name)
            .map(|f| OrderTerm {
                field: f.name,
                column: f.column,
                descending,
            })
    }
}

pub static USERS: FilterSet = FilterSet {
    fields: &[
        FieldSpec { name: "id", column: "u.id", kind: FieldKind::Integer, lookups: IDENTIFIER },
        FieldSpec { name: "username", column: "u.username", kind: FieldKind::Text, lookups: TEXT },
        FieldSpec {
            name: "date_joined",
            column: "u.date_joined",
            kind: FieldKind::Timestamp,
            lookups: RANGE,
        },
    ],
    ordering: &[
        OrderField { name: "id", column: "u.id" },
        OrderField { name: "date_joined", column: "u.date_joined" },
        OrderField { name: "username", column: "u.username" },
    ],
    default_ordering: "date_joined",
    id_column: "u.id",
};

pub static HYDROPONICS: FilterSet = FilterSet {
    fields: &[
        FieldSpec { name: "id", column: "h.id", kind: FieldKind::Integer, lookups: IDENTIFIER },
        FieldSpec { name: "name", column: "h.name", kind: FieldKind::Text, lookups: TEXT },
        FieldSpec {
            name: "owner__username",
            column: "u.username",
            kind: FieldKind::Text,
            lookups: TEXT,
        },
        FieldSpec {
            name: "created",
            column: "h.created",
            kind: FieldKind::Timestamp,
            lookups: RANGE,
        },
    ],
    ordering: &[
        OrderField { name: "id", column: "h.id" },
        OrderField { name: "created", column: "h.created" },
        OrderField { name: "name", column: "h.name" },
        OrderField { name: "owner", column: "h.owner_id" },
    ],
    default_ordering: "created",
    id_column: "h.id",
};

pub static SENSOR_READINGS: FilterSet = FilterSet {
    fields: &[
        FieldSpec { name: "id", column: "r.id", kind: FieldKind::Integer, lookups: IDENTIFIER },
        FieldSpec {
            name: "hydroponics__name",
            column: "h.name",
            kind: FieldKind::Text,
            lookups: TEXT,
        },
        FieldSpec { name: "ph", column: "r.ph", kind: FieldKind::Float, lookups: MEASUREMENT },
        FieldSpec {
            name: "temperature",
            column: "r.temperature",
            kind: FieldKind::Float,
            lookups: MEASUREMENT,
        },
        FieldSpec { name: "tds", column: "r.tds", kind: FieldKind::Float, lookups: MEASUREMENT },
        FieldSpec {
            name: "created",
            column: "r.created",
            kind: FieldKind::Timestamp,
            lookups: RANGE,
        },
    ],
    ordering: &[
        OrderField { name: "id", column: "r.id" },
        OrderField { name: "created", column: "r.created" },
        OrderField { name: "hydroponics", column: "r.hydroponics_id" },
        OrderField { name: "ph", column: "r.ph" },
        OrderField { name: "temperature", column: "r.temperature" },
        OrderField { name: "tds", column: "r.tds" },
    ],
    default_ordering: "created",
    id_column: "r.id",
};
