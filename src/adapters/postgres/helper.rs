use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query as PgQuery,
};
use uuid::Uuid;

use super::PostgresAdapter;
use crate::{
    attribute::EntityKind,
    entity::{ArchiveState, Entity},
    error::Error,
    mutate::AttributeMutation,
    query::{
        Comparison, Field, Link, OrderBy, Predicate, Scalar, Side, View,
        vector::{Metric, VectorScore},
    },
};

/// A positional parameter, bound after the SQL text is built.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Bind {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(Value),
    Bools(Vec<bool>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Texts(Vec<String>),
    Timestamps(Vec<DateTime<Utc>>),
}

/// Embeds an identifier-like key as a SQL string literal (quote doubling).
pub(super) fn quote_literal(key: &str) -> String {
    format!("'{}'", key.replace('\'', "''"))
}

/// Escapes LIKE wildcards so the operand matches literally under `ESCAPE '\'`.
pub(super) fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Wraps a value as `{"key": value}` for use with the `@>` GIN operator.
pub(super) fn make_eq_json(key: &str, value: Value) -> Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Casts the text of an attribute to `view`, or NULL when the stored text
/// would not cast. Postgres may evaluate a qual before the sibling type
/// check that precedes it, so a bare cast can fail on another type's row.
fn guarded_cast(alias: &str, key: &str, view: View) -> String {
    let raw = format!("({}.attributes->>{})", alias, quote_literal(key));
    match view {
        View::Text => raw,
        View::Boolean => format!(
            "(CASE WHEN lower(btrim({r})) IN ('true', 'false') THEN btrim({r})::boolean END)",
            r = raw
        ),
        View::Integer => format!(
            "(CASE WHEN {r} ~ '^[[:space:]]*-?[0-9]{{1,18}}([.]0*)?[[:space:]]*$' THEN {r}::numeric::bigint END)",
            r = raw
        ),
        View::Double => format!(
            "(CASE WHEN {r} ~ '^[[:space:]]*[-+]?([0-9]+([.][0-9]*)?|[.][0-9]+)([eE][-+]?[0-9]+)?[[:space:]]*$' \
             THEN {r}::double precision END)",
            r = raw
        ),
        View::Timestamp => format!(
            "(CASE WHEN jsonb_typeof({a}.attributes->{k}) = 'string' \
             AND {r} ~ '^[[:space:]]*[0-9]{{4}}-[0-9]{{2}}-[0-9]{{2}}' THEN {r}::timestamptz END)",
            a = alias,
            k = quote_literal(key),
            r = raw
        ),
    }
}

fn field_expr(alias: &str, field: &Field) -> String {
    match field {
        Field::Column(crate::query::Column::ElementalId) => format!("{}.elemental_id::text", alias),
        Field::Column(column) => format!("{}.{}", alias, column.name()),
        Field::Attribute { key, view } => guarded_cast(alias, key, *view),
    }
}

fn is_double(field: &Field) -> bool {
    matches!(
        field,
        Field::Attribute {
            view: View::Double,
            ..
        }
    )
}

fn scalar_bind(field: &Field, scalar: &Scalar) -> Bind {
    match scalar {
        Scalar::Int(i) if is_double(field) => Bind::Float(*i as f64),
        Scalar::Bool(b) => Bind::Bool(*b),
        Scalar::Int(i) => Bind::Int(*i),
        Scalar::Float(f) => Bind::Float(*f),
        Scalar::Text(s) => Bind::Text(s.clone()),
        Scalar::Timestamp(t) => Bind::Timestamp(*t),
        Scalar::List(items) => list_bind(field, items),
    }
}

fn list_bind(field: &Field, items: &[Scalar]) -> Bind {
    match items.first() {
        Some(Scalar::Bool(_)) => Bind::Bools(
            items
                .iter()
                .filter_map(|s| if let Scalar::Bool(b) = s { Some(*b) } else { None })
                .collect(),
        ),
        Some(Scalar::Int(_) | Scalar::Float(_)) if is_double(field) => Bind::Floats(
            items
                .iter()
                .filter_map(|s| match s {
                    Scalar::Int(i) => Some(*i as f64),
                    Scalar::Float(f) => Some(*f),
                    _ => None,
                })
                .collect(),
        ),
        Some(Scalar::Int(_)) => Bind::Ints(
            items
                .iter()
                .filter_map(|s| if let Scalar::Int(i) = s { Some(*i) } else { None })
                .collect(),
        ),
        Some(Scalar::Float(_)) => Bind::Floats(
            items
                .iter()
                .filter_map(|s| if let Scalar::Float(f) = s { Some(*f) } else { None })
                .collect(),
        ),
        Some(Scalar::Timestamp(_)) => Bind::Timestamps(
            items
                .iter()
                .filter_map(|s| if let Scalar::Timestamp(t) = s { Some(*t) } else { None })
                .collect(),
        ),
        _ => Bind::Texts(
            items
                .iter()
                .filter_map(|s| if let Scalar::Text(t) = s { Some(t.clone()) } else { None })
                .collect(),
        ),
    }
}

fn vector_literal(center: &[f64]) -> String {
    let parts: Vec<String> = center.iter().map(f64::to_string).collect();
    format!("[{}]", parts.join(","))
}

/// Renders predicates to SQL, stacking sub-select aliases and collecting binds.
#[derive(Debug, Default)]
pub(super) struct SqlBuilder {
    binds: Vec<Bind>,
    aliases: usize,
}

impl SqlBuilder {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn bind(&mut self, bind: Bind) -> String {
        self.binds.push(bind);
        format!("${}", self.binds.len())
    }

    fn alias(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        format!("{}{}", prefix, self.aliases)
    }

    pub(super) fn into_binds(self) -> Vec<Bind> {
        self.binds
    }

    pub(super) fn predicate(&mut self, predicate: &Predicate, alias: &str, kind: EntityKind) -> String {
        match predicate {
            Predicate::Always => "TRUE".to_string(),
            Predicate::Never => "FALSE".to_string(),
            Predicate::And(parts) => self.join(parts, alias, kind, " AND ", "TRUE"),
            Predicate::Or(parts) => self.join(parts, alias, kind, " OR ", "FALSE"),
            Predicate::Not(inner) => format!("(NOT {})", self.predicate(inner, alias, kind)),
            Predicate::Compare {
                field,
                comparison,
                operand,
            } => self.compare(alias, field, *comparison, operand),
            Predicate::IsNull { field, is_null } => match field {
                Field::Column(column) => format!(
                    "{}.{} IS {}NULL",
                    alias,
                    column.name(),
                    if *is_null { "" } else { "NOT " }
                ),
                Field::Attribute { key, .. } => {
                    let lit = quote_literal(key);
                    if *is_null {
                        format!(
                            "(NOT ({a}.attributes ? {k}) OR jsonb_typeof({a}.attributes->{k}) = 'null')",
                            a = alias,
                            k = lit
                        )
                    } else {
                        format!(
                            "({a}.attributes ? {k} AND jsonb_typeof({a}.attributes->{k}) <> 'null')",
                            a = alias,
                            k = lit
                        )
                    }
                }
            },
            Predicate::WithinRadius {
                key,
                center,
                radius_km,
            } => {
                let lit = quote_literal(key);
                let lon = self.bind(Bind::Float(center.lon));
                let lat = self.bind(Bind::Float(center.lat));
                let meters = self.bind(Bind::Float(radius_km * 1000.0));
                format!(
                    "(CASE WHEN jsonb_typeof({a}.attributes->{k}) = 'array' THEN ST_DWithin(\
                     ST_SetSRID(ST_MakePoint(({a}.attributes->{k}->>0)::float8, ({a}.attributes->{k}->>1)::float8), 4326)::geography, \
                     ST_SetSRID(ST_MakePoint({lon}, {lat}), 4326)::geography, {meters}) ELSE FALSE END)",
                    a = alias,
                    k = lit,
                )
            }
            Predicate::VectorDistance { score, lower, upper } => {
                let mut bounds = Vec::new();
                // every bound parameter must appear in the statement
                let cosine = score.metric == Metric::Cosine;
                let expr = if cosine || lower.is_some() || upper.is_some() {
                    self.vector_score(alias, score)
                } else {
                    String::new()
                };
                // pgvector scores a zero vector as NaN under cosine
                if cosine {
                    bounds.push(format!("{e} IS NOT NULL AND {e} <> 'NaN'::float8", e = expr));
                }
                if let Some(low) = lower {
                    bounds.push(format!("{} >= {}", expr, self.bind(Bind::Float(*low))));
                }
                if let Some(high) = upper {
                    bounds.push(format!("{} <= {}", expr, self.bind(Bind::Float(*high))));
                }
                let bounds = if bounds.is_empty() {
                    "TRUE".to_string()
                } else {
                    bounds.join(" AND ")
                };
                format!(
                    "(CASE WHEN jsonb_typeof({a}.attributes->{k}) = 'array' THEN \
                     (CASE WHEN jsonb_array_length({a}.attributes->{k}) = {d} THEN {bounds} ELSE FALSE END) \
                     ELSE FALSE END)",
                    a = alias,
                    k = quote_literal(&score.key),
                    d = score.dimensions,
                )
            }
            Predicate::IdIn(ids) => {
                let param = self.bind(Bind::Ints(ids.clone()));
                format!("{}.id = ANY({})", alias, param)
            }
            Predicate::Subset {
                entity_type,
                predicate,
            } => {
                let sub = self.alias("s");
                let type_param = self.bind(Bind::Int(*entity_type));
                let inner = self.predicate(predicate, &sub, kind);
                format!(
                    "{a}.id IN (SELECT {s}.id FROM {t} {s} WHERE {s}.type = {p} AND {inner})",
                    a = alias,
                    s = sub,
                    t = kind.table_name(),
                    p = type_param,
                )
            }
            Predicate::Related {
                relation,
                predicate,
            } => {
                let sub = self.alias("s");
                let inner = self.predicate(predicate, &sub, relation.related);
                let related = relation.related.table_name();
                match relation.link {
                    Link::MediaForeignKey {
                        localization: Side::Related,
                    } => format!(
                        "{a}.id IN (SELECT {s}.media FROM {t} {s} WHERE {s}.media IS NOT NULL AND {inner})",
                        a = alias,
                        s = sub,
                        t = related,
                    ),
                    Link::MediaForeignKey {
                        localization: Side::Primary,
                    } => format!(
                        "{a}.media IN (SELECT {s}.id FROM {t} {s} WHERE {inner})",
                        a = alias,
                        s = sub,
                        t = related,
                    ),
                    Link::StateMedia { state: Side::Related } => {
                        let j = self.alias("j");
                        format!(
                            "{a}.id IN (SELECT {j}.media FROM state_media {j} JOIN {t} {s} ON {s}.id = {j}.state WHERE {inner})",
                            a = alias,
                            s = sub,
                            t = related,
                        )
                    }
                    Link::StateMedia { state: Side::Primary } => {
                        let j = self.alias("j");
                        format!(
                            "{a}.id IN (SELECT {j}.state FROM state_media {j} JOIN {t} {s} ON {s}.id = {j}.media WHERE {inner})",
                            a = alias,
                            s = sub,
                            t = related,
                        )
                    }
                }
            }
        }
    }

    fn join(&mut self, parts: &[Predicate], alias: &str, kind: EntityKind, op: &str, empty: &str) -> String {
        if parts.is_empty() {
            return empty.to_string();
        }
        let rendered: Vec<String> = parts.iter().map(|p| self.predicate(p, alias, kind)).collect();
        format!("({})", rendered.join(op))
    }

    fn compare(&mut self, alias: &str, field: &Field, comparison: Comparison, operand: &Scalar) -> String {
        // GIN jsonb_path_ops @> path for text equality
        if let (Field::Attribute { key, view: View::Text }, Comparison::Eq, Scalar::Text(text)) =
            (field, comparison, operand)
        {
            let param = self.bind(Bind::Json(make_eq_json(key, Value::String(text.clone()))));
            return format!("{}.attributes @> {}", alias, param);
        }
        let lhs = field_expr(alias, field);
        let condition = match comparison {
            Comparison::Eq | Comparison::Lt | Comparison::Lte | Comparison::Gt | Comparison::Gte => {
                let op = match comparison {
                    Comparison::Eq => "=",
                    Comparison::Lt => "<",
                    Comparison::Lte => "<=",
                    Comparison::Gt => ">",
                    _ => ">=",
                };
                let param = self.bind(scalar_bind(field, operand));
                format!("{} {} {}", lhs, op, param)
            }
            Comparison::In => match operand {
                Scalar::List(items) if items.is_empty() => return "FALSE".to_string(),
                _ => {
                    let param = self.bind(scalar_bind(field, operand));
                    format!("{} = ANY({})", lhs, param)
                }
            },
            Comparison::Contains | Comparison::IContains | Comparison::IStartsWith | Comparison::IEndsWith => {
                let text = match operand {
                    Scalar::Text(t) => escape_like(t),
                    _ => String::new(),
                };
                let param = self.bind(Bind::Text(text));
                let (like, pattern) = match comparison {
                    Comparison::Contains => ("LIKE", format!("'%' || {} || '%'", param)),
                    Comparison::IContains => ("ILIKE", format!("'%' || {} || '%'", param)),
                    Comparison::IStartsWith => ("ILIKE", format!("{} || '%'", param)),
                    _ => ("ILIKE", format!("'%' || {}", param)),
                };
                format!("{} {} {} ESCAPE '\\'", lhs, like, pattern)
            }
            Comparison::IExact => {
                let param = self.bind(scalar_bind(field, operand));
                format!("lower({}) = lower({})", lhs, param)
            }
        };
        format!("COALESCE(({}), FALSE)", condition)
    }

    fn vector_score(&mut self, alias: &str, score: &VectorScore) -> String {
        let center = self.bind(Bind::Text(vector_literal(&score.center)));
        let stored = format!(
            "({}.attributes->>{})::vector({})",
            alias,
            quote_literal(&score.key),
            score.dimensions
        );
        match score.metric {
            Metric::L2Norm => format!("({} <-> {}::vector)", stored, center),
            Metric::Cosine => format!("({} <=> {}::vector)", stored, center),
            Metric::InnerProduct => format!("(({} <#> {}::vector) * -1)", stored, center),
        }
    }

    /// `ORDER BY` with missing values last and primary key as tie-breaker.
    pub(super) fn order_clause(&mut self, order: &[OrderBy], alias: &str) -> String {
        let mut terms: Vec<String> = order
            .iter()
            .map(|o| match o {
                OrderBy::Field { field, descending } => format!(
                    "{} {} NULLS LAST",
                    field_expr(alias, field),
                    if *descending { "DESC" } else { "ASC" }
                ),
                OrderBy::Vector { score, descending } => format!(
                    "{} {} NULLS LAST",
                    self.vector_score(alias, score),
                    if *descending { "DESC" } else { "ASC" }
                ),
            })
            .collect();
        terms.push(format!("{}.id ASC", alias));
        format!("ORDER BY {}", terms.join(", "))
    }

    /// `UPDATE ... RETURNING id` for one mutation against rows matching `scope`.
    pub(super) fn mutation(&mut self, kind: EntityKind, scope: &Predicate, mutation: &AttributeMutation) -> String {
        let table = kind.table_name();
        let scope = self.predicate(scope, "e", kind);
        let (set, guard) = match mutation {
            AttributeMutation::Patch {
                key,
                value,
                create_if_missing,
            } => {
                let lit = quote_literal(key);
                let param = self.bind(Bind::Json(value.clone()));
                let guard = if *create_if_missing {
                    "TRUE".to_string()
                } else {
                    format!("e.attributes ? {}", lit)
                };
                (
                    format!("jsonb_set(e.attributes, ARRAY[{}], {}::jsonb, true)", lit, param),
                    guard,
                )
            }
            AttributeMutation::Rename {
                from,
                to,
                create_if_missing,
            } => {
                let (from, to) = (quote_literal(from), quote_literal(to));
                let mut guard = format!("e.attributes ? {}", from);
                if !create_if_missing {
                    guard.push_str(&format!(" AND e.attributes ? {}", to));
                }
                (
                    format!(
                        "jsonb_set(e.attributes - {f}, ARRAY[{t}], e.attributes -> {f}, true)",
                        f = from,
                        t = to
                    ),
                    guard,
                )
            }
            AttributeMutation::Delete { key } => {
                let lit = quote_literal(key);
                (format!("e.attributes - {}", lit), format!("e.attributes ? {}", lit))
            }
        };
        format!(
            r#"
            UPDATE public.{table} AS e
            SET attributes = {set}, modified_datetime = now()
            WHERE {scope} AND {guard}
            RETURNING e.id
            "#
        )
    }
}

/// Column list shared by every read path; `media` is folded to an array.
pub(super) fn select_columns(kind: EntityKind, alias: &str) -> String {
    let media = match kind {
        EntityKind::Localization => format!(
            "CASE WHEN {a}.media IS NULL THEN ARRAY[]::bigint[] ELSE ARRAY[{a}.media] END",
            a = alias
        ),
        EntityKind::State => format!(
            "ARRAY(SELECT sm.media FROM state_media sm WHERE sm.state = {}.id ORDER BY sm.media)",
            alias
        ),
        _ => "ARRAY[]::bigint[]".to_string(),
    };
    format!(
        "{a}.id, {a}.project, {a}.type, {a}.name, {a}.created_datetime, {a}.modified_datetime, \
         {a}.archive_state, {a}.elemental_id, {a}.section, {a}.frame, {media} AS media, {a}.attributes",
        a = alias
    )
}

impl PostgresAdapter {
    pub(super) fn query_bind_all<'a>(
        mut query: PgQuery<'a, Postgres, PgArguments>,
        binds: Vec<Bind>,
    ) -> PgQuery<'a, Postgres, PgArguments> {
        for bind in binds {
            query = match bind {
                Bind::Bool(b) => query.bind(b),
                Bind::Int(i) => query.bind(i),
                Bind::Float(f) => query.bind(f),
                Bind::Text(s) => query.bind(s),
                Bind::Timestamp(t) => query.bind(t),
                Bind::Json(v) => query.bind(v),
                Bind::Bools(v) => query.bind(v),
                Bind::Ints(v) => query.bind(v),
                Bind::Floats(v) => query.bind(v),
                Bind::Texts(v) => query.bind(v),
                Bind::Timestamps(v) => query.bind(v),
            };
        }
        query
    }

    pub(super) fn map_row_to_entity(row: PgRow, kind: EntityKind) -> Result<Entity, Error> {
        let de = |e: sqlx::Error| Error::Deserialize(e.to_string());
        let archive_state: String = row.try_get("archive_state").map_err(de)?;
        Ok(Entity {
            id: row.try_get::<i64, _>("id").map_err(de)?,
            project: row.try_get::<i64, _>("project").map_err(de)?,
            kind,
            entity_type: row.try_get::<i64, _>("type").map_err(de)?,
            name: row.try_get::<String, _>("name").map_err(de)?,
            created_datetime: row.try_get("created_datetime").map_err(de)?,
            modified_datetime: row.try_get("modified_datetime").map_err(de)?,
            archive_state: ArchiveState::parse(&archive_state)
                .ok_or_else(|| Error::Deserialize(format!("unknown archive state '{}'", archive_state)))?,
            elemental_id: row.try_get::<Uuid, _>("elemental_id").map_err(de)?,
            section: row.try_get::<Option<i64>, _>("section").map_err(de)?,
            frame: row.try_get::<Option<i64>, _>("frame").map_err(de)?,
            media: row.try_get::<Vec<i64>, _>("media").map_err(de)?,
            attributes: match row.try_get::<Value, _>("attributes").map_err(de)? {
                Value::Object(map) => map,
                other => {
                    return Err(Error::Deserialize(format!("attributes is not an object: {}", other)));
                }
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::GeoPos;
    use crate::query::{Column, Relation};
    use serde_json::json;

    #[test]
    fn literals_and_like_patterns_are_escaped() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(escape_like(r"50%_off\"), r"50\%\_off\\");
    }

    #[test]
    fn text_equality_uses_containment() {
        let mut sql = SqlBuilder::new();
        let predicate = Predicate::compare(
            Field::Attribute {
                key: "Species".into(),
                view: View::Text,
            },
            Comparison::Eq,
            Scalar::Text("Tuna".into()),
        );
        assert_eq!(sql.predicate(&predicate, "e", EntityKind::Localization), "e.attributes @> $1");
        assert_eq!(sql.into_binds(), vec![Bind::Json(json!({"Species": "Tuna"}))]);
    }

    #[test]
    fn typed_views_cast_and_coalesce() {
        let mut sql = SqlBuilder::new();
        let predicate = Predicate::all([
            Predicate::compare(
                Field::Attribute {
                    key: "Length".into(),
                    view: View::Double,
                },
                Comparison::Gt,
                Scalar::Int(2),
            ),
            Predicate::compare(Field::Column(Column::Name), Comparison::IContains, Scalar::Text("b_t".into())),
        ]);
        let rendered = sql.predicate(&predicate, "e", EntityKind::Localization);
        let length = guarded_cast("e", "Length", View::Double);
        assert_eq!(
            rendered,
            format!(
                "(COALESCE(({} > $1), FALSE) AND COALESCE((e.name ILIKE '%' || $2 || '%' ESCAPE '\\'), FALSE))",
                length
            )
        );
        assert_eq!(sql.into_binds(), vec![Bind::Float(2.0), Bind::Text(r"b\_t".into())]);
    }

    #[test]
    fn attribute_casts_are_guarded() {
        let int = guarded_cast("s1", "Length", View::Integer);
        assert!(int.starts_with("(CASE WHEN (s1.attributes->>'Length') ~ '^"));
        assert!(int.ends_with("THEN (s1.attributes->>'Length')::numeric::bigint END)"));
        let double = guarded_cast("e", "Length", View::Double);
        assert!(double.contains("THEN (e.attributes->>'Length')::double precision END"));
        assert!(guarded_cast("e", "Seen", View::Timestamp).contains("jsonb_typeof(e.attributes->'Seen') = 'string'"));
        assert!(guarded_cast("e", "Ok", View::Boolean).contains("IN ('true', 'false')"));
        assert_eq!(guarded_cast("e", "Note", View::Text), "(e.attributes->>'Note')");

        let mut sql = SqlBuilder::new();
        let subset = Predicate::Subset {
            entity_type: 2,
            predicate: Box::new(Predicate::compare(
                Field::Attribute {
                    key: "Length".into(),
                    view: View::Integer,
                },
                Comparison::Gt,
                Scalar::Int(3),
            )),
        };
        let rendered = sql.predicate(&subset, "e", EntityKind::Localization);
        assert!(!rendered.contains("(s1.attributes->>'Length')::bigint"));
        assert!(rendered.contains(&format!("COALESCE(({} > $2), FALSE)", int)));
    }

    #[test]
    fn cosine_distance_excludes_undefined_scores() {
        let score = |metric| VectorScore {
            key: "Embedding".into(),
            center: vec![1.0, 0.0, 0.0],
            dimensions: 3,
            metric,
        };
        let mut sql = SqlBuilder::new();
        let cosine = Predicate::VectorDistance {
            score: score(Metric::Cosine),
            lower: None,
            upper: None,
        };
        let rendered = sql.predicate(&cosine, "e", EntityKind::Localization);
        assert!(rendered.contains("<=> $1::vector) IS NOT NULL AND"));
        assert!(rendered.contains("<> 'NaN'::float8"));
        assert_eq!(sql.into_binds(), vec![Bind::Text("[1,0,0]".into())]);

        let mut sql = SqlBuilder::new();
        let l2 = Predicate::VectorDistance {
            score: score(Metric::L2Norm),
            lower: None,
            upper: None,
        };
        let rendered = sql.predicate(&l2, "e", EntityKind::Localization);
        assert!(rendered.contains("THEN TRUE ELSE FALSE END"));
        assert!(sql.into_binds().is_empty());
    }

    #[test]
    fn subsets_and_relations_render_sub_selects() {
        let mut sql = SqlBuilder::new();
        let predicate = Predicate::any([
            Predicate::Subset {
                entity_type: 4,
                predicate: Box::new(Predicate::column_eq(Column::Frame, Scalar::Int(1))),
            },
            Predicate::Related {
                relation: Relation::between(EntityKind::Media, EntityKind::State).unwrap(),
                predicate: Box::new(Predicate::WithinRadius {
                    key: "Where".into(),
                    center: GeoPos::new(1.0, 2.0),
                    radius_km: 3.0,
                }),
            },
        ]);
        let rendered = sql.predicate(&predicate, "e", EntityKind::Media);
        assert!(rendered.contains("e.id IN (SELECT s1.id FROM media s1 WHERE s1.type = $1 AND"));
        assert!(rendered.contains("SELECT j3.media FROM state_media j3 JOIN state s2 ON s2.id = j3.state"));
        assert!(rendered.contains("ST_DWithin"));
        let binds = sql.into_binds();
        assert_eq!(binds.len(), 5);
        assert_eq!(binds[4], Bind::Float(3000.0));
    }

    #[test]
    fn mutations_guard_on_key_presence() {
        let mut sql = SqlBuilder::new();
        let rename = AttributeMutation::Rename {
            from: "Old".into(),
            to: "New".into(),
            create_if_missing: false,
        };
        let rendered = sql.mutation(EntityKind::Media, &Predicate::IdIn(vec![1]), &rename);
        assert!(rendered.contains("jsonb_set(e.attributes - 'Old', ARRAY['New'], e.attributes -> 'Old', true)"));
        assert!(rendered.contains("e.attributes ? 'Old' AND e.attributes ? 'New'"));
        assert!(rendered.contains("RETURNING e.id"));
    }
}
