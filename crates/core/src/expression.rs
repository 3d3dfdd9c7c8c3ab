//! Boolean match expressions over source features.
//!
//! Profiles describe which features they want with a small closed AST
//! instead of opaque callbacks, so the engine can print, simplify, and
//! evaluate filters cheaply. `evaluate` records which attribute keys
//! participated in a match, which lets callers copy exactly the matched
//! keys into the output feature.

use crate::feature::AttrValue;
use crate::profile::GeometryKind;
use crate::source::SourceFeature;

/// A boolean expression over one source feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    /// Field equals any of the listed values (string compare)
    MatchAny(String, Vec<String>),
    /// Field is present with any non-empty value
    MatchField(String),
    MatchSource(Vec<String>),
    MatchSourceLayer(Vec<String>),
    MatchGeometryType(GeometryKind),
    Const(bool),
}

/// Shorthand constructors in the fluent style profiles use.
impl Expression {
    pub fn and(children: Vec<Expression>) -> Self {
        Expression::And(children)
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Expression::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Expression) -> Self {
        Expression::Not(Box::new(child))
    }

    pub fn match_any(field: &str, values: &[&str]) -> Self {
        Expression::MatchAny(
            field.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        )
    }

    pub fn match_field(field: &str) -> Self {
        Expression::MatchField(field.to_string())
    }

    /// Evaluate against a feature, appending the attribute keys that took
    /// part in a successful match to `matched_keys`.
    pub fn evaluate(&self, input: &SourceFeature, matched_keys: &mut Vec<String>) -> bool {
        match self {
            Expression::And(children) => children.iter().all(|c| c.evaluate(input, matched_keys)),
            Expression::Or(children) => {
                // no short-circuit so every matching branch records its keys
                let mut any = false;
                for child in children {
                    any |= child.evaluate(input, matched_keys);
                }
                any
            }
            Expression::Not(child) => !child.evaluate(input, &mut Vec::new()),
            Expression::MatchAny(field, values) => {
                let matched = input.attrs.get(field).is_some_and(|v| {
                    let text = attr_to_string(v);
                    values.iter().any(|want| *want == text)
                });
                if matched {
                    matched_keys.push(field.clone());
                }
                matched
            }
            Expression::MatchField(field) => {
                let matched = input
                    .attrs
                    .get(field)
                    .is_some_and(|v| !matches!(v, AttrValue::String(s) if s.is_empty()));
                if matched {
                    matched_keys.push(field.clone());
                }
                matched
            }
            Expression::MatchSource(names) => names.iter().any(|n| *n == input.source),
            Expression::MatchSourceLayer(names) => input
                .source_layer
                .as_ref()
                .is_some_and(|layer| names.iter().any(|n| n == layer)),
            Expression::MatchGeometryType(kind) => geometry_matches(&input.geometry, *kind),
            Expression::Const(value) => *value,
        }
    }

    /// Structurally simplify: constant folding, flattening, double-negation,
    /// De Morgan push-down, and absorption. Runs to a fixed point.
    pub fn simplify(self) -> Expression {
        let mut current = self;
        loop {
            let next = simplify_once(current.clone());
            if next == current {
                return next;
            }
            current = next;
        }
    }
}

fn attr_to_string(value: &AttrValue) -> String {
    match value {
        AttrValue::String(s) => s.clone(),
        AttrValue::Long(v) => v.to_string(),
        AttrValue::Double(v) => v.to_string(),
        AttrValue::Bool(v) => v.to_string(),
    }
}

fn geometry_matches(geometry: &geo::Geometry<f64>, kind: GeometryKind) -> bool {
    use geo::Geometry::*;
    match kind {
        GeometryKind::Point | GeometryKind::Centroid | GeometryKind::PointOnSurface => {
            matches!(geometry, Point(_) | MultiPoint(_))
        }
        GeometryKind::Line => matches!(geometry, LineString(_) | MultiLineString(_) | Line(_)),
        GeometryKind::Polygon => matches!(geometry, Polygon(_) | MultiPolygon(_) | Rect(_)),
    }
}

fn simplify_once(expression: Expression) -> Expression {
    match expression {
        Expression::And(children) => {
            // flatten nested ands, drop TRUE, fold FALSE
            let mut flat = Vec::new();
            for child in children {
                match child.simplify() {
                    Expression::Const(false) => return Expression::Const(false),
                    Expression::Const(true) => {}
                    Expression::And(nested) => flat.extend(nested),
                    other => flat.push(other),
                }
            }
            flat.dedup();
            match flat.len() {
                0 => Expression::Const(true),
                1 => flat.into_iter().next().expect("one child"),
                _ => Expression::And(flat),
            }
        }
        Expression::Or(children) => {
            let mut flat = Vec::new();
            for child in children {
                match child.simplify() {
                    Expression::Const(true) => return Expression::Const(true),
                    Expression::Const(false) => {}
                    Expression::Or(nested) => flat.extend(nested),
                    other => flat.push(other),
                }
            }
            flat.dedup();
            // absorption: a or (a and b) = a
            let singles: Vec<Expression> = flat
                .iter()
                .filter(|e| !matches!(e, Expression::And(_)))
                .cloned()
                .collect();
            flat.retain(|e| match e {
                Expression::And(parts) => !parts.iter().any(|p| singles.contains(p)),
                _ => true,
            });
            match flat.len() {
                0 => Expression::Const(false),
                1 => flat.into_iter().next().expect("one child"),
                _ => Expression::Or(flat),
            }
        }
        Expression::Not(child) => match child.simplify() {
            Expression::Const(value) => Expression::Const(!value),
            Expression::Not(inner) => *inner,
            // De Morgan: push negation down so and/or folding sees it
            Expression::And(children) => {
                Expression::Or(children.into_iter().map(Expression::not).collect())
            }
            Expression::Or(children) => {
                Expression::And(children.into_iter().map(Expression::not).collect())
            }
            other => Expression::Not(Box::new(other)),
        },
        leaf => leaf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, polygon, Geometry};

    fn feature() -> SourceFeature {
        SourceFeature::new("osm", 1, Geometry::Point(point!(x: 0.0, y: 0.0)))
            .with_attr("natural", AttrValue::String("water".to_string()))
            .with_attr("name", AttrValue::String("Lake".to_string()))
            .with_source_layer("lakes")
    }

    #[test]
    fn test_match_any_records_matched_key() {
        let expr = Expression::match_any("natural", &["water", "bay"]);
        let mut keys = Vec::new();
        assert!(expr.evaluate(&feature(), &mut keys));
        assert_eq!(keys, vec!["natural"]);

        let miss = Expression::match_any("natural", &["wood"]);
        keys.clear();
        assert!(!miss.evaluate(&feature(), &mut keys));
        assert!(keys.is_empty());
    }

    #[test]
    fn test_match_field_requires_non_empty() {
        let mut keys = Vec::new();
        assert!(Expression::match_field("name").evaluate(&feature(), &mut keys));

        let mut empty = feature();
        empty
            .attrs
            .insert("name".to_string(), AttrValue::String(String::new()));
        assert!(!Expression::match_field("name").evaluate(&empty, &mut keys));
    }

    #[test]
    fn test_match_source_and_layer() {
        let mut keys = Vec::new();
        assert!(Expression::MatchSource(vec!["osm".to_string()]).evaluate(&feature(), &mut keys));
        assert!(!Expression::MatchSource(vec!["ne".to_string()]).evaluate(&feature(), &mut keys));
        assert!(Expression::MatchSourceLayer(vec!["lakes".to_string()])
            .evaluate(&feature(), &mut keys));
    }

    #[test]
    fn test_match_geometry_type() {
        let mut keys = Vec::new();
        assert!(Expression::MatchGeometryType(GeometryKind::Point).evaluate(&feature(), &mut keys));

        let poly = SourceFeature::new(
            "osm",
            2,
            Geometry::Polygon(polygon![(x: 0., y: 0.), (x: 1., y: 0.), (x: 1., y: 1.)]),
        );
        assert!(Expression::MatchGeometryType(GeometryKind::Polygon).evaluate(&poly, &mut keys));
        assert!(!Expression::MatchGeometryType(GeometryKind::Line).evaluate(&poly, &mut keys));
    }

    #[test]
    fn test_constant_folding() {
        let expr = Expression::and(vec![
            Expression::Const(true),
            Expression::match_field("name"),
        ]);
        assert_eq!(expr.simplify(), Expression::match_field("name"));

        let expr = Expression::and(vec![
            Expression::Const(false),
            Expression::match_field("name"),
        ]);
        assert_eq!(expr.simplify(), Expression::Const(false));

        let expr = Expression::or(vec![
            Expression::Const(true),
            Expression::match_field("name"),
        ]);
        assert_eq!(expr.simplify(), Expression::Const(true));
    }

    #[test]
    fn test_empty_connectives_fold_to_identity() {
        assert_eq!(Expression::and(vec![]).simplify(), Expression::Const(true));
        assert_eq!(Expression::or(vec![]).simplify(), Expression::Const(false));
    }

    #[test]
    fn test_double_negation() {
        let expr = Expression::not(Expression::not(Expression::match_field("name")));
        assert_eq!(expr.simplify(), Expression::match_field("name"));
    }

    #[test]
    fn test_de_morgan_pushes_not_inward() {
        let expr = Expression::not(Expression::and(vec![
            Expression::match_field("a"),
            Expression::match_field("b"),
        ]));
        assert_eq!(
            expr.simplify(),
            Expression::or(vec![
                Expression::not(Expression::match_field("a")),
                Expression::not(Expression::match_field("b")),
            ])
        );
    }

    #[test]
    fn test_absorption() {
        let a = Expression::match_field("a");
        let expr = Expression::or(vec![
            a.clone(),
            Expression::and(vec![a.clone(), Expression::match_field("b")]),
        ]);
        assert_eq!(expr.simplify(), a);
    }

    #[test]
    fn test_nested_connectives_flatten() {
        let expr = Expression::and(vec![
            Expression::and(vec![
                Expression::match_field("a"),
                Expression::match_field("b"),
            ]),
            Expression::match_field("c"),
        ]);
        assert_eq!(
            expr.simplify(),
            Expression::and(vec![
                Expression::match_field("a"),
                Expression::match_field("b"),
                Expression::match_field("c"),
            ])
        );
    }

    #[test]
    fn test_simplified_expression_evaluates_identically() {
        let expr = Expression::not(Expression::and(vec![
            Expression::match_any("natural", &["water"]),
            Expression::not(Expression::match_field("name")),
        ]));
        let simplified = expr.clone().simplify();
        let f = feature();
        assert_eq!(
            expr.evaluate(&f, &mut Vec::new()),
            simplified.evaluate(&f, &mut Vec::new())
        );
    }
}
