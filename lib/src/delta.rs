//! Statement-level reconciliation of one entity.
//!
//! Given the statements the store currently holds for an entity and the
//! statements of its fresh document, [`reconcile`] produces the minimal
//! add/remove sets. Numeric literals compare by value within an epsilon so
//! that `"5"^^xsd:integer` and `"5.0"^^xsd:double` are not churned; statements
//! involving blank nodes are never matched and are always re-added.

use crate::consts::{TYPE, UNTRACKED_PREDICATES, UNTRACKED_TYPES, XSD_NUMERIC};
use anyhow::{Context, Result};
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::{NamedOrBlankNode, Term, Triple};
use std::collections::HashSet;

pub const DEFAULT_EPSILON: f64 = 1e-13;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_add: HashSet<Triple>,
    pub to_remove: HashSet<Triple>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Union of the deltas of a round.
#[derive(Debug, Clone, Default)]
pub struct DeltaBatch {
    pub to_add: HashSet<Triple>,
    pub to_remove: HashSet<Triple>,
}

impl DeltaBatch {
    pub fn merge(&mut self, delta: Delta) {
        self.to_add.extend(delta.to_add);
        self.to_remove.extend(delta.to_remove);
    }

    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn clear(&mut self) {
        self.to_add.clear();
        self.to_remove.clear();
    }
}

impl FromIterator<Delta> for DeltaBatch {
    fn from_iter<I: IntoIterator<Item = Delta>>(iter: I) -> Self {
        let mut batch = DeltaBatch::default();
        for delta in iter {
            batch.merge(delta);
        }
        batch
    }
}

pub fn has_blank_node(triple: &Triple) -> bool {
    matches!(triple.subject, NamedOrBlankNode::BlankNode(_))
        || matches!(triple.object, Term::BlankNode(_))
}

/// Value of a literal with a numeric XSD datatype.
pub fn numeric_value(term: &Term) -> Option<f64> {
    match term {
        Term::Literal(l) if XSD_NUMERIC.contains(&l.datatype().as_str()) => {
            l.value().trim().parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Two numeric literals are equivalent when their values differ by less
/// than `epsilon`. Anything non-numeric on either side never matches here.
pub fn numerically_equal(a: &Term, b: &Term, epsilon: f64) -> bool {
    match (numeric_value(a), numeric_value(b)) {
        (Some(x), Some(y)) => (x - y).abs() < epsilon,
        _ => false,
    }
}

/// Structural equality of two statements, tolerant on numeric objects.
pub fn same_statement(a: &Triple, b: &Triple, epsilon: f64) -> bool {
    a.subject == b.subject
        && a.predicate == b.predicate
        && (a.object == b.object || numerically_equal(&a.object, &b.object, epsilon))
}

/// Computes the statements to add and remove to turn `current` into `new`.
///
/// Every statement of `current` matching a (non blank node) statement of
/// `new` is consumed, including several tolerant matches of one new value;
/// whatever remains is removed. New statements that matched nothing are
/// added.
pub fn reconcile(mut current: HashSet<Triple>, mut new: HashSet<Triple>, epsilon: f64) -> Delta {
    new.retain(|stmt| {
        if has_blank_node(stmt) {
            return true;
        }
        let mut matched = current.remove(stmt);
        if numeric_value(&stmt.object).is_some() {
            let before = current.len();
            current.retain(|c| !same_statement(c, stmt, epsilon));
            matched |= current.len() != before;
        }
        !matched
    });
    Delta {
        to_add: new,
        to_remove: current,
    }
}

/// Whether a statement of an entity document belongs in the store.
pub fn is_tracked(triple: &Triple) -> bool {
    let predicate = triple.predicate.as_ref();
    if UNTRACKED_PREDICATES.contains(&predicate) {
        return false;
    }
    if predicate == TYPE {
        if let Term::NamedNode(class) = &triple.object {
            return !UNTRACKED_TYPES.contains(&class.as_ref());
        }
    }
    true
}

/// Parses a Turtle entity document into its tracked statements.
pub fn parse_entity_document(bytes: &[u8], base_iri: &str) -> Result<HashSet<Triple>> {
    let parser = RdfParser::from_format(RdfFormat::Turtle)
        .with_base_iri(base_iri)
        .with_context(|| format!("Invalid base IRI {}", base_iri))?;
    let mut statements = HashSet::new();
    for quad in parser.for_reader(bytes) {
        let quad = quad.with_context(|| format!("Failed to parse document of {}", base_iri))?;
        let triple = Triple::new(quad.subject, quad.predicate, quad.object);
        if is_tracked(&triple) {
            statements.insert(triple);
        }
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::{BlankNode, Literal, NamedNode};

    const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

    fn node(s: &str) -> NamedNode {
        NamedNode::new(format!("http://www.wikidata.org/entity/{s}")).unwrap()
    }

    fn typed(value: &str, dt: &str) -> Term {
        Literal::new_typed_literal(value, NamedNode::new(format!("{XSD}{dt}")).unwrap()).into()
    }

    fn stmt(s: &str, p: &str, o: Term) -> Triple {
        Triple::new(node(s), node(p), o)
    }

    fn set(items: &[Triple]) -> HashSet<Triple> {
        items.iter().cloned().collect()
    }

    #[test]
    fn unchanged_statements_produce_empty_delta() {
        let a = stmt("Q1", "P1", node("Q2").into());
        let b = stmt("Q1", "P2", Literal::new_simple_literal("x").into());
        let d = reconcile(set(&[a.clone(), b.clone()]), set(&[a, b]), DEFAULT_EPSILON);
        assert!(d.is_empty());
    }

    #[test]
    fn numeric_tolerance() {
        let old = stmt("Q1", "P1", typed("5", "integer"));
        let new = stmt("Q1", "P1", typed("5.0", "double"));
        let d = reconcile(set(&[old.clone()]), set(&[new.clone()]), DEFAULT_EPSILON);
        assert!(d.is_empty());

        let moved = stmt("Q1", "P1", typed("5.1", "double"));
        let d = reconcile(set(&[old.clone()]), set(&[moved.clone()]), DEFAULT_EPSILON);
        assert_eq!(d.to_add, set(&[moved]));
        assert_eq!(d.to_remove, set(&[old]));
    }

    #[test]
    fn difference_of_exactly_epsilon_is_a_change() {
        let old = stmt("Q1", "P1", typed("5", "integer"));
        let new = stmt("Q1", "P1", typed("6", "integer"));
        let d = reconcile(set(&[old.clone()]), set(&[new.clone()]), 1.0);
        assert_eq!(d.to_add, set(&[new.clone()]));
        assert_eq!(d.to_remove, set(&[old.clone()]));

        let d = reconcile(set(&[old]), set(&[new]), 1.5);
        assert!(d.is_empty());
    }

    #[test]
    fn one_value_consumes_every_tolerant_match() {
        let a = stmt("Q1", "P1", typed("7", "integer"));
        let b = stmt("Q1", "P1", typed("7.0", "decimal"));
        let new = stmt("Q1", "P1", typed("7.0", "double"));
        let d = reconcile(set(&[a, b]), set(&[new]), DEFAULT_EPSILON);
        assert!(d.is_empty());
    }

    #[test]
    fn numeric_never_matches_plain_string() {
        let old = stmt("Q1", "P1", Literal::new_simple_literal("5").into());
        let new = stmt("Q1", "P1", typed("5", "integer"));
        let d = reconcile(set(&[old.clone()]), set(&[new.clone()]), DEFAULT_EPSILON);
        assert_eq!(d.to_add, set(&[new]));
        assert_eq!(d.to_remove, set(&[old]));
    }

    #[test]
    fn blank_node_statements_are_always_added() {
        let bnode = BlankNode::new("b0").unwrap();
        let s = Triple::new(node("Q1"), node("P1"), bnode);
        let d = reconcile(set(&[s.clone()]), set(&[s.clone()]), DEFAULT_EPSILON);
        assert_eq!(d.to_add, set(&[s.clone()]));
        assert_eq!(d.to_remove, set(&[s]));
    }

    #[test]
    fn missing_document_side() {
        let a = stmt("Q1", "P1", node("Q2").into());
        let d = reconcile(HashSet::new(), set(&[a.clone()]), DEFAULT_EPSILON);
        assert_eq!(d.to_add, set(&[a.clone()]));
        let d = reconcile(set(&[a.clone()]), HashSet::new(), DEFAULT_EPSILON);
        assert_eq!(d.to_remove, set(&[a]));
    }

    #[test]
    fn document_filter() {
        let doc = br#"
@prefix wd: <http://www.wikidata.org/entity/> .
@prefix wdt: <http://www.wikidata.org/prop/direct/> .
@prefix wikibase: <http://wikiba.se/ontology#> .
@prefix schema: <http://schema.org/> .
@prefix skos: <http://www.w3.org/2004/02/skos/core#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .

wd:Q42 a wikibase:Item ;
    rdfs:label "Douglas Adams"@en ;
    skos:prefLabel "Douglas Adams"@en ;
    schema:name "Douglas Adams"@en ;
    wikibase:statements "300"^^<http://www.w3.org/2001/XMLSchema#integer> ;
    wdt:P31 wd:Q5 .
"#;
        let stmts = parse_entity_document(
            doc,
            "https://www.wikidata.org/wiki/Special:EntityData/Q42",
        )
        .unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts.iter().all(is_tracked));
        assert!(parse_entity_document(b"this is not turtle", "http://x/").is_err());
    }
}
