use oxigraph::io::RdfFormat;
use oxigraph::model::{NamedNode, Triple};
use wdsync::{GraphStore, GraphTransaction, OxigraphStore};

const WD: &str = "http://www.wikidata.org/entity/";

const DOUGLAS: &str = r#"
@prefix wd: <http://www.wikidata.org/entity/> .
@prefix wdt: <http://www.wikidata.org/prop/direct/> .
@prefix p: <http://www.wikidata.org/prop/> .
@prefix psv: <http://www.wikidata.org/prop/statement/value/> .
@prefix pr: <http://www.wikidata.org/prop/reference/> .
@prefix prv: <http://www.wikidata.org/prop/reference/value/> .
@prefix s: <http://www.wikidata.org/entity/statement/> .
@prefix v: <http://www.wikidata.org/value/> .
@prefix ref: <http://www.wikidata.org/reference/> .
@prefix wikibase: <http://wikiba.se/ontology#> .
@prefix prov: <http://www.w3.org/ns/prov#> .
@prefix schema: <http://schema.org/> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .

wd:Q42 wdt:P31 wd:Q5 ;
    p:P569 s:Q42-birth .

s:Q42-birth wikibase:rank wikibase:NormalRank ;
    psv:P569 v:birth ;
    prov:wasDerivedFrom ref:r1 .

v:birth a wikibase:TimeValue ;
    wikibase:timeValue "1952-03-11T00:00:00Z"^^xsd:dateTime .

ref:r1 prv:P813 v:retrieved ;
    pr:P854 <http://example.org/source> .

v:retrieved a wikibase:TimeValue ;
    wikibase:timeValue "2013-12-07T00:00:00Z"^^xsd:dateTime .

<https://en.wikipedia.org/wiki/Douglas_Adams> schema:about wd:Q42 ;
    schema:isPartOf <https://en.wikipedia.org/> ;
    schema:name "Douglas Adams"@en .

<https://en.wikipedia.org/> wikibase:wikiGroup "wikipedia" ;
    schema:name "English Wikipedia" .

wd:Q1 wdt:P31 wd:Q5 .
v:other a wikibase:TimeValue ;
    wikibase:timeValue "2000-01-01T00:00:00Z"^^xsd:dateTime .
"#;

fn store() -> OxigraphStore {
    let store = OxigraphStore::in_memory(WD).unwrap();
    store
        .store()
        .load_from_reader(RdfFormat::Turtle, DOUGLAS.as_bytes())
        .unwrap();
    store
}

fn iri(s: &str) -> NamedNode {
    NamedNode::new(s).unwrap()
}

#[test]
fn entity_statements_follow_statement_value_and_reference_nodes() {
    let store = store();
    let statements = store.current_statements("Q42").unwrap();
    assert_eq!(statements.len(), 15);

    let subjects: Vec<String> = statements.iter().map(|t| t.subject.to_string()).collect();
    assert!(subjects.contains(&"<http://www.wikidata.org/value/birth>".to_string()));
    assert!(subjects.contains(&"<http://www.wikidata.org/value/retrieved>".to_string()));
    assert!(subjects.contains(&"<http://www.wikidata.org/reference/r1>".to_string()));
    assert!(!subjects.contains(&"<http://www.wikidata.org/value/other>".to_string()));
    assert!(!subjects.contains(&"<http://www.wikidata.org/entity/Q1>".to_string()));
}

#[test]
fn sitelinks_bring_only_the_wiki_group_of_their_site() {
    let store = store();
    let statements = store.current_statements("Q42").unwrap();
    let site: Vec<&Triple> = statements
        .iter()
        .filter(|t| t.subject.to_string() == "<https://en.wikipedia.org/>")
        .collect();
    assert_eq!(site.len(), 1);
    assert_eq!(site[0].predicate.as_str(), "http://wikiba.se/ontology#wikiGroup");
}

#[test]
fn unknown_entity_has_no_statements() {
    let store = store();
    assert!(store.current_statements("Q999").unwrap().is_empty());
}

#[test]
fn transaction_applies_removals_and_insertions() {
    let store = store();
    let before = store.len().unwrap();
    let old = Triple::new(
        iri("http://www.wikidata.org/entity/Q1"),
        iri("http://www.wikidata.org/prop/direct/P31"),
        iri("http://www.wikidata.org/entity/Q5"),
    );
    let new = Triple::new(
        iri("http://www.wikidata.org/entity/Q1"),
        iri("http://www.wikidata.org/prop/direct/P31"),
        iri("http://www.wikidata.org/entity/Q6"),
    );

    let mut tx = store.begin().unwrap();
    tx.delete_data(&[old.clone()]).unwrap();
    tx.insert_data(&[new.clone()]).unwrap();
    // nothing is visible before the commit
    assert!(store.current_statements("Q1").unwrap().contains(&old));
    tx.commit().unwrap();

    let q1 = store.current_statements("Q1").unwrap();
    assert!(q1.contains(&new));
    assert!(!q1.contains(&old));
    assert_eq!(store.len().unwrap(), before);
}

#[test]
fn removing_an_absent_statement_is_harmless() {
    let store = store();
    let before = store.len().unwrap();
    let ghost = Triple::new(
        iri("http://www.wikidata.org/entity/Q7"),
        iri("http://www.wikidata.org/prop/direct/P31"),
        iri("http://www.wikidata.org/entity/Q5"),
    );
    let mut tx = store.begin().unwrap();
    tx.delete_data(&[ghost]).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.len().unwrap(), before);
}
