//! The downstream triple store.
//!
//! [`GraphStore`] reads the statements currently held for an entity and opens
//! transactions; [`SparqlStore`] speaks the SPARQL 1.1 protocol to a remote
//! endpoint and [`OxigraphStore`] keeps everything in an embedded Oxigraph
//! store. Both expand an entity the same way: its own statements, the
//! statement nodes hanging off it (with their time, quantity and coordinate
//! values and their references), and the sitelinks pointing at it.

use crate::consts::{
    SCHEMA_ABOUT, TIME_VALUE, TYPE, VALUE_NODE_TYPES, WAS_DERIVED_FROM, WIKIBASE_RANK,
    WIKIBASE_WIKI_GROUP,
};
use crate::options::StoreAccess;
use anyhow::{anyhow, Context, Result};
use log::{debug, trace};
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::{
    GraphName, GraphNameRef, NamedNode, NamedNodeRef, NamedOrBlankNode, NamedOrBlankNodeRef,
    QuadRef, Term, Triple,
};
use oxigraph::store::{StorageError, Store};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Buffered writes against a store. Nothing is visible before
/// [`GraphTransaction::commit`].
pub trait GraphTransaction {
    fn delete_data(&mut self, triples: &[Triple]) -> Result<()>;
    fn insert_data(&mut self, triples: &[Triple]) -> Result<()>;
    fn commit(self: Box<Self>) -> Result<()>;
}

pub trait GraphStore: Send + Sync {
    /// Statements the store holds for the entity `<prefix><entity_id>`.
    fn current_statements(&self, entity_id: &str) -> Result<HashSet<Triple>>;

    fn begin(&self) -> Result<Box<dyn GraphTransaction + '_>>;
}

/// Optionally serializes every store operation behind one lock.
#[derive(Debug, Default)]
pub struct StoreGate {
    lock: Option<Mutex<()>>,
}

impl StoreGate {
    pub fn new(access: StoreAccess) -> Self {
        Self {
            lock: access.is_serialized().then(|| Mutex::new(())),
        }
    }

    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.lock {
            Some(lock) => {
                let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
                f()
            }
            None => f(),
        }
    }
}

/// Statements of the entity, of its statement nodes and of the value and
/// reference nodes below them.
pub fn entity_query(entity_iri: &str) -> String {
    format!(
        r#"PREFIX wikibase: <http://wikiba.se/ontology#>
PREFIX prov: <http://www.w3.org/ns/prov#>
CONSTRUCT {{ ?s ?p ?o }} WHERE {{
  {{ BIND(<{e}> AS ?s) <{e}> ?p ?o . }}
  UNION {{ <{e}> ?sp ?s . ?s wikibase:rank ?rank . ?s ?p ?o . }}
  UNION {{
    <{e}> ?sp ?st . ?st wikibase:rank ?rank . ?st ?vp ?s .
    ?s a ?vt . VALUES ?vt {{ wikibase:TimeValue wikibase:QuantityValue wikibase:GlobecoordinateValue }}
    ?s ?p ?o .
  }}
  UNION {{ <{e}> ?sp ?st . ?st wikibase:rank ?rank . ?st prov:wasDerivedFrom ?s . ?s ?p ?o . }}
  UNION {{
    <{e}> ?sp ?st . ?st wikibase:rank ?rank . ?st prov:wasDerivedFrom ?ref .
    ?ref ?rp ?s . ?s a wikibase:TimeValue . ?s ?p ?o .
  }}
}}"#,
        e = entity_iri
    )
}

/// Sitelinks about the entity and the wiki group of the sites they link to.
pub fn sitelink_query(entity_iri: &str) -> String {
    format!(
        r#"PREFIX wikibase: <http://wikiba.se/ontology#>
PREFIX schema: <http://schema.org/>
CONSTRUCT {{ ?s ?p ?o }} WHERE {{
  {{ ?s schema:about <{e}> . ?s ?p ?o . }}
  UNION {{
    ?link schema:about <{e}> . ?link ?lp ?s . ?s wikibase:wikiGroup ?o .
    BIND(wikibase:wikiGroup AS ?p)
  }}
}}"#,
        e = entity_iri
    )
}

fn variable_name(label: &str) -> String {
    let clean: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("?b_{}", clean)
}

fn subject_pattern(subject: &NamedOrBlankNode) -> String {
    match subject {
        NamedOrBlankNode::BlankNode(b) => variable_name(b.as_str()),
        other => other.to_string(),
    }
}

fn object_pattern(object: &Term) -> String {
    match object {
        Term::BlankNode(b) => variable_name(b.as_str()),
        other => other.to_string(),
    }
}

pub fn insert_data_update(triples: &[Triple]) -> String {
    let mut update = String::from("INSERT DATA {\n");
    for t in triples {
        update.push_str(&format!("  {} .\n", t));
    }
    update.push('}');
    update
}

/// Ground statements go into one `DELETE DATA`; statements with blank nodes
/// cannot be named and become one pattern delete each, with the blank nodes
/// turned into variables that only bind blank nodes.
pub fn delete_data_updates(triples: &[Triple]) -> Vec<String> {
    let (blank, ground): (Vec<&Triple>, Vec<&Triple>) = triples
        .iter()
        .partition(|t| crate::delta::has_blank_node(t));
    let mut updates = Vec::new();
    if !ground.is_empty() {
        let mut update = String::from("DELETE DATA {\n");
        for t in ground {
            update.push_str(&format!("  {} .\n", t));
        }
        update.push('}');
        updates.push(update);
    }
    for t in blank {
        let pattern = format!(
            "{} {} {}",
            subject_pattern(&t.subject),
            t.predicate,
            object_pattern(&t.object)
        );
        let mut filters = String::new();
        if let NamedOrBlankNode::BlankNode(b) = &t.subject {
            filters.push_str(&format!(" FILTER(isBlank({}))", variable_name(b.as_str())));
        }
        if let Term::BlankNode(b) = &t.object {
            filters.push_str(&format!(" FILTER(isBlank({}))", variable_name(b.as_str())));
        }
        updates.push(format!(
            "DELETE {{ {p} . }} WHERE {{ {p} .{f} }}",
            p = pattern,
            f = filters
        ));
    }
    updates
}

/// A store behind the SPARQL 1.1 protocol.
pub struct SparqlStore {
    client: Client,
    query_endpoint: String,
    update_endpoint: String,
    entity_iri_prefix: String,
}

impl SparqlStore {
    pub fn new(
        query_endpoint: impl Into<String>,
        update_endpoint: Option<String>,
        entity_iri_prefix: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let query_endpoint = query_endpoint.into();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            update_endpoint: update_endpoint.unwrap_or_else(|| query_endpoint.clone()),
            query_endpoint,
            entity_iri_prefix: entity_iri_prefix.into(),
        })
    }

    /// Runs a CONSTRUCT query and parses the returned graph.
    pub fn construct(&self, query: &str) -> Result<Vec<Triple>> {
        trace!("{}", query);
        let resp = self
            .client
            .post(&self.query_endpoint)
            .header(ACCEPT, "application/n-triples, text/turtle;q=0.9")
            .form(&[("query", query)])
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(anyhow!("query failed with {}: {}", status, body));
        }
        let format = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .and_then(|ct| RdfFormat::from_media_type(ct.trim()))
            .unwrap_or(RdfFormat::NTriples);
        let bytes = resp.bytes()?;
        let mut triples = Vec::new();
        for quad in RdfParser::from_format(format).for_reader(bytes.as_ref()) {
            let quad = quad?;
            triples.push(Triple::new(quad.subject, quad.predicate, quad.object));
        }
        Ok(triples)
    }

    pub fn update(&self, update: &str) -> Result<()> {
        trace!("{}", update);
        let resp = self
            .client
            .post(&self.update_endpoint)
            .form(&[("update", update)])
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(anyhow!("update failed with {}: {}", status, body));
        }
        Ok(())
    }
}

impl GraphStore for SparqlStore {
    fn current_statements(&self, entity_id: &str) -> Result<HashSet<Triple>> {
        let iri = format!("{}{}", self.entity_iri_prefix, entity_id);
        let mut statements = HashSet::new();
        for query in [entity_query(&iri), sitelink_query(&iri)] {
            let triples = self
                .construct(&query)
                .with_context(|| format!("Can't read {}, last query:\n{}", entity_id, query))?;
            statements.extend(triples);
        }
        Ok(statements)
    }

    fn begin(&self) -> Result<Box<dyn GraphTransaction + '_>> {
        Ok(Box::new(SparqlTransaction {
            store: self,
            operations: Vec::new(),
        }))
    }
}

/// Collects update operations and sends them as one request, which the
/// endpoint executes atomically.
pub struct SparqlTransaction<'a> {
    store: &'a SparqlStore,
    operations: Vec<String>,
}

impl GraphTransaction for SparqlTransaction<'_> {
    fn delete_data(&mut self, triples: &[Triple]) -> Result<()> {
        if !triples.is_empty() {
            self.operations.extend(delete_data_updates(triples));
        }
        Ok(())
    }

    fn insert_data(&mut self, triples: &[Triple]) -> Result<()> {
        if !triples.is_empty() {
            self.operations.push(insert_data_update(triples));
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if self.operations.is_empty() {
            return Ok(());
        }
        let update = self.operations.join(" ;\n");
        self.store
            .update(&update)
            .with_context(|| format!("Transaction failed, last update:\n{}", update))
    }
}

/// An embedded Oxigraph store; entity statements live in the default graph.
pub struct OxigraphStore {
    store: Store,
    entity_iri_prefix: String,
}

impl OxigraphStore {
    pub fn new(store: Store, entity_iri_prefix: impl Into<String>) -> Self {
        Self {
            store,
            entity_iri_prefix: entity_iri_prefix.into(),
        }
    }

    pub fn in_memory(entity_iri_prefix: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Store::new()?, entity_iri_prefix))
    }

    pub fn open(path: &Path, entity_iri_prefix: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Store::open(path)?, entity_iri_prefix))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.store.is_empty()?)
    }

    /// Loads triples directly, outside of any transaction.
    pub fn load(&self, triples: impl IntoIterator<Item = Triple>) -> Result<()> {
        let quads = triples
            .into_iter()
            .map(|t| Ok::<_, StorageError>(t.in_graph(GraphName::DefaultGraph)));
        let mut loader = self.store.bulk_loader();
        loader.load_ok_quads::<_, StorageError>(quads)?;
        loader.commit()?;
        Ok(())
    }

    fn triples_of(&self, subject: NamedOrBlankNodeRef<'_>) -> Result<Vec<Triple>> {
        let mut out = Vec::new();
        for quad in self.store.quads_for_pattern(
            Some(subject),
            None,
            None,
            Some(GraphNameRef::DefaultGraph),
        ) {
            let quad = quad?;
            out.push(Triple::new(quad.subject, quad.predicate, quad.object));
        }
        Ok(out)
    }

    fn subjects_of(
        &self,
        predicate: NamedNodeRef<'_>,
        object: NamedNodeRef<'_>,
    ) -> Result<Vec<NamedOrBlankNode>> {
        let mut out = Vec::new();
        for quad in self.store.quads_for_pattern(
            None,
            Some(predicate),
            Some(object.into()),
            Some(GraphNameRef::DefaultGraph),
        ) {
            out.push(quad?.subject);
        }
        Ok(out)
    }

    fn has(
        &self,
        subject: NamedOrBlankNodeRef<'_>,
        predicate: NamedNodeRef<'_>,
        object: Option<NamedNodeRef<'_>>,
    ) -> Result<bool> {
        let mut matches = self.store.quads_for_pattern(
            Some(subject),
            Some(predicate),
            object.map(|o| o.into()),
            Some(GraphNameRef::DefaultGraph),
        );
        match matches.next() {
            Some(q) => {
                q?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn has_type_in(
        &self,
        node: NamedOrBlankNodeRef<'_>,
        types: &[NamedNodeRef<'_>],
    ) -> Result<bool> {
        for ty in types {
            if self.has(node, TYPE, Some(*ty))? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn as_node(term: &Term) -> Option<NamedOrBlankNode> {
    match term {
        Term::NamedNode(n) => Some(n.clone().into()),
        Term::BlankNode(b) => Some(b.clone().into()),
        _ => None,
    }
}

impl GraphStore for OxigraphStore {
    fn current_statements(&self, entity_id: &str) -> Result<HashSet<Triple>> {
        let iri = NamedNode::new(format!("{}{}", self.entity_iri_prefix, entity_id))
            .with_context(|| format!("Invalid entity id {}", entity_id))?;
        let entity: NamedOrBlankNode = iri.clone().into();
        let mut statements = HashSet::new();

        for triple in self.triples_of(entity.as_ref())? {
            if let Some(st) = as_node(&triple.object) {
                if self.has(st.as_ref(), WIKIBASE_RANK, None)? {
                    for inner in self.triples_of(st.as_ref())? {
                        if let Some(value) = as_node(&inner.object) {
                            if self.has_type_in(value.as_ref(), &VALUE_NODE_TYPES)? {
                                statements.extend(self.triples_of(value.as_ref())?);
                            }
                            if inner.predicate.as_ref() == WAS_DERIVED_FROM {
                                for reference in self.triples_of(value.as_ref())? {
                                    if let Some(rv) = as_node(&reference.object) {
                                        if self.has_type_in(rv.as_ref(), &[TIME_VALUE])? {
                                            statements.extend(self.triples_of(rv.as_ref())?);
                                        }
                                    }
                                    statements.insert(reference);
                                }
                            }
                        }
                        statements.insert(inner);
                    }
                }
            }
            statements.insert(triple);
        }

        for link in self.subjects_of(SCHEMA_ABOUT, iri.as_ref())? {
            for triple in self.triples_of(link.as_ref())? {
                if let Some(site) = as_node(&triple.object) {
                    for group in self.store.quads_for_pattern(
                        Some(site.as_ref()),
                        Some(WIKIBASE_WIKI_GROUP),
                        None,
                        Some(GraphNameRef::DefaultGraph),
                    ) {
                        let group = group?;
                        statements.insert(Triple::new(
                            group.subject,
                            group.predicate,
                            group.object,
                        ));
                    }
                }
                statements.insert(triple);
            }
        }
        debug!("{} holds {} statement(s)", entity_id, statements.len());
        Ok(statements)
    }

    fn begin(&self) -> Result<Box<dyn GraphTransaction + '_>> {
        Ok(Box::new(OxigraphTransaction {
            store: self,
            removals: Vec::new(),
            insertions: Vec::new(),
        }))
    }
}

pub struct OxigraphTransaction<'a> {
    store: &'a OxigraphStore,
    removals: Vec<Triple>,
    insertions: Vec<Triple>,
}

impl GraphTransaction for OxigraphTransaction<'_> {
    fn delete_data(&mut self, triples: &[Triple]) -> Result<()> {
        self.removals.extend_from_slice(triples);
        Ok(())
    }

    fn insert_data(&mut self, triples: &[Triple]) -> Result<()> {
        self.insertions.extend_from_slice(triples);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let OxigraphTransaction {
            store,
            removals,
            insertions,
        } = *self;
        for t in &removals {
            store.store.remove(QuadRef::new(
                &t.subject,
                &t.predicate,
                &t.object,
                GraphNameRef::DefaultGraph,
            ))?;
        }
        if !insertions.is_empty() {
            store.load(insertions)?;
        }
        Ok(())
    }
}
