//! Defines constant NamedNodeRefs for the Wikidata/Wikibase vocabulary and the
//! default endpoints the updater talks to.

use oxigraph::model::NamedNodeRef;

pub const DEFAULT_CHANGE_API: &str = "https://www.wikidata.org/w/api.php";
pub const DEFAULT_ENTITY_SERVER: &str = "https://www.wikidata.org/wiki/Special:EntityData/";
pub const DEFAULT_ENTITY_IRI_PREFIX: &str = "http://www.wikidata.org/entity/";
pub const DEFAULT_SPARQL_ENDPOINT: &str = "http://127.0.0.1:1234/api/endpoint/sparql";
pub const DEFAULT_USER_AGENT: &str = concat!("wdsync/", env!("CARGO_PKG_VERSION"));

pub const TYPE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");

// wikibase
pub const WIKIBASE_RANK: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#rank");
pub const WIKIBASE_STATEMENT: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#Statement");
pub const WIKIBASE_ITEM: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#Item");
pub const WIKIBASE_REFERENCE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#Reference");
pub const WIKIBASE_STATEMENTS: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#statements");
pub const WIKIBASE_SITELINKS: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#sitelinks");
pub const WIKIBASE_IDENTIFIERS: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#identifiers");
pub const WIKIBASE_WIKI_GROUP: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#wikiGroup");
pub const TIME_VALUE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#TimeValue");
pub const QUANTITY_VALUE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#QuantityValue");
pub const GLOBECOORDINATE_VALUE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://wikiba.se/ontology#GlobecoordinateValue");
// prov
pub const WAS_DERIVED_FROM: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/prov#wasDerivedFrom");
// schema.org
pub const SCHEMA_ABOUT: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("http://schema.org/about");
pub const SCHEMA_NAME: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("http://schema.org/name");
pub const SCHEMA_VERSION: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://schema.org/version");
pub const SCHEMA_SOFTWARE_VERSION: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://schema.org/softwareVersion");
// skos / cc
pub const SKOS_PREF_LABEL: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2004/02/skos/core#prefLabel");
pub const CC_LICENSE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://creativecommons.org/ns#license");

/// Predicates of entity documents the downstream store never holds.
pub const UNTRACKED_PREDICATES: [NamedNodeRef<'_>; 8] = [
    SKOS_PREF_LABEL,
    SCHEMA_NAME,
    SCHEMA_VERSION,
    SCHEMA_SOFTWARE_VERSION,
    WIKIBASE_STATEMENTS,
    WIKIBASE_SITELINKS,
    WIKIBASE_IDENTIFIERS,
    CC_LICENSE,
];

/// `rdf:type` objects of entity documents the downstream store never holds.
pub const UNTRACKED_TYPES: [NamedNodeRef<'_>; 3] =
    [WIKIBASE_STATEMENT, WIKIBASE_ITEM, WIKIBASE_REFERENCE];

/// Value node classes whose properties are expanded below statement nodes.
pub const VALUE_NODE_TYPES: [NamedNodeRef<'_>; 3] =
    [TIME_VALUE, QUANTITY_VALUE, GLOBECOORDINATE_VALUE];

// xsd numeric datatypes
pub const XSD_NUMERIC: [&str; 16] = [
    "http://www.w3.org/2001/XMLSchema#integer",
    "http://www.w3.org/2001/XMLSchema#decimal",
    "http://www.w3.org/2001/XMLSchema#double",
    "http://www.w3.org/2001/XMLSchema#float",
    "http://www.w3.org/2001/XMLSchema#long",
    "http://www.w3.org/2001/XMLSchema#int",
    "http://www.w3.org/2001/XMLSchema#short",
    "http://www.w3.org/2001/XMLSchema#byte",
    "http://www.w3.org/2001/XMLSchema#nonNegativeInteger",
    "http://www.w3.org/2001/XMLSchema#positiveInteger",
    "http://www.w3.org/2001/XMLSchema#nonPositiveInteger",
    "http://www.w3.org/2001/XMLSchema#negativeInteger",
    "http://www.w3.org/2001/XMLSchema#unsignedLong",
    "http://www.w3.org/2001/XMLSchema#unsignedInt",
    "http://www.w3.org/2001/XMLSchema#unsignedShort",
    "http://www.w3.org/2001/XMLSchema#unsignedByte",
];
