use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use oxigraph::model::{BlankNode, Literal, NamedNode, Term, Triple};
use std::collections::HashSet;
use wdsync::bitmap::{mark_subjects, InMemoryBitmap, SortedTripleIndex, TripleIndex};
use wdsync::delta::{reconcile, DEFAULT_EPSILON};

const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";

/// Statements of `entities` entities with `per_entity` statements each: a mix
/// of item links, plain strings, decimals and blank-node objects. `shift`
/// perturbs every decimal so two generations differ numerically.
fn generate_statements(entities: usize, per_entity: usize, shift: f64) -> HashSet<Triple> {
    let decimal = NamedNode::new(XSD_DECIMAL).unwrap();
    let mut out = HashSet::with_capacity(entities * per_entity);
    for e in 0..entities {
        let s = NamedNode::new(format!("http://www.wikidata.org/entity/Q{e}")).unwrap();
        for t in 0..per_entity {
            let p = NamedNode::new(format!("http://www.wikidata.org/prop/direct/P{}", t % 50)).unwrap();
            let o: Term = match t % 4 {
                0 => NamedNode::new(format!("http://www.wikidata.org/entity/Q{}", t * 7)).unwrap().into(),
                1 => Literal::new_simple_literal(format!("value {t}")).into(),
                2 => Literal::new_typed_literal(format!("{}", t as f64 + shift), decimal.clone()).into(),
                _ => BlankNode::new_unchecked(format!("b{e}x{t}")).into(),
            };
            out.insert(Triple::new(s.clone(), p, o));
        }
    }
    out
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    for n in [10, 100, 1_000] {
        let current = generate_statements(1, n, 0.0);
        let same = current.clone();
        let drifted = generate_statements(1, n, 1e-15);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("unchanged", n), &n, |b, _| {
            b.iter(|| reconcile(current.clone(), same.clone(), DEFAULT_EPSILON))
        });
        group.bench_with_input(BenchmarkId::new("numeric_drift", n), &n, |b, _| {
            b.iter(|| reconcile(current.clone(), drifted.clone(), DEFAULT_EPSILON))
        });
    }
    group.finish();
}

fn bench_bitmap(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmap");
    for entities in [100, 1_000, 10_000] {
        let index = SortedTripleIndex::new(generate_statements(entities, 20, 0.0));
        let subjects: Vec<String> = (0..entities)
            .step_by(10)
            .map(|e| format!("http://www.wikidata.org/entity/Q{e}"))
            .collect();
        group.throughput(Throughput::Elements(index.len()));
        group.bench_with_input(
            BenchmarkId::from_parameter(entities),
            &subjects,
            |b, subjects| {
                b.iter(|| {
                    let mut bitmap = InMemoryBitmap::new(index.len());
                    mark_subjects(&index, subjects, &mut bitmap).unwrap()
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_bitmap);
criterion_main!(benches);
