//! Guardrail and schema-text benchmarks.
//!
//! Measures validation and limit rewriting of typical model-generated SQL,
//! compact schema parsing, and sampled column type inference for uploads.
//!
//! Run with: cargo bench -p datagate-core --bench guardrail

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use datagate_core::{Guardrail, parse_schema};
use std::hint::black_box;

// =============================================================================
// Inputs
// =============================================================================

const SIMPLE: &str = "SELECT id, amount FROM orders WHERE amount > 100 ORDER BY id;";

const ANALYTIC: &str = r#"
WITH monthly AS (
    SELECT date_trunc('month', o.placed_at) AS month, c.region, SUM(o.amount) AS total
    FROM public.orders o
    JOIN public.customers c ON c.id = o.customer_id
    WHERE o.note NOT LIKE '%drop table%' -- comment with ; inside is stripped
    GROUP BY 1, 2
), ranked AS (
    SELECT *, rank() OVER (PARTITION BY month ORDER BY total DESC) AS r FROM monthly
)
SELECT month, region, total, EXTRACT(YEAR FROM month) AS y
FROM ranked, (SELECT 1 AS one) AS k
WHERE r <= 3
"#;

fn allowed() -> Vec<String> {
    (0..200)
        .map(|i| format!("public.table_{i}"))
        .chain(["public.orders".to_string(), "public.customers".to_string()])
        .collect()
}

fn schema_text(tables: usize, columns: usize) -> String {
    let mut lines = Vec::with_capacity(tables * columns);
    for t in 0..tables {
        for c in 0..columns {
            let ty = match c % 4 {
                0 => "int4",
                1 => "text",
                2 => "timestamptz",
                _ => "numeric",
            };
            lines.push(format!("public.table_{t}.column_{c} {ty}"));
        }
    }
    lines.join("\n")
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_guardrail(c: &mut Criterion) {
    let guardrail = Guardrail::new(Some("public"), 1000);
    let allowed = allowed();

    let mut group = c.benchmark_group("guardrail");
    group.bench_function("prepare_simple", |b| {
        b.iter(|| guardrail.prepare(black_box(SIMPLE), &allowed))
    });
    group.bench_function("prepare_analytic", |b| {
        b.iter(|| guardrail.prepare(black_box(ANALYTIC), &allowed))
    });
    group.bench_function("reject_unlisted", |b| {
        b.iter(|| guardrail.validate(black_box("SELECT * FROM pg_shadow"), &allowed))
    });
    group.finish();
}

fn bench_parse_schema(c: &mut Criterion) {
    let text = schema_text(100, 20);

    let mut group = c.benchmark_group("schema");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("parse_2000_columns", |b| {
        b.iter(|| parse_schema(black_box(&text)))
    });
    group.finish();
}

#[cfg(feature = "csv")]
fn bench_inference(c: &mut Criterion) {
    use datagate_core::connectors::csv::inference::infer_column_types;

    let rows: Vec<Vec<String>> = (0..5000)
        .map(|i| {
            vec![
                i.to_string(),
                format!("{}.{:02}", i, i % 100),
                if i % 2 == 0 { "yes" } else { "no" }.to_string(),
                format!("2026-01-{:02} 10:00:00", i % 28 + 1),
                format!("customer {i}"),
            ]
        })
        .collect();

    c.bench_function("infer_column_types_5000_rows", |b| {
        b.iter(|| infer_column_types(black_box(&rows), 5))
    });
}

#[cfg(not(feature = "csv"))]
fn bench_inference(_c: &mut Criterion) {}

criterion_group!(benches, bench_guardrail, bench_parse_schema, bench_inference);
criterion_main!(benches);
