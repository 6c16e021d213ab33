use std::hint::black_box;
use std::path::PathBuf;

use bill_harmonizer::data::RawTable;
use bill_harmonizer::harmonize::{HarmonizeOptions, harmonize};
use bill_harmonizer::registry::Registry;
use bill_harmonizer::union::assemble;
use chrono::NaiveDate;
use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};

fn load_registry() -> Registry {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join("field_mappings.yaml");
    Registry::load(&path).expect("load shipped mapping")
}

/// A year shaped like a late-era extract: legacy boolean encodings, US dates,
/// a few unmapped columns and the occasional junk token.
fn synthetic_year(rows: usize) -> RawTable {
    let headers = [
        "State",
        "Bill Number",
        "Bill Type",
        "Introduced",
        "Passed 1st Chamber",
        "Law",
        "Vetoed",
        "Abortion",
        "Contraception",
        "Period Products",
        "Positive",
        "Restrictive",
        "Date Introduced",
        "Last Action",
        "Summary",
        "Sponsor",
        "Committee",
    ];
    let states = ["TX", "CA", "NY", "OK", "WA", "GA"];
    let flags = ["-1", "0", "0", "yes", "", "maybe"];
    let rows = (0..rows)
        .map(|i| {
            let flag = |offset: usize| flags[(i + offset) % flags.len()].to_string();
            vec![
                states[i % states.len()].to_string(),
                format!("HB {i}"),
                if i % 5 == 0 { "Resolution" } else { "Bill" }.to_string(),
                flag(0),
                flag(1),
                flag(2),
                flag(3),
                flag(4),
                flag(5),
                flag(1),
                flag(2),
                flag(3),
                format!("{:02}/{:02}/2021", i % 12 + 1, i % 28 + 1),
                format!("{:02}/{:02}/21 00:00:00", i % 12 + 1, i % 28 + 1),
                format!("Relating to item {i}; see committee notes"),
                format!("Member {}", i % 40),
                "Health".to_string(),
            ]
        })
        .collect();
    RawTable::new(headers.iter().map(|h| h.to_string()).collect(), rows)
}

fn options() -> HarmonizeOptions {
    HarmonizeOptions {
        source_label: "bench".to_string(),
        ingested_at: NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid timestamp"),
    }
}

fn bench_harmonize(c: &mut Criterion) {
    let registry = load_registry();
    let options = options();
    let rows = 20_000;
    let raw = synthetic_year(rows);

    let mut group = c.benchmark_group("harmonize");
    group.throughput(Throughput::Elements(rows as u64));
    group.bench_function("single_year", |b| {
        b.iter(|| harmonize(black_box(&raw), 2021, &registry, &options))
    });
    group.bench_function("union_of_five_years", |b| {
        b.iter_batched(
            || {
                (2017..2022)
                    .map(|year| harmonize(&raw, year, &registry, &options).table)
                    .collect::<Vec<_>>()
            },
            |tables| assemble(&registry, tables).expect("aligned tables"),
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_harmonize);
criterion_main!(benches);
