use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use zero_mysql_protocol::ResultSetConcurrency;
use zero_mysql_protocol::charset::Charset;
use zero_mysql_protocol::constant::{ColumnFlags, ColumnType};
use zero_mysql_protocol::protocol::compress::write_frame;
use zero_mysql_protocol::protocol::connection::auth::{scramble_native, scramble_sha256};
use zero_mysql_protocol::protocol::primitive::{read_int_lenenc, write_bytes_lenenc, write_int_lenenc};
use zero_mysql_protocol::protocol::{ColumnDefinition, RowFactory, RowFormat};
use zero_mysql_protocol::value::{I64Factory, StringFactory};

fn column(name: &str, column_type: ColumnType) -> Vec<u8> {
    let mut out = Vec::new();
    for part in ["def", "bench", "t", "t", name, name] {
        write_bytes_lenenc(&mut out, part.as_bytes());
    }
    write_int_lenenc(&mut out, 0x0c);
    out.extend_from_slice(&255u16.to_le_bytes());
    out.extend_from_slice(&255u32.to_le_bytes());
    out.push(column_type as u8);
    out.extend_from_slice(&ColumnFlags::empty().bits().to_le_bytes());
    out.extend_from_slice(&[0, 0, 0]);
    out
}

fn bench_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("lenenc");
    for value in [250u64, 0xFFFF, 0xFF_FFFF, u64::MAX] {
        let mut encoded = Vec::new();
        write_int_lenenc(&mut encoded, value);
        group.bench_with_input(BenchmarkId::new("read", value), &encoded, |b, encoded| {
            b.iter(|| read_int_lenenc(black_box(encoded)).map(|(v, _)| v))
        });
        group.bench_with_input(BenchmarkId::new("write", value), &value, |b, &value| {
            let mut out = Vec::with_capacity(9);
            b.iter(|| {
                out.clear();
                write_int_lenenc(&mut out, black_box(value));
            })
        });
    }
    group.finish();
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");
    let text: Vec<u8> = b"INSERT INTO t VALUES (1, 'repeated text'), "
        .iter()
        .copied()
        .cycle()
        .take(64 * 1024)
        .collect();
    for size in [64usize, 4096, 64 * 1024] {
        group.bench_with_input(BenchmarkId::new("write_frame", size), &size, |b, &size| {
            let mut out = Vec::with_capacity(size);
            b.iter(|| {
                out.clear();
                write_frame(&mut out, black_box(&text[..size]), 0)
            })
        });
    }
    group.finish();
}

fn bench_rows(c: &mut Criterion) {
    let columns = ColumnDefinition::parse(
        &[
            column("id", ColumnType::MYSQL_TYPE_LONGLONG),
            column("name", ColumnType::MYSQL_TYPE_VAR_STRING),
            column("email", ColumnType::MYSQL_TYPE_VAR_STRING),
        ],
        Charset::Utf8mb4,
    )
    .unwrap();
    let factory = RowFactory::new(
        RowFormat::Text,
        columns,
        ResultSetConcurrency::ReadOnly,
        1 << 20,
    );
    let mut payload = Vec::new();
    for value in ["123456", "Ferris the Crab", "ferris@example.com"] {
        write_bytes_lenenc(&mut payload, value.as_bytes());
    }

    c.bench_function("text_row/create", |b| {
        b.iter(|| factory.create(black_box(&payload)))
    });
    let row = factory.create(&payload).unwrap();
    c.bench_function("text_row/get", |b| {
        b.iter(|| {
            let id = row.get(0, &I64Factory)?;
            let name = row.get(1, &StringFactory)?;
            zero_mysql_protocol::error::Result::Ok((id, name))
        })
    });
}

fn bench_scramble(c: &mut Criterion) {
    let seed = b"0123456789abcdefghij";
    c.bench_function("scramble/native", |b| {
        b.iter(|| scramble_native(black_box("password"), seed))
    });
    c.bench_function("scramble/caching_sha2", |b| {
        b.iter(|| scramble_sha256(black_box("password"), seed))
    });
}

criterion_group!(
    benches,
    bench_primitives,
    bench_compression,
    bench_rows,
    bench_scramble
);
criterion_main!(benches);
