use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use classfile_decompiler::{decompile, read_class, Decompiler};

#[path = "../tests/common/mod.rs"]
mod common;

use common::{ClassBuilder, Code, ACC_PUBLIC, ACC_STATIC};

/// A class with `count` copies of a counting loop.
fn loop_class(count: usize) -> Vec<u8> {
    let mut builder = ClassBuilder::new("bench/Loops");
    builder.default_constructor();
    for i in 0..count {
        let code = Code::new(
            2,
            3,
            vec![
                0x03, 0x3c, 0x03, 0x3d, 0x1c, 0x1a, 0xa2, 0x00, 0x0d, 0x1b, 0x1c, 0x60, 0x3c, 0x84,
                0x02, 0x01, 0xa7, 0xff, 0xf4, 0x1b, 0xac,
            ],
        )
        .line(0, 10)
        .line(4, 11)
        .line(19, 13);
        builder.method(ACC_PUBLIC | ACC_STATIC, &format!("sum{}", i), "(I)I", Some(code));
    }
    builder.build()
}

fn bench_read_class(c: &mut Criterion) {
    let bytes = loop_class(50);
    c.bench_function("read_class 50 methods", |b| {
        b.iter(|| read_class(black_box(&bytes)).unwrap())
    });
}

fn bench_decompile(c: &mut Criterion) {
    let small = loop_class(1);
    let large = loop_class(50);
    c.bench_function("decompile 1 method", |b| b.iter(|| decompile(black_box(&small)).unwrap()));
    c.bench_function("decompile 50 methods", |b| b.iter(|| decompile(black_box(&large)).unwrap()));

    let class = read_class(&large).unwrap();
    let decompiler = Decompiler::default();
    c.bench_function("decompile_class 50 methods", |b| {
        b.iter(|| decompiler.decompile_class(black_box(&class)))
    });
}

criterion_group!(benches, bench_read_class, bench_decompile);
criterion_main!(benches);
