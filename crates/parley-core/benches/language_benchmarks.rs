use criterion::{black_box, criterion_group, criterion_main, Criterion};

use parley_core::language::{classify, score};

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("language");

    group.bench_function("short_roman_urdu", |b| {
        b.iter(|| classify(black_box("kya hal hai aap ka")))
    });

    group.bench_function("english_question", |b| {
        b.iter(|| classify(black_box("What are your insurance plans for families?")))
    });

    let long = "mujhe apni family ke liye health insurance chahiye, kya aap bata sakte hain \
                ke monthly premium kitna hoga aur claim ka process kya hai? "
        .repeat(20);
    group.bench_function("long_mixed_paragraph", |b| b.iter(|| score(black_box(&long))));

    group.finish();
}

criterion_group!(benches, bench_classify);
criterion_main!(benches);
