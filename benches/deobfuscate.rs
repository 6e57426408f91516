use criterion::{black_box, criterion_group, criterion_main, Criterion};
use js_deobfuscator::Deobfuscator;

const SAMPLE: &str = r#"var a = '\x68\x65\x6c\x6c\x6f';
var b = '\x77'+'\x6f'+'\x72'+'\x6c'+'\x64';
function gather() {
    var pool = ['\x6f\x6e\x65', '\x74\x77\x6f'];
    return gather = function () { return pool; }, gather();
}
function lookup(n) {
    var t = gather();
    lookup = function (i) { return t[i - 0x64]; };
    return lookup(n);
}
function p(a) { return lookup(a + 0x1); }
var total = (0x10 + 0x5 * 0x2);
log(a, b, lookup(0x64), total);
"#;

fn bench_pipeline(c: &mut Criterion) {
    let deobfuscator = Deobfuscator::new();
    c.bench_function("deobfuscate", |b| {
        b.iter(|| deobfuscator.run(black_box(SAMPLE)))
    });
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
