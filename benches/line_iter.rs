use std::fmt;
use std::io::Cursor;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hydralog::StreamLineIter;

struct Parameters {
    line_len: usize,
    lines: usize,
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} lines of {} bytes", self.lines, self.line_len)
    }
}

fn build(param: &Parameters) -> Vec<u8> {
    let mut data = Vec::with_capacity(param.lines * (param.line_len + 1));
    for i in 0..param.lines {
        let mut line = format!("{i} ");
        while line.len() < param.line_len {
            line.push('x');
        }
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
    }
    data
}

fn line_iter_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("line-iter");

    let parameters = vec![
        Parameters {
            line_len: 64,
            lines: 4096,
        },
        Parameters {
            line_len: 1024,
            lines: 1024,
        },
    ];

    for param in &parameters {
        let data = build(param);
        group.throughput(Throughput::Bytes(data.len() as u64));

        group.bench_with_input(BenchmarkId::new("forward", param), &param, |b, _| {
            b.iter(|| {
                let mut iter = StreamLineIter::from_bytes(data.clone());
                let mut count = 0usize;
                while let Some(line) = iter.next().unwrap() {
                    count += line.len();
                }
                count
            })
        });

        group.bench_with_input(BenchmarkId::new("forward-chunked", param), &param, |b, _| {
            b.iter(|| {
                let mut iter = StreamLineIter::from_handle(Cursor::new(data.clone()))
                    .unwrap()
                    .with_chunk_size(4096);
                let mut count = 0usize;
                while let Some(line) = iter.next().unwrap() {
                    count += line.len();
                }
                count
            })
        });

        group.bench_with_input(BenchmarkId::new("backward", param), &param, |b, _| {
            b.iter(|| {
                let mut iter = StreamLineIter::from_bytes(data.clone());
                iter.seek_to_end().unwrap();
                let mut count = 0usize;
                while let Some(line) = iter.prev().unwrap() {
                    count += line.len();
                }
                count
            })
        });
    }
}

criterion_group!(benches, line_iter_bench);
criterion_main!(benches);
