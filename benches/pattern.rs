// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use kmscam::source::fill_bars;

pub fn benchmark_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_bars");
    for dim in [
        (640u32, 480u32),
        (1280, 720),
        (1920, 1080),
        (3840, 2160),
    ]
    .iter()
    {
        let pitch = dim.0 * 4;
        let mut pix = vec![0u8; pitch as usize * dim.1 as usize];
        group.bench_with_input(format!("{}x{}", dim.0, dim.1), dim, |b, dim| {
            let mut phase = 0;
            b.iter(|| {
                fill_bars(&mut pix, dim.0, dim.1, pitch, phase);
                phase += 1;
            })
        });
    }
}

criterion_group!(benches, benchmark_fill);
criterion_main!(benches);
