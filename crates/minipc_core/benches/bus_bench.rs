/*
    MiniPC
    https://github.com/minipc-emu/minipc

    Copyright 2023-2026 the MiniPC contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    benches::bus_bench.rs

    Benchmarks for I/O port dispatch.

*/

use minipc_core::{bus::IoBus, channel::HostSender};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

pub fn bus_dispatch_bench(c: &mut Criterion) {
    c.bench_function("bus_mapped_byte_read", |b| {
        let (host, _events) = HostSender::new_pair();
        let mut bus = IoBus::new(host);
        bus.map_read_u8(0x60, |_| 0x5A);

        b.iter(|| bus.io_read_u8(black_box(0x60)));
    });

    c.bench_function("bus_unmapped_byte_read", |b| {
        let (host, _events) = HostSender::new_pair();
        let mut bus = IoBus::new(host);

        b.iter(|| bus.io_read_u8(black_box(0x3FF)));
    });

    c.bench_function("bus_word_read_byte_split", |b| {
        let (host, _events) = HostSender::new_pair();
        let mut bus = IoBus::new(host);
        bus.map_read_u8(0x60, |_| 0x5A);
        bus.map_read_u8(0x61, |_| 0xA5);

        b.iter(|| bus.io_read_u16(black_box(0x60)));
    });

    c.bench_function("bus_redirected_byte_write", |b| {
        let (host, events) = HostSender::new_pair();
        let mut bus = IoBus::new(host);
        bus.map_write_u8(0x80, |_, _| {});
        // flag port 0x80: word 4, bit 0
        bus.set_redirect_map(&[0, 0, 0, 0, 1]);

        b.iter(|| {
            bus.io_write_u8(black_box(0x80), 0x42);
            let _ = events.try_recv();
        });
    });
}

criterion_group!(benches, bus_dispatch_bench);
criterion_main!(benches);
