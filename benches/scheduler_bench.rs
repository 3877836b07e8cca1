use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use gsched::isa::{Immediate, Instruction, Opcode, Selection, SelectionBuilder, SimdWidth};
use gsched::pipeline::{run_pipeline, RunOptions};
use gsched::regalloc::RegAllocation;
use gsched::schedule::{schedule_post_reg_allocation, schedule_pre_reg_allocation, GenContext};
use std::path::Path;

/// One block of `lanes` independent load/compute/store chains, interleaved
/// chain by chain so both passes have room to reorder.
fn generate_block(lanes: u32) -> Selection {
    let mut b = SelectionBuilder::new();
    b.block();
    b.push(Instruction::label(0));
    let addrs: Vec<_> = (0..lanes).map(|_| b.reg()).collect();
    let loaded: Vec<_> = (0..lanes).map(|_| b.reg()).collect();
    let scaled: Vec<_> = (0..lanes).map(|_| b.reg()).collect();
    for (&addr, &value) in addrs.iter().zip(&loaded) {
        b.push(Instruction::new(Opcode::UntypedRead, vec![value.into()], vec![addr.into()]).with_bti(1));
    }
    for (&value, &out) in loaded.iter().zip(&scaled) {
        b.push(Instruction::alu2(Opcode::Mul, out, value, Immediate::Float(2.0)));
        b.push(Instruction::alu2(Opcode::Add, out, out, value));
    }
    for (&addr, &out) in addrs.iter().zip(&scaled) {
        b.push(Instruction::new(Opcode::UntypedWrite, vec![], vec![addr.into(), out.into()]).with_bti(1));
    }
    b.push(Instruction::new(Opcode::Eot, vec![], vec![]));
    b.finish()
}

fn demo_source(name: &str) -> String {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).parent().unwrap();
    std::fs::read_to_string(root.join("demos").join(name)).expect("demo listing")
}

// Pre-allocation pass scaling with block size.
fn bench_pre_alloc_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule/pre_alloc");
    for lanes in [4u32, 16, 64] {
        let sel = generate_block(lanes);
        let ctx = GenContext::new(SimdWidth::Simd8);
        group.bench_with_input(BenchmarkId::from_parameter(sel.insn_count()), &sel, |b, sel| {
            b.iter_batched(
                || sel.clone(),
                |mut sel| {
                    schedule_pre_reg_allocation(&ctx, &mut sel).expect("schedule");
                    black_box(sel)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// Post-allocation pass scaling with block size, both SIMD widths.
fn bench_post_alloc_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule/post_alloc");
    for simd in [SimdWidth::Simd8, SimdWidth::Simd16] {
        for lanes in [4u32, 16, 64] {
            let sel = generate_block(lanes);
            let allocation = RegAllocation::round_robin(sel.reg_num(), simd);
            let ctx = GenContext::new(simd).with_allocation(&allocation);
            let id = format!("simd{}/{}", simd.lanes(), sel.insn_count());
            group.bench_with_input(BenchmarkId::from_parameter(id), &sel, |b, sel| {
                b.iter_batched(
                    || sel.clone(),
                    |mut sel| {
                        schedule_post_reg_allocation(&ctx, &mut sel).expect("schedule");
                        black_box(sel)
                    },
                    BatchSize::SmallInput,
                );
            });
        }
    }
    group.finish();
}

// Whole pipeline (parse -> resolve -> both passes) on the demo listings.
fn bench_pipeline_demos(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline/demos");
    let options = RunOptions::default();
    for name in ["saxpy.gasm", "reduce.gasm"] {
        let source = demo_source(name);
        group.bench_with_input(BenchmarkId::from_parameter(name), &source, |b, source| {
            b.iter(|| {
                let state = run_pipeline(black_box(source), &options, |_, _| {});
                assert!(!state.has_error);
                black_box(state.scheduled)
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_pre_alloc_scaling,
    bench_post_alloc_scaling,
    bench_pipeline_demos
);
criterion_main!(benches);
