use gpusim_atomics::arch::ArchConfig;
use gpusim_atomics::gpu::GPU;
use gpusim_atomics::kernel::{AccumulateMode, LaunchConfig, ScatterKernel};
use gpusim_atomics::logging::init_tracing;
use gpusim_atomics::precision::HalfFloat;
use gpusim_atomics::LaneContribution;
use half::{bf16, f16};

/// Scatter-accumulate demo: every thread adds 1.0 into a bucket, with a
/// quarter of the threads hammering a small set of hot buckets, the
/// pattern of an embedding-bag or index_add backward pass.
const THREADS: u32 = 8192;
const NUMEL: usize = 1001; // odd, so the last element has no right neighbor
const HOT_BUCKETS: usize = 61;

fn bucket_of(gid: u32) -> usize {
    if gid % 4 == 0 {
        gid as usize % HOT_BUCKETS
    } else {
        (gid as usize * 7 + 3) % NUMEL
    }
}

fn run<T: HalfFloat>(gpu: &GPU) -> gpusim_atomics::Result<bool> {
    let mut expected = vec![0f32; NUMEL];
    for gid in 0..THREADS {
        expected[bucket_of(gid)] += 1.0;
    }

    let kernel = ScatterKernel::new("index_add", |ctx| {
        let gid = ctx.global_id();
        (gid < THREADS).then(|| LaneContribution::new(bucket_of(gid), T::from_f32(1.0)))
    });
    let config = LaunchConfig::for_elements(THREADS, 256);

    let mut all_correct = true;
    for mode in AccumulateMode::ALL {
        let alloc = gpu.alloc::<T>(NUMEL)?;
        let buffer = alloc.view();
        let stats = gpu.launch_scatter_add(&kernel, &config, &buffer, NUMEL, mode)?;

        let mismatches = buffer
            .read()
            .iter()
            .zip(&expected)
            .filter(|(got, want)| got.to_f32() != **want)
            .count();
        all_correct &= mismatches == 0;

        println!(
            "  {:<5} {:<14} contributions={:<5} atomics={:<5} (pair={:<5} plain={:<5}) cas_retries={:<4} folded={:<5} coalesced={:<4} mismatches={}",
            T::KIND,
            mode,
            stats.contributions,
            stats.atomics.atomics_issued(),
            stats.atomics.pair_atomics,
            stats.atomics.plain_atomics,
            stats.atomics.cas_retries,
            stats.atomics.lanes_folded,
            stats.atomics.coalesced_pairs,
            mismatches,
        );
    }
    Ok(all_correct)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let arch = match std::env::args().nth(1) {
        Some(arg) => ArchConfig::resolve(&arg)?,
        None => ArchConfig::h100(),
    };
    let gpu = GPU::new(arch)?.with_live_metrics(true);
    println!(
        "Initialized {} ({:?} {}.{}) with {} SMs, warp size {}: fp16x2={} bf16x2={} lane-match={}",
        gpu.arch.name,
        gpu.arch.vendor,
        gpu.arch.major,
        gpu.arch.minor,
        gpu.sms.len(),
        gpu.arch.warp_size,
        gpu.target.pair_backend(f16::KIND).name(),
        gpu.target.pair_backend(bf16::KIND).name(),
        gpu.target.has_lane_match(),
    );

    let f16_ok = run::<f16>(&gpu)?;
    let bf16_ok = run::<bf16>(&gpu)?;

    if f16_ok && bf16_ok {
        println!("Verification PASSED: every mode matches the f32 reference");
    } else {
        println!("Verification FAILED");
        std::process::exit(1);
    }
    Ok(())
}
