//! Demo: builds the default 128x128x3 pair, prints both summaries, then runs a
//! reduced pair end to end on the CPU backend.

use anyhow::Context;
use gan_asg::architecture::{DiscriminatorConfig, GeneratorConfig};
use gan_asg::config::{initialize_backend, BackendConfig, GanConfig};
use gan_asg::gan::{sample_latent, GanPair};
use gan_asg::runtime::backend::ExecutionMode;
use gan_asg::runtime::cpu_backend::CpuBackend;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---------- 1. Backend ----------
    let backend_config = BackendConfig::default();
    initialize_backend(&backend_config).context("configuring the numerical backend")?;
    println!("--- gan-asg demo ---");
    println!("[Config] Memory policy: {:?}", backend_config.memory_policy);

    // ---------- 2. Full-size topology ----------
    let pair = GanPair::build(128, 128, 3, 100).context("building the 128x128x3 pair")?;
    println!("\n[1] Generator\n{}", pair.generator().summary());
    println!("\n[2] Discriminator\n{}", pair.discriminator().summary());
    println!(
        "\n[3] Interfaces match: generator output {} == discriminator input {}",
        pair.generator()
            .image_output_shape()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        pair.image_shape()
    );

    // ---------- 3. Reduced end-to-end run ----------
    let config = GanConfig {
        height: 32,
        width: 32,
        channels: 3,
        latent_dim: 16,
        generator: GeneratorConfig {
            seed_channels: 8,
            filters: 16,
            ..GeneratorConfig::default()
        },
        discriminator: DiscriminatorConfig {
            filters: 16,
            ..DiscriminatorConfig::default()
        },
        backend: backend_config,
    };
    let small = GanPair::from_config(&config).context("building the reduced pair")?;
    let g_params = small.generator().init_parameters(0);
    let d_params = small.discriminator().init_parameters(1);
    let backend = CpuBackend::from_global(ExecutionMode::Inference);
    let latent = sample_latent(2, small.latent_dim(), 42);

    let start = Instant::now();
    let (images, scores) = small
        .generate_and_score(&backend, &g_params, &d_params, &latent)
        .context("running generator -> discriminator")?;

    let (lo, hi) = images
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    println!("\n[4] Reduced pair ({}) ran in {:.2?}", small.image_shape(), start.elapsed());
    println!("    images {:?}, values in [{:.4}, {:.4}]", images.shape(), lo, hi);
    println!("    scores {:?}: {:?}", scores.shape(), scores.iter().collect::<Vec<_>>());

    Ok(())
}
