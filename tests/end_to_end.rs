//! Generator -> discriminator execution on the CPU backend.

use gan_asg::architecture::{DiscriminatorConfig, GeneratorConfig};
use gan_asg::config::{initialize_backend, BackendConfig, GanConfig, MemoryPolicy};
use gan_asg::gan::{sample_latent, GanPair};
use gan_asg::runtime::backend::{ExecutionMode, RuntimeError};
use gan_asg::runtime::cpu_backend::CpuBackend;
use gan_asg::GanError;
use ndarray::{ArrayD, IxDyn};

/// Same topology as the default pair with fewer filters, at 32x32.
fn reduced_config() -> GanConfig {
    GanConfig {
        height: 32,
        width: 32,
        channels: 3,
        latent_dim: 8,
        generator: GeneratorConfig {
            seed_channels: 4,
            filters: 8,
            ..GeneratorConfig::default()
        },
        discriminator: DiscriminatorConfig {
            filters: 8,
            ..DiscriminatorConfig::default()
        },
        backend: BackendConfig::default(),
    }
}

fn assert_bounded(values: &ArrayD<f32>, lo: f32, hi: f32) {
    for &v in values.iter() {
        assert!(v.is_finite() && (lo..=hi).contains(&v), "{v} outside [{lo}, {hi}]");
    }
}

#[test]
fn test_reduced_pair_generates_bounded_images_and_probabilities() {
    initialize_backend(&BackendConfig::default()).unwrap();
    let pair = GanPair::from_config(&reduced_config()).unwrap();
    let g_params = pair.generator().init_parameters(0);
    let d_params = pair.discriminator().init_parameters(1);
    let backend = CpuBackend::from_global(ExecutionMode::Inference);

    let latent = sample_latent(3, pair.latent_dim(), 7);
    let (images, scores) = pair
        .generate_and_score(&backend, &g_params, &d_params, &latent)
        .unwrap();

    assert_eq!(images.shape(), &[3, 3, 32, 32]);
    assert_bounded(&images, -1.0, 1.0);
    assert_eq!(scores.shape(), &[3, 1]);
    assert_bounded(&scores, 0.0, 1.0);
}

#[test]
fn test_inference_is_deterministic_despite_dropout() {
    let pair = GanPair::from_config(&reduced_config()).unwrap();
    let d_params = pair.discriminator().init_parameters(5);
    let backend = CpuBackend::new();
    let images = ArrayD::from_shape_fn(IxDyn(&[2, 3, 32, 32]), |idx| {
        ((idx[1] * 31 + idx[2] * 7 + idx[3]) % 13) as f32 / 6.5 - 1.0
    });

    let first = pair.discriminator().forward(&backend, &d_params, &images).unwrap();
    let second = pair.discriminator().forward(&backend, &d_params, &images).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_training_mode_dropout_changes_scores() {
    let pair = GanPair::from_config(&reduced_config()).unwrap();
    let d_params = pair.discriminator().init_parameters(5);
    let backend = CpuBackend::with_config(ExecutionMode::Training, &BackendConfig::default());
    let images = ArrayD::from_shape_fn(IxDyn(&[2, 3, 32, 32]), |idx| {
        ((idx[0] * 5 + idx[2] * 3 + idx[3]) % 17) as f32 / 8.5 - 1.0
    });

    let first = pair.discriminator().forward(&backend, &d_params, &images).unwrap();
    let second = pair.discriminator().forward(&backend, &d_params, &images).unwrap();
    assert_ne!(first, second);
    assert_bounded(&first, 0.0, 1.0);
}

#[test]
fn test_preallocated_budget_too_small_fails_before_running() {
    let pair = GanPair::from_config(&reduced_config()).unwrap();
    let g_params = pair.generator().init_parameters(0);
    let config = BackendConfig {
        memory_policy: MemoryPolicy::Preallocate { limit_bytes: 1024 },
        ..BackendConfig::default()
    };
    let backend = CpuBackend::with_config(ExecutionMode::Inference, &config);

    let err = pair
        .generator()
        .forward(&backend, &g_params, &sample_latent(1, 8, 0))
        .unwrap_err();
    assert!(matches!(err, GanError::Runtime(RuntimeError::MemoryError(_))));
}

#[test]
fn test_forward_rejects_channels_last_images() {
    let pair = GanPair::from_config(&reduced_config()).unwrap();
    let d_params = pair.discriminator().init_parameters(0);
    let nhwc = ArrayD::zeros(IxDyn(&[1, 32, 32, 3]));

    let err = pair
        .discriminator()
        .forward(&CpuBackend::new(), &d_params, &nhwc)
        .unwrap_err();
    assert!(matches!(err, GanError::ShapeMismatch { .. }));
}

#[test]
fn test_full_resolution_pair_with_few_filters() {
    let config = GanConfig {
        latent_dim: 4,
        generator: GeneratorConfig {
            seed_channels: 1,
            filters: 2,
            ..GeneratorConfig::default()
        },
        discriminator: DiscriminatorConfig {
            filters: 2,
            ..DiscriminatorConfig::default()
        },
        ..GanConfig::default()
    };
    let pair = GanPair::from_config(&config).unwrap();
    assert_eq!(pair.image_shape().to_string(), "128x128x3");

    let g_params = pair.generator().init_parameters(0);
    let d_params = pair.discriminator().init_parameters(1);
    let latent = sample_latent(1, pair.latent_dim(), 42);
    let (images, scores) = pair
        .generate_and_score(&CpuBackend::new(), &g_params, &d_params, &latent)
        .unwrap();

    assert_eq!(images.shape(), &[1, 3, 128, 128]);
    assert_bounded(&images, -1.0, 1.0);
    assert_eq!(scores.shape(), &[1, 1]);
    assert_bounded(&scores, 0.0, 1.0);
}

#[test]
#[ignore = "full-size 128x128 run is slow and needs several GB of memory"]
fn test_full_size_pair_end_to_end() {
    let pair = GanPair::build(128, 128, 3, 100).unwrap();
    let g_params = pair.generator().init_parameters(0);
    let d_params = pair.discriminator().init_parameters(1);
    let backend = CpuBackend::new();

    let latent = sample_latent(1, 100, 42);
    let (images, scores) = pair
        .generate_and_score(&backend, &g_params, &d_params, &latent)
        .unwrap();

    assert_eq!(images.shape(), &[1, 3, 128, 128]);
    assert_bounded(&images, -1.0, 1.0);
    assert_eq!(scores.shape(), &[1, 1]);
    assert_bounded(&scores, 0.0, 1.0);
}
