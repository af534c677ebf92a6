//! Construction-time checks: output shapes, parameter counts, composition and
//! the discriminator's minimum input size.

use gan_asg::architecture::{
    build_discriminator, build_generator, DiscriminatorConfig, FeatureShape, ImageShape,
};
use gan_asg::gan::GanPair;
use gan_asg::GanError;

#[test]
fn test_generator_outputs_requested_image_for_grayscale_and_rgb() {
    for channels in [1, 3] {
        let generator = build_generator(128, 128, channels, 100).unwrap();
        assert_eq!(generator.input_shape(), FeatureShape::Vector { features: 100 });
        assert_eq!(
            generator.image_output_shape(),
            Some(ImageShape::new(128, 128, channels))
        );
    }
}

#[test]
fn test_reference_parameter_counts() {
    let generator = build_generator(128, 128, 3, 100).unwrap();
    let discriminator = build_discriminator(128, 128, 3).unwrap();

    assert_eq!(generator.parameter_count(), 58_136_323);
    assert_eq!(discriminator.parameter_count(), 815_489);
    assert_eq!(generator.summary().total_parameters(), 58_136_323);
}

#[test]
fn test_summary_lists_every_layer() {
    let discriminator = build_discriminator(128, 128, 3).unwrap();
    let text = discriminator.summary().to_string();

    assert!(text.starts_with("Model: \"discriminator\""));
    for label in [
        "conv2d (Conv2D)",
        "leaky_re_lu (LeakyReLU)",
        "conv2d_3 (Conv2D)",
        "leaky_re_lu_3 (LeakyReLU)",
        "flatten (Flatten)",
        "dropout (Dropout)",
        "dense (Dense)",
        "(None, 14, 14, 128)",
        "(None, 25088)",
        "Total params: 815,489",
    ] {
        assert!(text.contains(label), "missing {label:?} in\n{text}");
    }
}

#[test]
fn test_generator_summary_lists_activation_rows_channels_last() {
    let generator = build_generator(128, 128, 3, 100).unwrap();
    let text = generator.summary().to_string();

    for label in [
        "dense (Dense)",
        "leaky_re_lu (LeakyReLU)",
        "reshape (Reshape)",
        "(None, 64, 64, 128)",
        "conv2d_transpose (Conv2DTranspose)",
        "leaky_re_lu_4 (LeakyReLU)",
        "(None, 128, 128, 256)",
        "conv2d_3 (Conv2D)",
        "(None, 128, 128, 3)",
        "Total params: 58,136,323",
    ] {
        assert!(text.contains(label), "missing {label:?} in\n{text}");
    }
    // The tanh output is fused into the last convolution.
    assert!(!text.contains("leaky_re_lu_5"));
}

#[test]
fn test_discriminator_rejects_eight_by_eight() {
    let err = build_discriminator(8, 8, 3).unwrap_err();
    assert!(matches!(err, GanError::ShapeMismatch { .. }), "{err}");
}

#[test]
fn test_discriminator_minimum_size_is_pinned() {
    let min = DiscriminatorConfig::default().min_spatial_size();
    assert_eq!(min, 24);

    let smallest = build_discriminator(min, min, 3).unwrap();
    assert_eq!(smallest.output_shape(), FeatureShape::Vector { features: 1 });
    assert!(build_discriminator(min - 1, min, 3).is_err());
    assert!(build_discriminator(min, min - 1, 3).is_err());
}

#[test]
fn test_zero_sized_arguments_are_invalid() {
    assert!(matches!(
        build_discriminator(0, 32, 3),
        Err(GanError::InvalidHyperparameter { .. })
    ));
    assert!(matches!(
        build_generator(32, 32, 0, 10),
        Err(GanError::InvalidHyperparameter { .. })
    ));
}

#[test]
fn test_composed_pair_has_matching_interfaces() {
    let pair = GanPair::build(128, 128, 3, 100).unwrap();

    assert_eq!(pair.latent_dim(), 100);
    assert_eq!(pair.image_shape(), ImageShape::new(128, 128, 3));
    assert_eq!(
        pair.generator().image_output_shape(),
        pair.discriminator().image_input_shape()
    );
}

#[test]
fn test_composition_rejects_mismatched_models() {
    let generator = build_generator(64, 64, 3, 100).unwrap();
    let discriminator = build_discriminator(128, 128, 3).unwrap();

    match GanPair::compose(generator, discriminator) {
        Err(GanError::ShapeMismatch { location, detail }) => {
            assert_eq!(location, "generator.output -> discriminator.input");
            assert!(detail.contains("64x64x3"));
            assert!(detail.contains("128x128x3"));
        }
        other => panic!("expected a shape mismatch, got {other:?}"),
    }
}

#[test]
fn test_composition_rejects_swapped_models() {
    let generator = build_generator(32, 32, 3, 10).unwrap();
    let discriminator = build_discriminator(32, 32, 3).unwrap();
    assert!(GanPair::compose(discriminator, generator).is_err());
}
