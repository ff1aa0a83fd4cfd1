// tests/test_engine.rs — Engine startup/shutdown and registry access.

use rudolf_filters::engine::{BackendKind, Engine, EngineConfig};
use rudolf_filters::filter::{FilterError, FilterParams};
use rudolf_filters::image::{Image, ImageData};
use rudolf_filters::launch::BlockShape;

#[test]
fn host_engine_runs_blur_by_name() {
    let engine = Engine::startup(&EngineConfig::host()).unwrap();
    assert_eq!(engine.registry().names().collect::<Vec<_>>(), vec!["blur"]);

    let blur = engine.filter("blur").unwrap();
    assert!(!blur.description().is_empty());
    let kernel = blur.generate_kernel(5, &FilterParams::new().with("sigma", 1.2)).unwrap();
    let src: ImageData = Image::filled(40, 30, &[128u8]).into();

    for cfg in blur.recommended_launch_configs() {
        let out = blur.process(&src, &kernel, &cfg.for_image(40, 30)).unwrap();
        let img = out.image.as_u8().unwrap();
        assert_eq!(img.get(20, 15, 0), 128, "config {}", cfg.name);
    }
    assert_eq!(engine.live_allocations(), 0);
    engine.shutdown();
}

#[test]
fn unknown_filter_is_none() {
    let engine = Engine::startup(&EngineConfig::host()).unwrap();
    assert!(engine.filter("sticker").is_none());
}

#[test]
fn host_memory_limit_is_applied() {
    let config = EngineConfig::from_json(r#"{ "backend": "host", "host_memory_limit": 1024 }"#).unwrap();
    assert_eq!(config.backend, BackendKind::Host);
    let engine = Engine::startup(&config).unwrap();
    let blur = engine.filter("blur").unwrap();
    let src: ImageData = Image::<f32>::new(64, 64, 1).into();
    let kernel = blur.generate_kernel(3, &FilterParams::new()).unwrap();
    let launch = rudolf_filters::launch::LaunchConfig::covering(BlockShape::square(8), 64, 64);
    let err = blur.process(&src, &kernel, &launch).unwrap_err();
    assert!(matches!(err, FilterError::Device(_)));
    assert_eq!(engine.live_allocations(), 0);
}

#[test]
fn descriptor_serializes_for_configuration_uis() {
    let engine = Engine::startup(&EngineConfig::host()).unwrap();
    let json = engine.filter("blur").unwrap().parameter_descriptor().to_json().unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["kernel_size"]["type"], "int");
    assert_eq!(v["kernel_size"]["default"], 5);
    assert_eq!(v["kernel_size"]["min"], 3);
    assert_eq!(v["kernel_size"]["max"], 31);
    assert_eq!(v["sigma"]["type"], "float");
    assert_eq!(v["sigma"]["default"], 1.0);
}

#[test]
#[ignore = "may create a Vulkan device in-process (dzn crashes on exit)"]
fn auto_backend_always_starts() {
    // Falls back to the host accelerator on machines without a GPU.
    let engine = Engine::startup(&EngineConfig::default()).unwrap();
    assert!(engine.filter("blur").is_some());
    engine.shutdown();
}
