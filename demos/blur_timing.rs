// demos/blur_timing.rs
//
// Blur a synthetic RGB frame with every recommended launch configuration and
// print the device time of each launch.
//
// Usage:
//   cargo run --example blur_timing --release
//   cargo run --example blur_timing --release -- host 1920 1080 9 2.0
//
// Arguments (all optional, positional):
//   backend  auto | gpu | host   (default auto)
//   width height                 (default 1280 720)
//   kernel_size sigma            (default 5 1.0)
//
// Set RUST_LOG=debug to see per-launch logs from the engine.

use std::env;
use std::time::Duration;

use rudolf_filters::engine::{BackendKind, Engine, EngineConfig};
use rudolf_filters::filter::FilterParams;
use rudolf_filters::image::{Image, ImageData};

const RUNS: u32 = 10;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let backend = match args.get(1).map(String::as_str) {
        None | Some("auto") => BackendKind::Auto,
        Some("gpu") => BackendKind::Gpu,
        Some("host") => BackendKind::Host,
        Some(other) => {
            eprintln!("Unknown backend {other:?}; expected auto, gpu or host");
            std::process::exit(1);
        }
    };
    let arg = |i: usize, default: usize| args.get(i).and_then(|s| s.parse().ok()).unwrap_or(default);
    let (width, height) = (arg(2, 1280), arg(3, 720));
    let ksize = arg(4, 5);
    let sigma: f64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(1.0);

    let config = EngineConfig { backend, ..EngineConfig::default() };
    let engine = match Engine::startup(&config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let Some(blur) = engine.filter("blur") else {
        eprintln!("Error: blur filter not registered");
        std::process::exit(1);
    };

    let kernel = match blur.generate_kernel(ksize, &FilterParams::new().with("sigma", sigma)) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let mut img = Image::<u8>::new(width, height, 3);
    for y in 0..height {
        for x in 0..width {
            img.set(x, y, 0, (x % 256) as u8);
            img.set(x, y, 1, (y % 256) as u8);
            img.set(x, y, 2, if (x / 32 + y / 32) % 2 == 0 { 255 } else { 0 });
        }
    }
    let src: ImageData = img.into();

    println!("Backend: {}", engine.backend_name());
    println!("Image:   {width}×{height}×3 u8");
    println!("Kernel:  {}×{} σ={sigma}", kernel.size(), kernel.size());
    println!();
    println!("{:<8} {:>12} {:>12} {:>12}", "config", "min (ms)", "mean (ms)", "max (ms)");

    for cfg in blur.recommended_launch_configs() {
        let launch = cfg.for_image(width, height);
        let mut times = Vec::with_capacity(RUNS as usize);
        for _ in 0..RUNS {
            match blur.process(&src, &kernel, &launch) {
                Ok(out) => times.push(out.elapsed),
                Err(e) => {
                    println!("{:<8} failed: {e}", cfg.name);
                    break;
                }
            }
        }
        if times.is_empty() {
            continue;
        }
        let ms = |d: Duration| d.as_secs_f64() * 1e3;
        let min = times.iter().copied().min().unwrap_or_default();
        let max = times.iter().copied().max().unwrap_or_default();
        let mean = times.iter().sum::<Duration>() / times.len() as u32;
        println!("{:<8} {:>12.3} {:>12.3} {:>12.3}", cfg.name, ms(min), ms(mean), ms(max));
    }

    engine.shutdown();
}
