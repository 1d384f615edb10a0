//! Animated model viewer
//!
//! Usage: `cargo run --example viewer -- --model walker.mesh --diffuse skin.png`
//!
//! Controls: drag with the left mouse button to orbit, scroll to zoom,
//! F1/F2 switch between wgpu and Vulkan, W wireframe, M multisampling,
//! A anisotropic filtering, V vsync, Escape quits.

use clap::Parser;
use model_viewer::{BackendType, ViewerApp, ViewerConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// Renderer to start with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    #[default]
    Wgpu,
    Vulkan,
}

impl From<CliBackend> for BackendType {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Wgpu => BackendType::Wgpu,
            CliBackend::Vulkan => BackendType::Vulkan,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Skinned model viewer with wgpu and Vulkan renderers")]
struct Args {
    /// Mesh file to show; a built-in animated column is used when omitted
    #[arg(long)]
    model: Option<PathBuf>,

    /// Diffuse texture (PNG, JPEG or DDS)
    #[arg(long)]
    diffuse: Option<PathBuf>,

    /// Tangent-space normal map
    #[arg(long)]
    normal: Option<PathBuf>,

    /// Animation clip to play
    #[arg(long, default_value = "Take1")]
    clip: String,

    #[arg(long, default_value = "wgpu", value_enum)]
    backend: CliBackend,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    #[arg(long)]
    no_vsync: bool,

    /// Multisample count, 0 disables
    #[arg(long, default_value = "0")]
    msaa: u32,

    #[arg(long, default_value = "1")]
    anisotropy: u32,

    #[arg(long)]
    wireframe: bool,

    /// Animation playback speed
    #[arg(long, default_value = "1.0")]
    time_scale: f32,
}

impl From<Args> for ViewerConfig {
    fn from(args: Args) -> Self {
        Self {
            width: args.width,
            height: args.height,
            backend: args.backend.into(),
            vsync: !args.no_vsync,
            msaa_level: args.msaa,
            anisotropy: args.anisotropy,
            wireframe: args.wireframe,
            model_path: args.model,
            diffuse_texture: args.diffuse,
            normal_texture: args.normal,
            clip: args.clip,
            time_scale: args.time_scale,
            ..Default::default()
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ViewerConfig::from(Args::parse());
    log::info!("Starting viewer on {}", config.backend);

    match ViewerApp::new(config).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Viewer stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
