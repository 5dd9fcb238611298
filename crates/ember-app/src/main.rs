// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Parser;
use ember_core::init_tracing;
use ember_render::{GpuResource, RenderSize};
use ember_render_vk::{
    select_adapter, Context, ContextBuilder, LogicalDevice, Pipeline, PresentationSurface, Shader,
    ShaderStage, SwapChain,
};
use tracing::{info, warn};

mod config;

use config::{load_cfg, AppCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,
    /// Vertex shader SPIR-V, overrides [shaders].vertex
    #[arg(long)]
    vertex: Option<PathBuf>,
    /// Fragment shader SPIR-V, overrides [shaders].fragment
    #[arg(long)]
    fragment: Option<PathBuf>,
    /// Stop after printing the selected adapter
    #[arg(long)]
    list_only: bool,
}

fn builder_from(cfg: &AppCfg) -> ContextBuilder {
    let mut builder = ContextBuilder::new();
    builder
        .set_app_name(cfg.window.title.as_str())
        .set_window_size(RenderSize::new(cfg.window.width, cfg.window.height))
        .set_validation(cfg.instance.validation)
        .add_required_extensions();
    if cfg.instance.all_extensions {
        builder.add_all_extensions();
    }
    for ext in &cfg.instance.extensions {
        builder.add_extension(ext.as_str());
    }
    for layer in &cfg.instance.layers {
        builder.add_layer(layer.as_str());
    }
    for ext in &cfg.instance.device_extensions {
        builder.add_device_extension(ext.as_str());
    }
    builder
}

/// `.vert`/`.frag` style names win over the slot the path was configured in.
fn load_shader<'a>(
    device: &'a LogicalDevice<'a>,
    path: &Path,
    slot: ShaderStage,
) -> Result<Shader<'a>> {
    let stage = ShaderStage::from_path(path).unwrap_or(slot);
    if stage != slot {
        warn!("{} looks like a {:?} shader, not {:?}", path.display(), stage, slot);
    }
    let mut shader = Shader::from_file(device, stage, path)
        .with_context(|| format!("loading {}", path.display()))?;
    shader
        .create()
        .with_context(|| format!("compiling {}", path.display()))?;
    Ok(shader)
}

fn run(context: &Context, cfg: &AppCfg, args: &Args) -> Result<()> {
    // STRICT ORDER:
    // surface → adapter scan → device → swap chain (+views) → shaders → pipeline.
    // Each object borrows the ones before it; they drop in reverse.
    let mut surface = PresentationSurface::new(context);
    surface.create().context("creating presentation surface")?;

    let mut adapters = context.enumerate_adapters()?;
    for adapter in &mut adapters {
        adapter.find_queue_families(&surface)?;
    }
    let adapter = select_adapter(adapters).context("selecting adapter")?;
    println!("{}", adapter.name());
    if args.list_only {
        return Ok(());
    }

    let device = adapter.create_device().context("creating logical device")?;

    let mut swap_chain = SwapChain::new(&device, &surface);
    swap_chain.create().context("creating swap chain")?;
    swap_chain
        .create_image_views()
        .context("creating swap chain image views")?;

    let vertex = args.vertex.as_ref().or(cfg.shaders.vertex.as_ref());
    let fragment = args.fragment.as_ref().or(cfg.shaders.fragment.as_ref());
    let (Some(vertex), Some(fragment)) = (vertex, fragment) else {
        info!("no vertex/fragment pair configured, stopping before the pipeline");
        return Ok(());
    };

    let vertex = load_shader(&device, vertex, ShaderStage::Vertex)?;
    let fragment = load_shader(&device, fragment, ShaderStage::Fragment)?;

    let mut pipeline = Pipeline::new(&device, &surface);
    pipeline.add_shader_stage(&vertex).add_shader_stage(&fragment);
    pipeline.create().context("creating graphics pipeline")?;
    let extent = pipeline.extent();
    info!(
        "pipeline ready: {:?}, {}x{}",
        pipeline.format(),
        extent.width,
        extent.height
    );

    // STRICT TEARDOWN ORDER: reverse of the above.
    drop(pipeline);
    drop(fragment);
    drop(vertex);
    drop(swap_chain);
    drop(device);
    surface.destroy();
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);

    let mut context = builder_from(&cfg)
        .create()
        .context("creating rendering context")?;
    let result = run(&context, &cfg, &args);
    context.destroy();
    result
}
