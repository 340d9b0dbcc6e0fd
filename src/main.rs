use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use lupe_lib::config::ShaderSelection;
use lupe_lib::rendering::{DrawOutcome, GpuBackend, OverlaySurface};
use lupe_lib::{
    apply_filter, transform, BuiltinAssets, CapturedFrame, ColorFilterMode, LayeredAssets,
    MagnifierError, MagnifierResult, MagnifierSession, MagnifierSettings, PngSnapshotSurface,
    Renderer, RendererHandle, SessionToken, ShaderAssetStore, ShaderProgramLoader, Shape,
    WgpuBackend, XcapProvider,
};

/// Live screen magnifier with pixel-art shaders.
#[derive(Parser, Debug)]
#[command(name = "lupe")]
#[command(about = "Magnify a region of the screen through GPU pixel-art shaders")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available shader ids
    Shaders {
        /// Directory of additional .shader assets
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Magnify a region of an image file
    Still {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Region left edge, in input pixels
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        x: i32,

        /// Region top edge, in input pixels
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        y: i32,

        /// Region side length
        #[arg(long, default_value_t = 200)]
        size: u32,

        #[arg(long, default_value_t = 2.5)]
        zoom: f32,

        /// Side length of the magnified output
        #[arg(long, default_value_t = 500)]
        output_size: u32,

        #[arg(long, default_value = "normal", help = "Color filter: normal, inverse, monochrome")]
        filter: ColorFilterMode,

        #[arg(long, default_value = "square", help = "Output shape: square, circle")]
        shape: Shape,

        /// Shader id, or "none" for passthrough (only used with --gpu)
        #[arg(long, default_value = "2xbr")]
        shader: String,

        /// Directory of additional .shader assets
        #[arg(long)]
        shader_dir: Option<PathBuf>,

        /// Render through the GPU shader pipeline
        #[arg(long)]
        gpu: bool,
    },

    /// Magnify the live screen into a PNG snapshot
    Live {
        /// Monitor id; the primary monitor when omitted
        #[arg(long)]
        monitor: Option<u32>,

        /// How long to run
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// JSON settings file
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Directory of additional .shader assets
        #[arg(long)]
        shader_dir: Option<PathBuf>,

        /// PNG file kept up to date with the latest rendered frame
        #[arg(long)]
        snapshot: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let result = match args.command {
        Command::Shaders { dir } => list_shaders(dir.as_deref()),
        Command::Still {
            input,
            output,
            x,
            y,
            size,
            zoom,
            output_size,
            filter,
            shape,
            shader,
            shader_dir,
            gpu,
        } => {
            let options = StillOptions {
                position: (x, y),
                size,
                zoom,
                output_size,
                filter,
                shape,
                shader: ShaderSelection::from_id(&shader),
                gpu,
            };
            magnify_still(&input, &output, &options, shader_store(shader_dir.as_deref()))
        },
        Command::Live {
            monitor,
            seconds,
            settings,
            shader_dir,
            snapshot,
        } => run_live(
            monitor,
            Duration::from_secs(seconds),
            settings.as_deref(),
            shader_store(shader_dir.as_deref()),
            snapshot,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        },
    }
}

fn shader_store(dir: Option<&Path>) -> Arc<dyn ShaderAssetStore> {
    match dir {
        Some(dir) => Arc::new(LayeredAssets::with_directory(dir)),
        None => Arc::new(BuiltinAssets),
    }
}

fn list_shaders(dir: Option<&Path>) -> MagnifierResult<()> {
    for id in shader_store(dir).list_available() {
        println!("{}", id);
    }
    Ok(())
}

struct StillOptions {
    position: (i32, i32),
    size: u32,
    zoom: f32,
    output_size: u32,
    filter: ColorFilterMode,
    shape: Shape,
    shader: ShaderSelection,
    gpu: bool,
}

fn magnify_still(
    input: &Path,
    output: &Path,
    options: &StillOptions,
    store: Arc<dyn ShaderAssetStore>,
) -> MagnifierResult<()> {
    let image = image::open(input)?.to_rgba8();
    log::info!(
        "Loaded {} ({}x{})",
        input.display(),
        image.width(),
        image.height()
    );

    let frame = CapturedFrame::from_rgba_image(image);
    let magnified = transform(
        &frame,
        options.position,
        options.size,
        options.output_size,
        options.zoom,
    )?;
    let crop = magnified.crop();
    let magnified = apply_filter(magnified, options.filter);
    log::info!(
        "Crop [{}, {}, {}, {}] -> {}x{}",
        crop.left,
        crop.top,
        crop.right,
        crop.bottom,
        magnified.width(),
        magnified.height()
    );

    if !options.gpu {
        magnified.image().save(output)?;
        log::info!("Wrote {}", output.display());
        return Ok(());
    }

    let backend: Box<dyn GpuBackend> = Box::new(WgpuBackend::new()?);
    let handle = RendererHandle::new();
    let surface = Box::new(PngSnapshotSurface::new(output).keep_last_frame());
    let mut renderer = Renderer::new(backend, ShaderProgramLoader::new(store), &handle, surface)?;

    handle.set_shape(options.shape);
    handle.set_shader(options.shader.as_id());
    handle.submit_frame(magnified);

    match renderer.draw_cycle() {
        DrawOutcome::Drawn => {
            log::info!(
                "Rendered with '{}' to {}",
                renderer.active_shader().unwrap_or("passthrough"),
                output.display()
            );
            Ok(())
        },
        other => Err(MagnifierError::GpuDraw(format!(
            "nothing rendered ({:?})",
            other
        ))),
    }
}

fn run_live(
    monitor: Option<u32>,
    duration: Duration,
    settings: Option<&Path>,
    store: Arc<dyn ShaderAssetStore>,
    snapshot: PathBuf,
) -> MagnifierResult<()> {
    let settings = match settings {
        Some(path) => MagnifierSettings::from_file(path)?,
        None => MagnifierSettings::default(),
    };
    let token = monitor.map_or(SessionToken::Primary, SessionToken::Monitor);

    let mut session = MagnifierSession::new(&settings, Arc::new(XcapProvider::default()), store)?
        .with_surface(Arc::new(move || {
            Box::new(PngSnapshotSurface::new(snapshot.clone()).keep_last_frame())
                as Box<dyn OverlaySurface>
        }));

    let (width, height) = session.start(&token)?;
    log::info!("Magnifying {} ({}x{}) for {:?}", token, width, height, duration);

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if !session.is_capturing() {
            session.stop();
            return Err(MagnifierError::ExternalRevocation(format!(
                "capture of {} ended early",
                token
            )));
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let stats = session.capture_stats();
    let drawn = session.frames_drawn();
    session.stop();
    log::info!(
        "Done: {} frames drawn, capture {}",
        drawn,
        serde_json::to_string(&stats)?
    );
    Ok(())
}
