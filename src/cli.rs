use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use indicatif::ProgressBar;
use kdtrace::{
    PerspectiveCamera, RenderMode, RenderSettings, Scene, ScreenSize,
    geometry::{WorldMatrix, WorldVector},
    kd_tree::BuildSettings,
    render,
    scene::{load_obj, primitives},
    shading::{AreaLight, Filter, HeadlightMaterial, LambertMaterial, PhongMaterial, PointLight, Texture2D},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    Single,
    Packet,
    Jittered,
    Adaptive,
}

/// Renders an OBJ model or a procedural scene with the kd-tree ray tracer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// OBJ file to render, a grid of spheres when missing
    obj: Option<PathBuf>,

    /// Output PNG file
    #[arg(short, long, default_value = "render.png")]
    output: PathBuf,

    #[arg(long, default_value_t = 1024)]
    width: u32,

    #[arg(long, default_value_t = 768)]
    height: u32,

    #[arg(short, long, value_enum, default_value_t = Mode::Packet)]
    mode: Mode,

    /// Samples per pixel in the jittered mode
    #[arg(long, default_value_t = NonZeroU32::new(4).unwrap())]
    samples: NonZeroU32,

    /// Subdivision levels of the adaptive mode
    #[arg(long, default_value_t = NonZeroU32::new(3).unwrap())]
    adaptive_depth: NonZeroU32,

    /// Color difference that makes the adaptive mode subdivide a pixel
    #[arg(long, default_value_t = 0.01)]
    threshold: f32,

    #[arg(long, default_value_t = NonZeroU32::new(32).unwrap())]
    tile_size: NonZeroU32,

    /// Worker threads, one per logical CPU by default
    #[arg(short, long)]
    workers: Option<NonZeroUsize>,

    /// Number of spheres along each side of the procedural scene
    #[arg(long, default_value_t = 4)]
    spheres: u32,

    /// Shade the model with a headlight instead of a point light
    #[arg(long)]
    headlight: bool,

    /// Phong material with this image as a texture, for OBJ models
    #[arg(long)]
    texture: Option<PathBuf>,

    /// Light the OBJ model with an area light of this radius, for soft shadows
    #[arg(long)]
    soft_shadows: Option<f32>,

    /// Print statistics of the kd-trees after building them
    #[arg(long)]
    statistics: bool,
}

fn load_scene(args: &Args, settings: &BuildSettings) -> anyhow::Result<Scene> {
    let Some(path) = &args.obj else {
        return Ok(primitives::demo_spheres(args.spheres.max(1), settings)?);
    };

    let mut scene = Scene::new();
    scene.build_settings = settings.clone();
    let material = if args.headlight {
        scene.add_material(Arc::new(HeadlightMaterial::default()))
    } else if let Some(texture_path) = &args.texture {
        let image = image::open(texture_path)
            .with_context(|| format!("Loading {}", texture_path.display()))?
            .to_rgb8();
        let texture = Texture2D::builder().image(image).filter(Filter::Linear).build()?;
        scene.add_material(Arc::new(PhongMaterial::builder().texture(Arc::new(texture)).build()))
    } else {
        scene.add_material(Arc::new(LambertMaterial::default()))
    };

    let mut geometry = load_obj(path)
        .with_context(|| format!("Loading {}", path.display()))?
        .build(settings);
    for triangle in &mut geometry.tri_desc {
        triangle.material = material;
    }
    let bounds = geometry.bounds().clone();
    let geometry = scene.add_geometry(geometry)?;
    scene.instantiate(geometry, WorldMatrix::identity())?;

    if !args.headlight {
        let size = bounds.size().norm();
        let light_position = bounds.max + WorldVector::new(0.0, size, size);
        match args.soft_shadows {
            Some(radius) => scene.add_light(Arc::new(
                AreaLight::builder()
                    .position(light_position)
                    .radius(radius)
                    .samples(NonZeroU32::new(16).unwrap())
                    .attenuation([1.0, 0.0, 0.0])
                    .build(),
            )),
            None => scene.add_light(Arc::new(
                PointLight::builder()
                    .position(light_position)
                    .attenuation([1.0, 0.0, 0.0])
                    .build(),
            )),
        };
    }

    scene.prepare_frame();
    Ok(scene)
}

/// Camera looking at the center of the scene from the front and slightly above.
fn frame_scene(scene: &Scene, viewport: ScreenSize) -> PerspectiveCamera {
    let bounds = scene.bounds();
    let center = bounds.center();
    let radius = (bounds.size().norm() / 2.0).max(1e-3);
    let position = center + WorldVector::new(0.0, 0.5, 1.0).normalize() * (2.5 * radius);

    PerspectiveCamera::builder()
        .position(position)
        .look_at(center)
        .fovy(45.0)
        .near(0.1)
        .viewport(viewport)
        .build()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.width > 0 && args.height > 0, "Image size must be positive");

    let build_settings = BuildSettings::default();
    let scene = load_scene(&args, &build_settings)?;
    info!(
        geometries = scene.geometries().len(),
        instances = scene.instances().len(),
        "Scene ready"
    );

    if args.statistics {
        for (index, geometry) in scene.geometries().iter_enumerated() {
            println!("Geometry {index:?}, {} triangles:", geometry.triangle_count());
            geometry.kd_tree().print_statistics();
        }
        println!("Instance tree:");
        scene.instance_tree().print_statistics();
    }

    anyhow::ensure!(!scene.bounds().is_degenerate(), "The scene is empty");
    let camera = frame_scene(&scene, ScreenSize::new(args.width, args.height));
    let settings = RenderSettings::builder()
        .tile_size(args.tile_size)
        .mode(match args.mode {
            Mode::Single => RenderMode::Single,
            Mode::Packet => RenderMode::Packet,
            Mode::Jittered => RenderMode::Jittered { samples: args.samples },
            Mode::Adaptive => RenderMode::Adaptive {
                max_depth: args.adaptive_depth,
                threshold: args.threshold,
            },
        })
        .maybe_workers(args.workers)
        .build();

    let bar = ProgressBar::no_length();
    let mut render_progress = render(Arc::new(scene), camera, settings, |_| {}, {
        let bar = bar.clone();
        move |_| bar.inc(1)
    })?;
    bar.set_length(render_progress.progress().1 as u64);

    render_progress.wait();
    bar.finish();

    if args.statistics {
        println!("{:?}", render_progress.counters());
    }

    render_progress
        .image()
        .save(&args.output)
        .with_context(|| format!("Writing {}", args.output.display()))?;
    info!(output = %args.output.display(), "Image saved");

    Ok(())
}
