use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{debug, info};

use crate::{
    camera::Camera,
    renderer::{FrameBuffer, RenderSettings, worker::Worker},
    scene::Scene,
    screen_block::ScreenBlock,
    tracer::{TraversalCounters, Tracer},
};

/// Starts rendering the scene in background threads.
/// The scene must be prepared, see `Scene::prepare_frame`.
pub fn render<
    C: Camera + 'static,
    F1: Fn(ScreenBlock) + Send + Sync + 'static,
    F2: Fn(ScreenBlock) + Send + Sync + 'static,
>(
    scene: Arc<Scene>,
    camera: C,
    settings: RenderSettings,
    started_tile_callback: F1,
    finished_tile_callback: F2,
) -> anyhow::Result<RenderProgress> {
    anyhow::ensure!(!scene.is_dirty(), "Scene must be prepared before rendering");

    let viewport = camera.viewport();
    let worker_count = settings.workers.map_or_else(num_cpus::get, |count| count.get());
    let state = Arc::new(RenderState {
        scene,
        camera: Box::new(camera),
        settings,

        frame: Mutex::new(FrameBuffer::new(viewport)),
        counters: Mutex::new(TraversalCounters::default()),

        tile_ordering: ScreenBlock::from_size(viewport).tile_ordering(settings.tile_size.get()),
        next_tile_index: AtomicUsize::new(0),
        started: Instant::now(),
    });
    info!(
        width = viewport.x,
        height = viewport.y,
        tiles = state.tile_ordering.len(),
        workers = worker_count,
        mode = ?settings.mode,
        "Starting render"
    );

    let started_tile_callback = Arc::new(started_tile_callback);
    let finished_tile_callback = Arc::new(finished_tile_callback);
    let cores = core_affinity::get_core_ids().unwrap_or_default();

    let threads = (0..worker_count)
        .map(|worker_id| {
            let state = Arc::clone(&state);
            let started_tile_callback = Arc::clone(&started_tile_callback);
            let finished_tile_callback = Arc::clone(&finished_tile_callback);
            let core = (!cores.is_empty()).then(|| cores[worker_id % cores.len()]);

            thread::Builder::new()
                .name(format!("worker{worker_id}"))
                .spawn(move || {
                    if let Some(core) = core {
                        core_affinity::set_for_current(core);
                    }

                    let mut worker = Worker::new();
                    let mut tracer = Tracer::new(&state.scene);
                    let mut buffer = Vec::new();

                    while let Some(tile) = state.get_next_tile() {
                        (started_tile_callback)(tile.clone());

                        worker.render_tile(&mut tracer, state.camera.as_ref(), state.settings.mode, tile, &mut buffer);
                        state.frame.lock().expect("Poisoned lock!").copy_tile(tile, &buffer);

                        (finished_tile_callback)(tile.clone());
                    }

                    let counters = tracer.take_counters();
                    debug!(worker_id, ?counters, "Worker finished");
                    *state.counters.lock().expect("Poisoned lock!") += &counters;
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RenderProgress {
        render_state: state,
        threads,
    })
}

pub struct RenderProgress {
    render_state: Arc<RenderState>,
    threads: Vec<JoinHandle<()>>,
}

impl RenderProgress {
    /// Return number of processed and total tiles.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.render_state.tile_ordering.len();
        let processed = self
            .render_state
            .next_tile_index
            .load(Ordering::Acquire)
            .min(total);
        (processed, total)
    }

    pub fn progress_percent(&self) -> f32 {
        let (processed, total) = self.progress();
        if total == 0 {
            return 100.0;
        }
        100.0 * (processed as f32) / (total as f32)
    }

    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(|handle| handle.is_finished())
    }

    /// Signal the workers to abort.
    /// Any running workers will still finish their tiles, but no new ones will be started.
    pub fn abort(&self) {
        self.render_state
            .next_tile_index
            .store(self.render_state.tile_ordering.len(), Ordering::Release);
    }

    /// Wait for the workers to finish.
    pub fn wait(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.threads
            .drain(..)
            .for_each(|handle| handle.join().unwrap());
        info!(
            elapsed = ?self.render_state.started.elapsed(),
            "Render finished"
        );
    }

    pub fn frame(&self) -> &Mutex<FrameBuffer> {
        &self.render_state.frame
    }

    pub fn image(&self) -> image::RgbImage {
        self.render_state.frame.lock().expect("Poisoned lock!").to_image()
    }

    /// Traversal counters of all workers that have already finished.
    pub fn counters(&self) -> TraversalCounters {
        *self.render_state.counters.lock().expect("Poisoned lock!")
    }
}

struct RenderState {
    scene: Arc<Scene>,
    camera: Box<dyn Camera>,
    settings: RenderSettings,

    frame: Mutex<FrameBuffer>,
    counters: Mutex<TraversalCounters>,

    tile_ordering: Vec<ScreenBlock>,
    next_tile_index: AtomicUsize,
    started: Instant,
}

impl RenderState {
    fn get_next_tile(&self) -> Option<&ScreenBlock> {
        let id = self.next_tile_index.fetch_add(1, Ordering::AcqRel);
        self.tile_ordering.get(id)
    }
}
