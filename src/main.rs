use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

use env_logger::Env;
use log::{debug, error};
use rand::Rng;
use winit::window::CursorIcon;

use herd::{
    AppConfig, AppError, Color, DragController, DragUpdate, EventKind, Frame, Instance,
    InstanceProps, InstancesConfig, KeyCode, MapControls, MouseButton, Vec3,
};

const GRID: usize = 50;
const CAPACITY: usize = GRID * GRID;
const INITIAL_RANGE: usize = 400;
const RANGE_STEP: usize = 50;
const PALETTE: [&str; 4] = ["#ff7675", "#74b9ff", "#26de81", "#F79F1F"];

fn title(range: usize) -> String {
    format!("herd: {range} of {CAPACITY} blocks (Up/Down to change)")
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("wgpu_hal", log::LevelFilter::Warn)
        .filter_module("wgpu_core", log::LevelFilter::Warn)
        .init();

    let config = AppConfig::new().title(title(INITIAL_RANGE)).size(1280, 800);

    let result = herd::run_with_config(config, |ctx| {
        let palette = PALETTE
            .iter()
            .map(|hex| Color::from_hex(hex))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| AppError::Setup(err.to_string()))?;

        let cube = ctx.mesh_cube();
        let blocks = ctx.instances(
            InstancesConfig::new()
                .label("blocks")
                .capacity(CAPACITY)
                .range(INITIAL_RANGE),
            cube,
        )?;

        let drag = Rc::new(RefCell::new(DragController::new()));
        let mut rng = rand::rng();

        let mut grid = Vec::with_capacity(CAPACITY);
        for x in 0..GRID {
            for y in 0..GRID {
                let color = palette[rng.random_range(0..palette.len())];
                let drag = drag.clone();
                let props = InstanceProps::new()
                    .position(Vec3::new(x as f32, y as f32, 0.0))
                    .uniform_scale(0.8)
                    .color(color)
                    .on(EventKind::PointerDown, move |event| {
                        if event.pointer.button == Some(MouseButton::Left) {
                            drag.borrow_mut().begin(event);
                            event.stop_propagation();
                        }
                    });
                grid.push(Instance::mount(&blocks, props));
            }
        }

        let mut controls = MapControls::new()
            .up(Vec3::Z)
            .looking_from(Vec3::new(0.0, 0.0, 30.0), Vec3::ZERO);
        ctx.set_camera(controls.camera());

        let mut range = INITIAL_RANGE;
        let mut was_dragging = false;

        Ok(move |frame: &mut Frame| {
            let mut next_range = range;
            if frame.input.key_pressed(KeyCode::ArrowUp) {
                next_range = (range + RANGE_STEP).min(CAPACITY);
            }
            if frame.input.key_pressed(KeyCode::ArrowDown) {
                next_range = range.saturating_sub(RANGE_STEP);
            }
            if next_range != range {
                range = next_range;
                blocks.set_range(Some(range));
                frame.set_title(&title(range));
            }

            let mut drag = drag.borrow_mut();
            if frame.input.mouse_released(MouseButton::Left) {
                if let Some(target) = drag.end() {
                    debug!("Dropped block at {:?}", target.position());
                }
            } else if let Some(ray) = frame.ray {
                if drag.update(&ray) == DragUpdate::Cancelled {
                    debug!("Drag target vanished");
                }
            }

            let dragging = drag.is_dragging();
            if dragging != was_dragging {
                frame.set_cursor(if dragging {
                    CursorIcon::Grabbing
                } else {
                    CursorIcon::Default
                });
                was_dragging = dragging;
            }

            controls.enabled = !dragging;
            if !frame.pointer.captured {
                controls.update(frame.input, frame.viewport());
            }
            *frame.camera = controls.camera();

            // Blocks unmount on drop, so the grid lives as long as this closure.
            let _ = &grid;
        })
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
