//! Turns raw pointer input into routed instance events.

use std::time::{Duration, Instant};

use glam::{Vec2, Vec3};
use winit::event::MouseButton;

use crate::input::Input;
use crate::instancing::{EventKind, InstanceRef, Instances, PointerEvent, Routed};
use crate::picking::{InstanceHit, Ray};

const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(300);

/// What happened under the cursor this frame.
#[derive(Clone, Debug, Default)]
pub struct PointerOutcome {
    /// The nearest struck slot and the index of its batch.
    pub hit: Option<(usize, InstanceHit)>,
    /// The instance under the cursor.
    pub target: Option<InstanceRef>,
    /// A handler stopped propagation, so controls behind the instances
    /// should ignore this frame's pointer input.
    pub captured: bool,
}

impl PointerOutcome {
    fn record(&mut self, routed: Routed) {
        self.captured |= routed.propagation_stopped();
    }
}

/// Tracks hover, press and click state across frames for one pointer.
///
/// Each frame the host builds the cursor ray and calls
/// [`dispatch`](Self::dispatch) with every batch, before the user's frame
/// code runs. The nearest hit across all batches receives the events.
#[derive(Debug)]
pub struct PointerDispatcher {
    hovered: Option<InstanceRef>,
    /// Primary-button press target, which also receives the release.
    pressed: Option<InstanceRef>,
    last_click: Option<(InstanceRef, Instant)>,
    double_click_window: Duration,
}

impl Default for PointerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerDispatcher {
    pub fn new() -> Self {
        Self {
            hovered: None,
            pressed: None,
            last_click: None,
            double_click_window: DOUBLE_CLICK_WINDOW,
        }
    }

    pub fn with_double_click_window(mut self, window: Duration) -> Self {
        self.double_click_window = window;
        self
    }

    pub fn hovered(&self) -> Option<&InstanceRef> {
        self.hovered.as_ref()
    }

    /// Route this frame's pointer input. `ray` is `None` when the cursor is
    /// outside the window.
    pub fn dispatch(
        &mut self,
        batches: &[Instances],
        input: &Input,
        ray: Option<Ray>,
        now: Instant,
    ) -> PointerOutcome {
        let mut outcome = PointerOutcome::default();

        let wants_hits = batches
            .iter()
            .any(|batch| !batch.handled_events().is_empty());
        let hit = match ray {
            Some(ray) if wants_hits => nearest_hit(batches, &ray),
            _ => None,
        };

        let mut pointer =
            PointerEvent::from_ray(ray.unwrap_or_else(|| Ray::new(Vec3::ZERO, Vec3::NEG_Z)));
        pointer.screen = input.cursor().unwrap_or(Vec2::ZERO);

        let target = hit.and_then(|(index, hit)| {
            pointer.point = hit.point;
            pointer.distance = hit.distance;
            batches[index].occupant(hit.slot)
        });
        outcome.hit = hit;
        outcome.target = target.clone();

        // Hover transitions
        if self.hovered != target {
            if let Some(previous) = self.hovered.take() {
                outcome.record(route_to(&previous, EventKind::PointerOut, &pointer));
            }
            if let Some((index, hit)) = hit.filter(|_| target.is_some()) {
                outcome.record(batches[index].route_event(hit.slot, EventKind::PointerOver, &pointer));
            }
            self.hovered = target.clone();
        }

        let Some((index, hit)) = hit.filter(|_| target.is_some()) else {
            self.release_without_target(input, &mut outcome, &pointer);
            return outcome;
        };
        let batch = &batches[index];
        let slot = hit.slot;

        if input.cursor_delta() != Vec2::ZERO {
            outcome.record(batch.route_event(slot, EventKind::PointerMove, &pointer));
        }

        for &button in input.buttons_pressed() {
            let mut event = pointer;
            event.button = Some(button);
            outcome.record(batch.route_event(slot, EventKind::PointerDown, &event));
            match button {
                MouseButton::Left => self.pressed = target.clone(),
                MouseButton::Right => {
                    outcome.record(batch.route_event(slot, EventKind::ContextMenu, &event));
                }
                _ => {}
            }
        }

        for &button in input.buttons_released() {
            let mut event = pointer;
            event.button = Some(button);
            outcome.record(batch.route_event(slot, EventKind::PointerUp, &event));

            if button != MouseButton::Left {
                continue;
            }
            match self.pressed.take() {
                Some(pressed) if Some(&pressed) == target.as_ref() => {
                    outcome.record(batch.route_event(slot, EventKind::Click, &event));
                    if self.is_double_click(&pressed, now) {
                        self.last_click = None;
                        outcome.record(batch.route_event(slot, EventKind::DoubleClick, &event));
                    } else {
                        self.last_click = Some((pressed, now));
                    }
                }
                Some(pressed) => {
                    // Released away from the press target; it still hears the release
                    outcome.record(route_to(&pressed, EventKind::PointerUp, &event));
                }
                None => {}
            }
        }

        let wheel = input.scroll_delta().y;
        if wheel != 0.0 {
            let mut event = pointer;
            event.wheel_delta = wheel;
            outcome.record(batch.route_event(slot, EventKind::Wheel, &event));
        }

        outcome
    }

    fn release_without_target(
        &mut self,
        input: &Input,
        outcome: &mut PointerOutcome,
        pointer: &PointerEvent,
    ) {
        if !input.mouse_released(MouseButton::Left) {
            return;
        }
        if let Some(pressed) = self.pressed.take() {
            let mut event = *pointer;
            event.button = Some(MouseButton::Left);
            outcome.record(route_to(&pressed, EventKind::PointerUp, &event));
        }
    }

    fn is_double_click(&self, target: &InstanceRef, now: Instant) -> bool {
        self.last_click.as_ref().is_some_and(|(previous, at)| {
            previous == target && now.saturating_duration_since(*at) <= self.double_click_window
        })
    }
}

fn nearest_hit(batches: &[Instances], ray: &Ray) -> Option<(usize, InstanceHit)> {
    batches
        .iter()
        .enumerate()
        .filter_map(|(index, batch)| batch.raycast(ray).map(|hit| (index, hit)))
        .min_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
}

fn route_to(target: &InstanceRef, kind: EventKind, pointer: &PointerEvent) -> Routed {
    match target.batch() {
        Some(batch) => batch.route_to(target, kind, pointer),
        None => Routed::Dropped,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::instancing::{Instance, InstanceProps};

    type Log = Rc<RefCell<Vec<(usize, EventKind)>>>;

    fn logging(id: usize, log: &Log) -> InstanceProps {
        let mut props = InstanceProps::new();
        for kind in EventKind::ALL {
            let log = Rc::clone(log);
            props = props.on(kind, move |_| log.borrow_mut().push((id, kind)));
        }
        props
    }

    fn down_at(x: f32) -> Option<Ray> {
        Some(Ray::new(Vec3::new(x, 0.0, 10.0), Vec3::NEG_Z))
    }

    fn setup(log: &Log) -> (Instances, Vec<Instance>) {
        let batch = Instances::create(4, None).unwrap();
        let instances = (0..2)
            .map(|i| Instance::mount(&batch, logging(i, log).position(Vec3::new(i as f32 * 3.0, 0.0, 0.0))))
            .collect();
        batch.sync();
        (batch, instances)
    }

    fn drain(log: &Log) -> Vec<(usize, EventKind)> {
        log.borrow_mut().drain(..).collect()
    }

    #[test]
    fn hover_moves_between_instances() {
        let log = Log::default();
        let (batch, _instances) = setup(&log);
        let batches = [batch];
        let mut pointer = PointerDispatcher::new();
        let input = Input::new();
        let now = Instant::now();

        pointer.dispatch(&batches, &input, down_at(0.0), now);
        assert_eq!(drain(&log), vec![(0, EventKind::PointerOver)]);

        pointer.dispatch(&batches, &input, down_at(0.0), now);
        assert!(drain(&log).is_empty());

        pointer.dispatch(&batches, &input, down_at(3.0), now);
        assert_eq!(
            drain(&log),
            vec![(0, EventKind::PointerOut), (1, EventKind::PointerOver)]
        );

        pointer.dispatch(&batches, &input, down_at(10.0), now);
        assert_eq!(drain(&log), vec![(1, EventKind::PointerOut)]);
        assert!(pointer.hovered().is_none());
    }

    #[test]
    fn press_and_release_on_same_instance_clicks() {
        let log = Log::default();
        let (batch, _instances) = setup(&log);
        let batches = [batch];
        let mut pointer = PointerDispatcher::new();
        let mut input = Input::new();
        let start = Instant::now();

        input.press_button(MouseButton::Left);
        pointer.dispatch(&batches, &input, down_at(3.0), start);
        input.begin_frame();
        input.release_button(MouseButton::Left);
        pointer.dispatch(&batches, &input, down_at(3.0), start);
        input.begin_frame();

        assert_eq!(
            drain(&log),
            vec![
                (1, EventKind::PointerOver),
                (1, EventKind::PointerDown),
                (1, EventKind::PointerUp),
                (1, EventKind::Click),
            ]
        );

        // Second click inside the window
        input.press_button(MouseButton::Left);
        pointer.dispatch(&batches, &input, down_at(3.0), start);
        input.begin_frame();
        input.release_button(MouseButton::Left);
        pointer.dispatch(&batches, &input, down_at(3.0), start + Duration::from_millis(200));

        assert_eq!(
            drain(&log),
            vec![
                (1, EventKind::PointerDown),
                (1, EventKind::PointerUp),
                (1, EventKind::Click),
                (1, EventKind::DoubleClick),
            ]
        );
    }

    #[test]
    fn release_elsewhere_notifies_press_target_without_click() {
        let log = Log::default();
        let (batch, _instances) = setup(&log);
        let batches = [batch];
        let mut pointer = PointerDispatcher::new();
        let mut input = Input::new();
        let now = Instant::now();

        input.press_button(MouseButton::Left);
        pointer.dispatch(&batches, &input, down_at(0.0), now);
        input.begin_frame();
        drain(&log);

        input.release_button(MouseButton::Left);
        pointer.dispatch(&batches, &input, down_at(10.0), now);
        assert_eq!(
            drain(&log),
            vec![(0, EventKind::PointerOut), (0, EventKind::PointerUp)]
        );
    }

    #[test]
    fn secondary_press_opens_context_menu() {
        let log = Log::default();
        let (batch, _instances) = setup(&log);
        let mut pointer = PointerDispatcher::new();
        let mut input = Input::new();
        input.press_button(MouseButton::Right);
        input.scroll(Vec2::new(0.0, 1.0));

        pointer.dispatch(&[batch], &input, down_at(0.0), Instant::now());
        assert_eq!(
            drain(&log),
            vec![
                (0, EventKind::PointerOver),
                (0, EventKind::PointerDown),
                (0, EventKind::ContextMenu),
                (0, EventKind::Wheel),
            ]
        );
    }

    #[test]
    fn nearest_batch_wins_and_capture_is_reported() {
        let near = Instances::create(1, None).unwrap();
        near.set_world(glam::Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0)));
        let far = Instances::create(1, None).unwrap();

        let near_hits = Rc::new(RefCell::new(0));
        let _top = {
            let near_hits = Rc::clone(&near_hits);
            Instance::mount(
                &near,
                InstanceProps::new().on(EventKind::PointerDown, move |event| {
                    *near_hits.borrow_mut() += 1;
                    event.stop_propagation();
                }),
            )
        };
        let _bottom = Instance::mount(
            &far,
            InstanceProps::new().on(EventKind::PointerDown, |_| panic!("occluded")),
        );
        near.sync();
        far.sync();

        let mut input = Input::new();
        input.press_button(MouseButton::Left);
        let outcome =
            PointerDispatcher::new().dispatch(&[far, near], &input, down_at(0.0), Instant::now());

        assert_eq!(*near_hits.borrow(), 1);
        assert!(outcome.captured);
        assert_eq!(outcome.hit.map(|(index, _)| index), Some(1));
    }

    #[test]
    fn batches_without_handlers_are_not_hit_tested() {
        let batch = Instances::create(1, None).unwrap();
        let _plain = Instance::mount(&batch, InstanceProps::new());
        batch.sync();

        let outcome =
            PointerDispatcher::new().dispatch(&[batch], &Input::new(), down_at(0.0), Instant::now());
        assert!(outcome.hit.is_none());
        assert!(!outcome.captured);
    }
}
