//! Suspended request continuations.
//!
//! A handler that needs engine time (a timed wait, a key hold, a condition,
//! a scripted sequence) returns a [`Task`] instead of a response. The bridge
//! stores the task on the connection and advances it once per engine tick;
//! when [`Task::poll`] yields a value, the response is written and the
//! connection closed. The two legal suspension points are the next frame
//! tick and an engine-clock deadline.

use std::collections::VecDeque;

use glam::Vec2;
use log::warn;
use serde_json::{json, Value};

use crate::core::input::{
    action_event, key_event, mouse_button_event, mouse_motion_event, node_click_point,
    resolve_key, ClickTarget, KeyAction, Step,
};
use crate::core::wait::Condition;
use crate::engine::input::MouseButton;
use crate::engine::{Engine, InstanceId, SignalEmission, SubId};

use super::{attach_observations, Ctx, Observe};

/// When a deferred press/release half fires.
#[derive(Debug, Clone, Copy)]
pub enum Deadline {
    /// Strictly after the given frame (one-frame spacing).
    Frame(u64),
    /// At or after the given engine-clock time.
    Clock(f64),
}

impl Deadline {
    fn reached(&self, engine: &dyn Engine) -> bool {
        match self {
            Deadline::Frame(f) => engine.frame() > *f,
            Deadline::Clock(t) => engine.engine_time() >= *t,
        }
    }
}

#[derive(Debug)]
pub enum Task {
    /// Key pressed at dispatch; release pending.
    KeyRelease {
        keycode: u32,
        deadline: Deadline,
        base: Value,
    },
    /// Mouse button pressed at dispatch; release pending one frame later.
    ClickRelease {
        button: MouseButton,
        position: Vec2,
        after_frame: u64,
        base: Value,
        observe: Observe,
    },
    /// Fixed engine-clock delay.
    Wait {
        until: f64,
        base: Value,
        observe: Observe,
    },
    /// Condition poll with deadline.
    WaitFor {
        cond: Condition,
        started: f64,
        deadline: f64,
        poll_every: f64,
        next_poll: f64,
        /// One-shot signal subscription (sub, node, signal name).
        signal_sub: Option<(SubId, InstanceId, String)>,
        observe: Observe,
    },
    /// Scripted input steps, strictly ordered.
    Sequence {
        remaining: VecDeque<Step>,
        active: Option<ActiveStep>,
        started: f64,
        executed: usize,
        observe: Observe,
    },
}

/// The in-flight half of a sequence step.
#[derive(Debug)]
pub enum ActiveStep {
    WaitUntil(f64),
    KeyRelease { keycode: u32, deadline: Deadline },
    ClickRelease { position: Vec2, after_frame: u64 },
}

impl Task {
    /// Advance one tick. `Some(value)` completes the request.
    pub fn poll(&mut self, ctx: &mut Ctx<'_>, emissions: &[SignalEmission]) -> Option<Value> {
        match self {
            Task::KeyRelease {
                keycode,
                deadline,
                base,
            } => {
                if !deadline.reached(ctx.engine) {
                    return None;
                }
                ctx.engine.dispatch_input(key_event(*keycode, false));
                Some(base.take())
            }

            Task::ClickRelease {
                button,
                position,
                after_frame,
                base,
                observe,
            } => {
                if ctx.engine.frame() <= *after_frame {
                    return None;
                }
                ctx.engine
                    .dispatch_input(mouse_button_event(*button, *position, false, false));
                let mut out = base.take();
                attach_observations(ctx, &mut out, observe);
                Some(out)
            }

            Task::Wait {
                until,
                base,
                observe,
            } => {
                if ctx.engine.engine_time() < *until {
                    return None;
                }
                let mut out = base.take();
                attach_observations(ctx, &mut out, observe);
                Some(out)
            }

            Task::WaitFor {
                cond,
                started,
                deadline,
                poll_every,
                next_poll,
                signal_sub,
                observe,
            } => {
                let now = ctx.engine.engine_time();
                let met = if let Some((sub, _, _)) = signal_sub {
                    emissions.iter().any(|e| e.sub == *sub)
                } else if now >= *next_poll {
                    *next_poll = now + *poll_every;
                    cond.check(ctx.engine, &mut ctx.state.refs)
                } else {
                    false
                };

                if met {
                    if let Some((sub, node, signal)) = signal_sub.take() {
                        ctx.engine.disconnect_signal(node, &signal, sub);
                    }
                    let mut out = json!({
                        "condition_met": true,
                        "elapsed": now - *started,
                    });
                    attach_observations(ctx, &mut out, observe);
                    return Some(out);
                }
                if now >= *deadline {
                    if let Some((sub, node, signal)) = signal_sub.take() {
                        ctx.engine.disconnect_signal(node, &signal, sub);
                    }
                    return Some(json!({
                        "condition_met": false,
                        "elapsed": now - *started,
                    }));
                }
                None
            }

            Task::Sequence {
                remaining,
                active,
                started,
                executed,
                observe,
            } => {
                loop {
                    if let Some(step) = active {
                        if !step_complete(ctx.engine, step) {
                            return None;
                        }
                        *active = None;
                    }
                    let Some(step) = remaining.pop_front() else {
                        let elapsed = ctx.engine.engine_time() - *started;
                        let mut out = json!({
                            "steps_executed": *executed,
                            "elapsed": elapsed,
                            "_description": format!("Executed {}-step input sequence", executed),
                        });
                        attach_observations(ctx, &mut out, observe);
                        return Some(out);
                    };
                    *executed += 1;
                    *active = start_step(ctx, step);
                }
            }
        }
    }

    /// The connection died under the task. Leave the engine in a sane state:
    /// pending releases fire immediately, signal subscriptions disconnect.
    pub fn abandon(self, engine: &mut dyn Engine) {
        match self {
            Task::KeyRelease { keycode, .. } => {
                engine.dispatch_input(key_event(keycode, false));
            }
            Task::ClickRelease {
                button, position, ..
            } => {
                engine.dispatch_input(mouse_button_event(button, position, false, false));
            }
            Task::WaitFor {
                signal_sub: Some((sub, node, signal)),
                ..
            } => {
                engine.disconnect_signal(node, &signal, sub);
            }
            Task::Sequence {
                active: Some(step), ..
            } => match step {
                ActiveStep::KeyRelease { keycode, .. } => {
                    engine.dispatch_input(key_event(keycode, false));
                }
                ActiveStep::ClickRelease { position, .. } => {
                    engine.dispatch_input(mouse_button_event(
                        MouseButton::Left,
                        position,
                        false,
                        false,
                    ));
                }
                ActiveStep::WaitUntil(_) => {}
            },
            _ => {}
        }
    }
}

fn step_complete(engine: &mut dyn Engine, step: &ActiveStep) -> bool {
    match step {
        ActiveStep::WaitUntil(t) => engine.engine_time() >= *t,
        ActiveStep::KeyRelease { keycode, deadline } => {
            if !deadline.reached(engine) {
                return false;
            }
            engine.dispatch_input(key_event(*keycode, false));
            true
        }
        ActiveStep::ClickRelease {
            position,
            after_frame,
        } => {
            if engine.frame() <= *after_frame {
                return false;
            }
            engine.dispatch_input(mouse_button_event(
                MouseButton::Left,
                *position,
                false,
                false,
            ));
            true
        }
    }
}

/// Begin one sequence step. `Some` means the step spans ticks; `None` means
/// it completed synchronously. Unresolvable targets log a warning and are
/// skipped, the sequence proceeds.
fn start_step(ctx: &mut Ctx<'_>, step: Step) -> Option<ActiveStep> {
    let now = ctx.engine.engine_time();
    let frame = ctx.engine.frame();
    match step {
        Step::Wait { seconds } => Some(ActiveStep::WaitUntil(now + seconds.max(0.0))),

        Step::Key {
            key,
            action,
            duration,
        } => {
            let Some(keycode) = resolve_key(&key) else {
                warn!("sequence: unknown key '{}', skipping", key);
                return None;
            };
            match action {
                KeyAction::Press => {
                    ctx.engine.dispatch_input(key_event(keycode, true));
                    None
                }
                KeyAction::Release => {
                    ctx.engine.dispatch_input(key_event(keycode, false));
                    None
                }
                KeyAction::Tap => {
                    ctx.engine.dispatch_input(key_event(keycode, true));
                    Some(ActiveStep::KeyRelease {
                        keycode,
                        deadline: Deadline::Frame(frame),
                    })
                }
                KeyAction::Hold => {
                    ctx.engine.dispatch_input(key_event(keycode, true));
                    let deadline = if duration > 0.0 {
                        Deadline::Clock(now + duration)
                    } else {
                        Deadline::Frame(frame)
                    };
                    Some(ActiveStep::KeyRelease { keycode, deadline })
                }
            }
        }

        Step::Action {
            name,
            pressed,
            strength,
        } => {
            if ctx.engine.has_action(&name) {
                ctx.engine
                    .dispatch_input(action_event(&name, pressed, strength));
            } else {
                warn!("sequence: unknown action '{}', skipping", name);
            }
            None
        }

        Step::Click { x, y } => {
            let position = Vec2::new(x, y);
            ctx.engine
                .dispatch_input(mouse_motion_event(position, Vec2::ZERO));
            ctx.engine.dispatch_input(mouse_button_event(
                MouseButton::Left,
                position,
                true,
                false,
            ));
            Some(ActiveStep::ClickRelease {
                position,
                after_frame: frame,
            })
        }

        Step::ClickNode { ident } => {
            let Some(id) = ctx.state.refs.resolve(ctx.engine, &ident, None) else {
                warn!("sequence: unreachable node '{}', skipping", ident);
                return None;
            };
            match node_click_point(ctx.engine, id) {
                ClickTarget::Point(position) => {
                    ctx.engine
                        .dispatch_input(mouse_motion_event(position, Vec2::ZERO));
                    ctx.engine.dispatch_input(mouse_button_event(
                        MouseButton::Left,
                        position,
                        true,
                        false,
                    ));
                    Some(ActiveStep::ClickRelease {
                        position,
                        after_frame: frame,
                    })
                }
                ClickTarget::Diagnostic(msg) => {
                    warn!("sequence: cannot click '{}': {}", ident, msg);
                    None
                }
            }
        }

        Step::MouseMove { x, y } => {
            ctx.engine
                .dispatch_input(mouse_motion_event(Vec2::new(x, y), Vec2::ZERO));
            None
        }
    }
}
