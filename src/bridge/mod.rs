//! Runtime bridge: ties the HTTP server, snapshot engine, input injector,
//! event accumulator and condition waiter into one object the engine ticks.
//!
//! Everything runs on the engine thread. `tick` order per frame: drain
//! engine signals and tree events, poll the accumulator, pump sockets,
//! dispatch completed requests, advance suspended continuations, flush
//! writes and reap expired connections. The bridge node must be configured
//! to process while the engine is paused; engine-clock waits then stall by
//! design while wall-clock machinery (sockets, timeouts) keeps moving.

pub mod routes;
pub mod task;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::config::BridgeConfig;
use crate::core::events::EventAccumulator;
use crate::core::refs::RefMap;
use crate::core::screenshot::{capture, CaptureOptions};
use crate::core::snapshot::{take_snapshot, Snapshot};
use crate::engine::{Engine, SubIdGen};
use crate::server::request::Request;
use crate::server::response::{Reply, Response};
use crate::server::{ConnId, HttpServer};
use task::Task;

/// Mutable bridge-owned state handlers operate on.
pub struct BridgeState {
    pub refs: RefMap,
    pub accumulator: EventAccumulator,
    pub sub_ids: SubIdGen,
    pub diff_baseline: Option<Snapshot>,
}

/// Everything a handler or continuation may touch during one tick.
pub struct Ctx<'a> {
    pub engine: &'a mut dyn Engine,
    pub state: &'a mut BridgeState,
    pub config: &'a BridgeConfig,
}

/// Trailing observation flags carried by mutation endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct Observe {
    pub snapshot: bool,
    pub screenshot: bool,
}

/// Outcome of a handler invocation.
pub enum HandlerResult {
    Done(Reply),
    Suspend(Task),
}

/// Route handlers are plain functions; the route table stores them as
/// tokens and the dispatcher runs them against the tick's [`Ctx`].
pub type Handler = fn(&mut Ctx<'_>, &Request) -> HandlerResult;

pub struct RuntimeBridge {
    config: BridgeConfig,
    server: HttpServer<Handler>,
    state: BridgeState,
    tasks: HashMap<ConnId, Task>,
}

impl RuntimeBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let mut server = HttpServer::new(Duration::from_secs(config.connection_timeout_secs));
        routes::register_all(&mut server);
        let accumulator = EventAccumulator::new(config.max_events);
        Self {
            config,
            server,
            state: BridgeState {
                refs: RefMap::new(),
                accumulator,
                sub_ids: SubIdGen::new(),
                diff_baseline: None,
            },
            tasks: HashMap::new(),
        }
    }

    /// Bind the listener and start accumulating events.
    pub fn start(&mut self, engine: &mut dyn Engine) -> std::io::Result<SocketAddr> {
        let addr = self
            .server
            .bind(&self.config.host, self.config.runtime_port)?;
        self.state
            .accumulator
            .start(engine, &mut self.state.sub_ids);
        info!(
            "runtime bridge up: {} routes on {}",
            self.server.route_count(),
            addr
        );
        Ok(addr)
    }

    /// Tear down sockets and signal subscriptions.
    pub fn stop(&mut self, engine: &mut dyn Engine) {
        for (_, task) in self.tasks.drain() {
            task.abandon(engine);
        }
        self.server.shutdown();
        self.state.accumulator.stop(engine);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.server.is_listening()
    }

    /// One cooperative slice, called from inside the engine's frame loop.
    pub fn tick(&mut self, engine: &mut dyn Engine) {
        let emissions = engine.drain_signals();
        let tree_events = engine.drain_tree_events();

        self.state
            .accumulator
            .poll(engine, &mut self.state.sub_ids, &emissions, &tree_events);

        for (conn, request) in self.server.poll_io() {
            self.dispatch(engine, conn, request);
        }

        // Advance continuations; completed ones respond and close.
        let mut finished = Vec::new();
        for (&conn, task) in self.tasks.iter_mut() {
            let mut ctx = Ctx {
                engine: &mut *engine,
                state: &mut self.state,
                config: &self.config,
            };
            if let Some(value) = task.poll(&mut ctx, &emissions) {
                finished.push((conn, value));
            }
        }
        for (conn, value) in finished {
            self.tasks.remove(&conn);
            self.server.respond(conn, Response::json(value));
        }

        // A connection that timed out or dropped takes its task with it.
        let dead: Vec<ConnId> = self
            .tasks
            .keys()
            .copied()
            .filter(|conn| !self.server.is_open(*conn))
            .collect();
        for conn in dead {
            if let Some(task) = self.tasks.remove(&conn) {
                debug!("conn {} gone; abandoning its continuation", conn);
                task.abandon(engine);
            }
        }

        self.server.flush();
    }

    fn dispatch(&mut self, engine: &mut dyn Engine, conn: ConnId, request: Request) {
        let Some(handler) = self.server.lookup(&request) else {
            self.server.respond(conn, Response::not_found(&request));
            return;
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = Ctx {
                engine: &mut *engine,
                state: &mut self.state,
                config: &self.config,
            };
            handler(&mut ctx, &request)
        }));

        match result {
            Ok(HandlerResult::Done(reply)) => {
                self.server.respond(conn, Response::from_reply(reply));
            }
            Ok(HandlerResult::Suspend(task)) => {
                self.tasks.insert(conn, task);
            }
            Err(payload) => {
                let message = panic_message(&payload);
                warn!("handler panicked on {}: {}", request.path, message);
                self.server.respond(conn, Response::internal(&message));
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Stitch the optional trailing snapshot/screenshot onto a response map.
pub fn attach_observations(ctx: &mut Ctx<'_>, out: &mut Value, observe: &Observe) {
    if !out.is_object() {
        return;
    }
    if observe.snapshot {
        let snapshot = take_snapshot(
            ctx.engine,
            &mut ctx.state.refs,
            None,
            ctx.config.max_snapshot_depth,
            ctx.config.max_node_count,
            ctx.state.accumulator.count(),
        );
        if let Ok(value) = serde_json::to_value(&snapshot) {
            out["snapshot"] = value;
        }
    }
    if observe.screenshot {
        let opts = CaptureOptions {
            width: ctx.config.screenshot_width,
            height: ctx.config.screenshot_height,
            quality: ctx.config.screenshot_quality,
            max_base64_len: ctx.config.max_base64_len,
        };
        match capture(ctx.engine, opts, None, "observation") {
            Ok(shot) => out["screenshot"] = shot["image"].clone(),
            Err(e) => out["screenshot_note"] = Value::String(e),
        }
    }
}
