//! End-to-end exercise of both query paths against a selected provider.
//!
//! The probe enumerates modules, picks an available one by name, runs the
//! blocking query and then the callback flow (ask, cancel, ask, wait), and
//! summarizes what happened in a [`ProbeReport`].

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use location_provider::{LocationServer, ModuleInfo, StatusCode};
use positioner::{
    get_current_position_with, EventLoop, FatalError, PositionFix, Positioner, PositionerConfig,
    QueryOptions, SessionError,
};
use serde::Serialize;
use thiserror::Error;

pub mod providers;

pub const DEFAULT_MODULE_NAME: &str = "Network based";
pub const MODULE_ENV_VAR: &str = "POSITION_PROBE_MODULE";

/// Upper bound for the callback wait when the update timeout is unbounded.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no available positioning module named {0:?}")]
    ModuleNotFound(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub id: String,
    pub name: String,
    pub available: bool,
}

impl From<&ModuleInfo> for ModuleReport {
    fn from(info: &ModuleInfo) -> Self {
        Self {
            id: info.id.to_string(),
            name: info.name.clone(),
            available: info.available,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub status: i32,
    pub fix: Option<PositionFix>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackReport {
    /// Whether the cancelled request's handler ran. Expected to stay false.
    pub cancelled_handler_called: bool,
    /// Status delivered to the second handler, if it ran before the deadline.
    pub status: Option<i32>,
    pub position: Option<PositionFix>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub modules: Vec<ModuleReport>,
    pub module: ModuleReport,
    pub one_shot: QueryReport,
    pub callback: CallbackReport,
}

/// Module name from [`MODULE_ENV_VAR`], or [`DEFAULT_MODULE_NAME`].
#[must_use]
pub fn module_name_from_env() -> String {
    std::env::var(MODULE_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_MODULE_NAME.to_string())
}

pub fn select_module(
    server: &dyn LocationServer,
    module_name: &str,
) -> Result<ModuleInfo, ProbeError> {
    server
        .modules()
        .into_iter()
        .find(|module| module.available && module.name == module_name)
        .ok_or_else(|| ProbeError::ModuleNotFound(module_name.to_string()))
}

pub fn run(
    server: &dyn LocationServer,
    module_name: &str,
    config: &PositionerConfig,
) -> Result<ProbeReport, ProbeError> {
    let modules: Vec<ModuleReport> = server.modules().iter().map(ModuleReport::from).collect();
    let module = select_module(server, module_name)?;
    tracing::info!(module_id = %module.id, name = %module.name, "selected positioning module");

    let options = QueryOptions::from_config(config);
    let one_shot = match get_current_position_with(server, module.id, &options) {
        Ok(fix) => QueryReport {
            status: StatusCode::SUCCESS.code(),
            fix: Some(fix),
            error: None,
        },
        Err(error) => {
            tracing::warn!(%error, "one-shot query failed");
            QueryReport {
                status: error.status().code(),
                fix: None,
                error: Some(error.to_string()),
            }
        }
    };

    let callback = run_callback_flow(server, &module, config, &options)?;

    Ok(ProbeReport {
        modules,
        module: ModuleReport::from(&module),
        one_shot,
        callback,
    })
}

fn run_callback_flow(
    server: &dyn LocationServer,
    module: &ModuleInfo,
    config: &PositionerConfig,
    options: &QueryOptions,
) -> Result<CallbackReport, ProbeError> {
    let event_loop = EventLoop::new();
    let positioner = Positioner::open_as(
        &event_loop,
        server,
        module.id,
        config.timing,
        &config.requestor(),
    )?;

    let cancelled_called = Rc::new(Cell::new(false));
    let flag = Rc::clone(&cancelled_called);
    positioner.ask_position(move |_| {
        flag.set(true);
        Ok(())
    })?;
    positioner.cancel()?;

    let delivered = Rc::new(Cell::new(None));
    let slot = Rc::clone(&delivered);
    positioner.ask_position(move |status| {
        tracing::info!(%status, "position handler called");
        slot.set(Some(status));
        Ok(())
    })?;

    let wait = if config.timing.update_timeout.is_zero() {
        UNBOUNDED_WAIT
    } else {
        config.timing.update_timeout.saturating_add(options.wait_grace)
    };
    if !event_loop.run_until(wait, || delivered.get().is_some())? {
        tracing::warn!(?wait, "no completion before the probe deadline");
        positioner.cancel()?;
    }

    let position = positioner.get_position()?;
    positioner.close();

    Ok(CallbackReport {
        cancelled_handler_called: cancelled_called.get(),
        status: delivered.get().map(StatusCode::code),
        position,
    })
}
