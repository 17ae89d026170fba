//! Vehicle Tool Dispatcher
//!
//! The fixed set of operations the conversational model may call mid-dialogue.
//! Every tool has the same shape: typed arguments, exactly one call through
//! the [`VehicleState`] gateway, and a short sentence back. A tool never
//! fails towards the model; any error is logged and replaced by that tool's
//! apology sentence.
//!
//! The tools are served over MCP (see [`VehicleTools`]) and the realtime
//! session reaches them in-process through a [`ToolBridge`].

use crate::{
    gateway::{GatewayError, VehicleState},
    vehicle::{VehicleAction, VehicleStatus},
};
use anyhow::Result;
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{CallToolRequestParam, JsonObject, RawContent, ServerCapabilities, ServerInfo},
    service::{RoleClient, RunningService},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Debug, future::Future, sync::Arc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

pub const GET_BATTERY_LEVEL: &str = "get_battery_level";
pub const SET_AC_STATE: &str = "set_ac_state";
pub const IS_CAR_LOCKED: &str = "is_car_locked";
pub const SET_LOCK_STATE: &str = "set_lock_state";

const TOOL_NAMES: [&str; 4] = [GET_BATTERY_LEVEL, SET_AC_STATE, IS_CAR_LOCKED, SET_LOCK_STATE];

/// The sentence a tool answers with when it could not do its job.
pub fn apology_for(tool_name: &str) -> &'static str {
    match tool_name {
        GET_BATTERY_LEVEL => "Error checking battery.",
        SET_AC_STATE => "Error controlling AC.",
        IS_CAR_LOCKED => "Error checking lock status.",
        SET_LOCK_STATE => "Error controlling the locks.",
        _ => "Sorry, I can't do that right now.",
    }
}

/// Why a tool fell back to its apology.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("The vehicle did not accept the '{0}' action")]
    NotApplied(&'static str),
}

// --- Tool arguments ---

/// Arguments for `set_ac_state`.
#[derive(Deserialize, Serialize, JsonSchema, Debug)]
pub struct SetAcStateArgs {
    /// Desired air-conditioning state.
    #[schemars(description = "True to turn ON, False to turn OFF")]
    pub on: bool,
}

/// Arguments for `set_lock_state`.
#[derive(Deserialize, Serialize, JsonSchema, Debug)]
pub struct SetLockStateArgs {
    /// Desired door-lock state.
    #[schemars(description = "True to lock the doors, False to unlock them")]
    pub locked: bool,
}

// --- Service ---

/// MCP service exposing the vehicle tools for one vehicle.
pub struct VehicleTools {
    /// Gateway every tool reads from or writes through.
    state: Arc<dyn VehicleState>,
    /// The vehicle all calls act on.
    vehicle_id: String,
    /// One lock per tool: calls to the same tool run one after another,
    /// different tools do not wait on each other.
    call_locks: HashMap<&'static str, Mutex<()>>,
    /// MCP tool router for handling incoming tool calls.
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for VehicleTools {
    /// Advertises tool support and names the controlled vehicle.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(format!("Controls for vehicle '{}'.", self.vehicle_id)),
            ..Default::default()
        }
    }
}

#[tool_router]
impl VehicleTools {
    /// Creates the tool service for `vehicle_id`.
    pub fn new(state: Arc<dyn VehicleState>, vehicle_id: impl Into<String>) -> Self {
        Self {
            state,
            vehicle_id: vehicle_id.into(),
            call_locks: TOOL_NAMES.iter().map(|name| (*name, Mutex::new(()))).collect(),
            tool_router: Self::tool_router(),
        }
    }

    /// Reports the state of charge.
    ///
    /// Without live data this is the fallback record's level, so scripted
    /// demos always hear the same number.
    #[tool(description = "Get the current battery level of the car.")]
    pub async fn get_battery_level(&self) -> String {
        self.contained(GET_BATTERY_LEVEL, &(), async {
            let status = self.read_status().await?;
            Ok::<_, ToolError>(format!("The battery level is {}%.", status.battery_level))
        })
        .await
    }

    /// Switches the air conditioning on or off.
    ///
    /// Confirms as soon as the gateway accepts the write.
    #[tool(description = "Turn the air conditioning (AC) on or off.")]
    pub async fn set_ac_state(&self, args: Parameters<SetAcStateArgs>) -> String {
        let on = args.0.on;
        self.contained(SET_AC_STATE, &args.0, async move {
            self.apply(VehicleAction::SetAc(on)).await?;
            let state = if on { "ON" } else { "OFF" };
            Ok::<_, ToolError>(format!("I've turned the AC {}.", state))
        })
        .await
    }

    /// Reports whether the doors are locked.
    #[tool(description = "Check if the car is locked.")]
    pub async fn is_car_locked(&self) -> String {
        self.contained(IS_CAR_LOCKED, &(), async {
            let status = if self.read_status().await?.is_locked {
                "locked"
            } else {
                "unlocked"
            };
            Ok::<_, ToolError>(format!("The car is currently {}.", status))
        })
        .await
    }

    /// Locks or unlocks the doors.
    ///
    /// Confirms as soon as the gateway accepts the write.
    #[tool(description = "Lock or unlock the car doors.")]
    pub async fn set_lock_state(&self, args: Parameters<SetLockStateArgs>) -> String {
        let locked = args.0.locked;
        self.contained(SET_LOCK_STATE, &args.0, async move {
            self.apply(VehicleAction::SetLock(locked)).await?;
            Ok::<_, ToolError>(if locked {
                "I've locked the car.".to_string()
            } else {
                "I've unlocked the car.".to_string()
            })
        })
        .await
    }
}

impl VehicleTools {
    /// The vehicle this service controls.
    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    async fn read_status(&self) -> Result<VehicleStatus, ToolError> {
        let reading = self.state.get_status(&self.vehicle_id).await?;
        if !reading.is_live() {
            debug!(
                vehicle_id = %self.vehicle_id,
                source = ?reading.source,
                "Answering from fallback status"
            );
        }
        Ok(reading.status)
    }

    async fn apply(&self, action: VehicleAction) -> Result<(), ToolError> {
        if self.state.update_action(action, &self.vehicle_id).await? {
            Ok(())
        } else {
            Err(ToolError::NotApplied(action.name()))
        }
    }

    /// Logs the call, runs `op` under the tool's lock and turns any error
    /// into the tool's apology.
    async fn contained<A, F>(&self, name: &'static str, args: &A, op: F) -> String
    where
        A: Debug + ?Sized,
        F: Future<Output = Result<String, ToolError>>,
    {
        info!(tool = name, args = ?args, vehicle_id = %self.vehicle_id, "TOOL CALL");
        let _serial = match self.call_locks.get(name) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        match op.await {
            Ok(result) => {
                info!(tool = name, %result, "TOOL RESULT");
                result
            }
            Err(e) => {
                error!(tool = name, error = %e, "TOOL ERROR");
                apology_for(name).to_string()
            }
        }
    }
}

// --- In-process bridge ---

/// A tool as advertised to the realtime model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: serde_json::Value,
}

/// In-process MCP client connected to a [`VehicleTools`] server over a
/// duplex pipe.
pub struct ToolBridge {
    client: RunningService<RoleClient, ()>,
    server_task: JoinHandle<()>,
}

impl ToolBridge {
    /// Spawns the tool server and connects a client to it.
    pub async fn start(tools: VehicleTools) -> Result<Self> {
        let (server_transport, client_transport) = tokio::io::duplex(4096);

        let server_task = tokio::spawn(async move {
            match tools.serve(server_transport).await {
                Ok(service) => {
                    let _ = service.waiting().await;
                }
                Err(e) => error!(error = ?e, "Vehicle tool server failed to start"),
            }
        });
        let client = ().serve(client_transport).await?;

        Ok(Self {
            client,
            server_task,
        })
    }

    /// Lists every tool with its argument schema.
    pub async fn definitions(&self) -> Result<Vec<ToolSpec>> {
        self.client
            .list_all_tools()
            .await?
            .into_iter()
            .map(|t| {
                Ok(ToolSpec {
                    name: t.name.to_string(),
                    description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                    parameters: serde_json::to_value(&*t.input_schema)?,
                })
            })
            .collect()
    }

    /// Invokes a tool with its raw JSON arguments. Never fails: protocol
    /// errors, unknown tools and malformed arguments all yield an apology.
    pub async fn call(&self, name: &str, arguments: &str) -> String {
        let arguments = if arguments.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<JsonObject>(arguments) {
                Ok(object) => Some(object),
                Err(e) => {
                    warn!(tool = name, %arguments, error = %e, "Malformed tool arguments");
                    return apology_for(name).to_string();
                }
            }
        };

        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await;

        match result {
            Ok(result) => result
                .content
                .and_then(|mut content| content.pop())
                .and_then(|annotated| match annotated.raw {
                    RawContent::Text(text_content) => Some(text_content.text),
                    _ => None,
                })
                .unwrap_or_else(|| {
                    warn!(tool = name, "Tool returned no text content");
                    apology_for(name).to_string()
                }),
            Err(e) => {
                error!(tool = name, error = ?e, "Tool call failed");
                apology_for(name).to_string()
            }
        }
    }
}

impl Drop for ToolBridge {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}
