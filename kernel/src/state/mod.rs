// Bridge State Machine
//
// Tracks the lifecycle of one bridge run:
// Idle → Connecting → Streaming → (Draining | Disconnected) → Closed

use serde::Serialize;

/// Lifecycle state of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    /// No device or log session open.
    Idle,

    /// Opening the device and the log session.
    Connecting,

    /// Every framed line is being appended.
    Streaming,

    /// Input ended or shutdown was requested; finishing up.
    Draining,

    /// The device went away. No further appends.
    Disconnected,

    /// Terminal. Both resources released.
    Closed,
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    Start,
    Connected,
    ConnectFailed,
    InputEnded,
    ShutdownRequested,
    DeviceLost,
    Released,
}

/// Errors produced during state transitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal state transition: {0}")]
    IllegalTransition(String),
}

#[derive(Debug)]
pub struct BridgeStateMachine {
    state: BridgeState,
}

impl Default for BridgeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStateMachine {
    pub fn new() -> Self {
        Self {
            state: BridgeState::Idle,
        }
    }

    /// Apply one event and return the resulting state.
    pub fn apply(&mut self, event: BridgeEvent) -> Result<BridgeState, StateError> {
        use BridgeEvent::*;
        use BridgeState::*;

        self.state = match (self.state, event) {
            (Idle, Start) => Connecting,

            // Both legs must come up before streaming
            (Connecting, Connected) => Streaming,
            (Connecting, ConnectFailed) => Closed,

            (Streaming, InputEnded | ShutdownRequested) => Draining,
            (Streaming, DeviceLost) => Disconnected,

            // Already winding down; a late disconnect changes nothing
            (Draining, DeviceLost | ShutdownRequested) => Draining,
            (Disconnected, ShutdownRequested) => Disconnected,

            // Release is idempotent
            (Idle | Draining | Disconnected | Closed, Released) => Closed,

            (state, evt) => {
                return Err(StateError::IllegalTransition(format!(
                    "cannot apply {:?} while in {:?}",
                    evt, state
                )))
            }
        };

        Ok(self.state)
    }

    pub fn current_state(&self) -> BridgeState {
        self.state
    }
}
