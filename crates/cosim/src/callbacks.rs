//! Callback set invoked by the step loop and the buffers.
//!
//! All callbacks are optional; unset callbacks are silently skipped.

use crate::types::{
    CanController, CanMessage, EthController, EthMessage, IoSignal, LinController, LinMessage,
    SimulationTime, TerminateReason,
};

pub type SimulationCallback = Box<dyn FnMut(SimulationTime) + Send>;

pub type SimulationTerminatedCallback = Box<dyn FnMut(SimulationTime, TerminateReason) + Send>;

/// `(simulation_time, signal, length, value)` — `length` is the element
/// count, `value` the raw bytes of the new signal value.
pub type IncomingSignalChangedCallback =
    Box<dyn FnMut(SimulationTime, &IoSignal, u32, &[u8]) + Send>;

pub type CanMessageReceivedCallback =
    Box<dyn FnMut(SimulationTime, &CanController, &CanMessage) + Send>;

pub type EthMessageReceivedCallback =
    Box<dyn FnMut(SimulationTime, &EthController, &EthMessage) + Send>;

pub type LinMessageReceivedCallback =
    Box<dyn FnMut(SimulationTime, &LinController, &LinMessage) + Send>;

#[derive(Default)]
pub struct Callbacks {
    pub simulation_started: Option<SimulationCallback>,
    pub simulation_stopped: Option<SimulationCallback>,
    pub simulation_paused: Option<SimulationCallback>,
    pub simulation_continued: Option<SimulationCallback>,
    pub simulation_terminated: Option<SimulationTerminatedCallback>,
    pub simulation_begin_step: Option<SimulationCallback>,
    pub simulation_end_step: Option<SimulationCallback>,
    pub incoming_signal_changed: Option<IncomingSignalChangedCallback>,
    pub can_message_received: Option<CanMessageReceivedCallback>,
    pub eth_message_received: Option<EthMessageReceivedCallback>,
    pub lin_message_received: Option<LinMessageReceivedCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("simulation_started", &self.simulation_started.is_some())
            .field("simulation_stopped", &self.simulation_stopped.is_some())
            .field("simulation_paused", &self.simulation_paused.is_some())
            .field("simulation_continued", &self.simulation_continued.is_some())
            .field(
                "simulation_terminated",
                &self.simulation_terminated.is_some(),
            )
            .field("simulation_begin_step", &self.simulation_begin_step.is_some())
            .field("simulation_end_step", &self.simulation_end_step.is_some())
            .field(
                "incoming_signal_changed",
                &self.incoming_signal_changed.is_some(),
            )
            .field("can_message_received", &self.can_message_received.is_some())
            .field("eth_message_received", &self.eth_message_received.is_some())
            .field("lin_message_received", &self.lin_message_received.is_some())
            .finish()
    }
}
