//! Event reporting.
//!
//! The engine reports outcomes through an `EventSink`. Delivery is up to the
//! caller; the controller collects events into a `Vec` during a pass and
//! publishes them to the cluster afterwards.

use std::fmt;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Informational
    Normal,
    /// Something needs attention
    Warning,
}

impl EventType {
    /// Kubernetes spelling of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
        }
    }
}

/// Short machine-readable reason attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// An allocation attempt returned an error
    AllocationFailed,
    /// A pass ended with neither an address nor an error
    InternalError,
    /// An address was assigned
    IPAllocated,
}

impl Reason {
    /// Reason code as published.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllocationFailed => "AllocationFailed",
            Self::InternalError => "InternalError",
            Self::IPAllocated => "IPAllocated",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event produced while reconciling a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    /// Severity
    pub event_type: EventType,
    /// Reason code
    pub reason: Reason,
    /// Human-readable message
    pub message: String,
}

/// Receiver for events raised during a pass.
pub trait EventSink {
    /// Records one event.
    fn record(&mut self, event_type: EventType, reason: Reason, message: String);
}

impl EventSink for Vec<ServiceEvent> {
    fn record(&mut self, event_type: EventType, reason: Reason, message: String) {
        self.push(ServiceEvent {
            event_type,
            reason,
            message,
        });
    }
}
