//! Arm/consume correlation between a metadata preflight and the background
//! data request that follows it.
//!
//! The two requests share no identifier; they are linked only by arriving
//! back to back on the same endpoint family. Scope is therefore per family
//! (the URL path), never per query. Two overlapping user actions on one
//! family can still steal each other's arm; that race is inherent to
//! temporal correlation.

use std::collections::HashMap;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    Armed,
}

/// Two-state gate: `Idle -> Armed` on preflight, `Armed -> Idle` on the first
/// qualifying data response.
#[derive(Debug, Default)]
pub struct PreflightGate {
    state: GateState,
}

impl PreflightGate {
    pub fn arm(&mut self) {
        self.state = GateState::Armed;
    }

    /// Consume the arm. Returns whether the gate was armed.
    pub fn try_consume(&mut self) -> bool {
        match self.state {
            GateState::Armed => {
                self.state = GateState::Idle;
                true
            }
            GateState::Idle => false,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }
}

/// One gate per endpoint family.
#[derive(Debug, Default)]
pub struct GateRegistry {
    gates: HashMap<String, PreflightGate>,
}

impl GateRegistry {
    pub fn arm(&mut self, family: &str) {
        tracing::trace!(family = %family, "Preflight gate armed");
        self.gates.entry(family.to_string()).or_default().arm();
    }

    pub fn try_consume(&mut self, family: &str) -> bool {
        self.gates
            .get_mut(family)
            .is_some_and(PreflightGate::try_consume)
    }

    pub fn state(&self, family: &str) -> GateState {
        self.gates
            .get(family)
            .map(PreflightGate::state)
            .unwrap_or_default()
    }
}

/// Endpoint family of a URL: its path without a trailing slash.
pub fn endpoint_family(url: &Url) -> String {
    url.path().trim_end_matches('/').to_string()
}
