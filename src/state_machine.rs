//! Connection state machine
//!
//! Tracks the lifecycle of one HTTP connection:
//! `ReadRequestLine → SkipHeaders → (ReadBody) → Route → Execute → WriteResponse → Closed`.
//! Any fault moves the connection straight to `Closed`.

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ReadRequestLine,
    SkipHeaders,
    ReadBody,
    Route,
    Execute,
    WriteResponse,
    Closed,
}

/// Connection events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Request line parsed
    RequestLineRead,
    /// Blank line after the headers; `has_body` for POST requests
    HeadersDone { has_body: bool },
    BodyRead,
    /// Route resolved; `found` is false for unknown method/path pairs
    Routed { found: bool },
    /// Handler produced a response (including 4xx payloads)
    Executed,
    ResponseWritten,
    /// Transport or framing fault
    Fault,
}

/// State transition result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// Event not valid in the current state
    Stay,
    Transition(ConnectionState),
}

/// How a closed connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Completed,
    NotFound,
    Fault(ConnectionState),
}

/// Per-connection state machine
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
    previous_state: Option<ConnectionState>,
    close_reason: Option<CloseReason>,
    not_found: bool,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::ReadRequestLine,
            previous_state: None,
            close_reason: None,
            not_found: false,
        }
    }

    pub fn get_current_state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn get_previous_state(&self) -> Option<ConnectionState> {
        self.previous_state
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn is_closed(&self) -> bool {
        self.current_state == ConnectionState::Closed
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) -> StateTransition {
        let transition = self.get_state_transition(self.current_state, event);

        if let StateTransition::Transition(new_state) = transition {
            match event {
                ConnectionEvent::Fault => {
                    self.close_reason = Some(CloseReason::Fault(self.current_state));
                }
                ConnectionEvent::Routed { found: false } => self.not_found = true,
                ConnectionEvent::ResponseWritten => {
                    self.close_reason = Some(if self.not_found {
                        CloseReason::NotFound
                    } else {
                        CloseReason::Completed
                    });
                }
                _ => {}
            }
            self.previous_state = Some(self.current_state);
            self.current_state = new_state;
        }

        transition
    }

    fn get_state_transition(
        &self,
        current_state: ConnectionState,
        event: ConnectionEvent,
    ) -> StateTransition {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (current_state, event) {
            (S::Closed, _) => StateTransition::Stay,
            (_, E::Fault) => StateTransition::Transition(S::Closed),

            (S::ReadRequestLine, E::RequestLineRead) => StateTransition::Transition(S::SkipHeaders),

            (S::SkipHeaders, E::HeadersDone { has_body: true }) => {
                StateTransition::Transition(S::ReadBody)
            }
            (S::SkipHeaders, E::HeadersDone { has_body: false }) => {
                StateTransition::Transition(S::Route)
            }

            (S::ReadBody, E::BodyRead) => StateTransition::Transition(S::Route),

            // Unknown routes skip execution and go straight to the 404
            (S::Route, E::Routed { found: true }) => StateTransition::Transition(S::Execute),
            (S::Route, E::Routed { found: false }) => {
                StateTransition::Transition(S::WriteResponse)
            }

            (S::Execute, E::Executed) => StateTransition::Transition(S::WriteResponse),

            (S::WriteResponse, E::ResponseWritten) => StateTransition::Transition(S::Closed),

            _ => StateTransition::Stay,
        }
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_request_lifecycle() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.get_current_state(), ConnectionState::ReadRequestLine);

        sm.handle_event(ConnectionEvent::RequestLineRead);
        assert_eq!(sm.get_current_state(), ConnectionState::SkipHeaders);

        sm.handle_event(ConnectionEvent::HeadersDone { has_body: false });
        assert_eq!(sm.get_current_state(), ConnectionState::Route);

        sm.handle_event(ConnectionEvent::Routed { found: true });
        sm.handle_event(ConnectionEvent::Executed);
        assert_eq!(sm.get_current_state(), ConnectionState::WriteResponse);

        sm.handle_event(ConnectionEvent::ResponseWritten);
        assert!(sm.is_closed());
        assert_eq!(sm.close_reason(), Some(CloseReason::Completed));
    }

    #[test]
    fn post_request_reads_body() {
        let mut sm = ConnectionStateMachine::new();
        sm.handle_event(ConnectionEvent::RequestLineRead);
        sm.handle_event(ConnectionEvent::HeadersDone { has_body: true });
        assert_eq!(sm.get_current_state(), ConnectionState::ReadBody);

        sm.handle_event(ConnectionEvent::BodyRead);
        assert_eq!(sm.get_current_state(), ConnectionState::Route);
        assert_eq!(sm.get_previous_state(), Some(ConnectionState::ReadBody));
    }

    #[test]
    fn unknown_route_goes_to_not_found() {
        let mut sm = ConnectionStateMachine::new();
        sm.handle_event(ConnectionEvent::RequestLineRead);
        sm.handle_event(ConnectionEvent::HeadersDone { has_body: false });
        sm.handle_event(ConnectionEvent::Routed { found: false });
        assert_eq!(sm.get_current_state(), ConnectionState::WriteResponse);

        sm.handle_event(ConnectionEvent::ResponseWritten);
        assert_eq!(sm.close_reason(), Some(CloseReason::NotFound));
    }

    #[test]
    fn fault_closes_from_any_open_state() {
        let mut sm = ConnectionStateMachine::new();
        sm.handle_event(ConnectionEvent::RequestLineRead);
        let transition = sm.handle_event(ConnectionEvent::Fault);
        assert_eq!(transition, StateTransition::Transition(ConnectionState::Closed));
        assert_eq!(
            sm.close_reason(),
            Some(CloseReason::Fault(ConnectionState::SkipHeaders))
        );

        // Closed is terminal
        assert_eq!(sm.handle_event(ConnectionEvent::RequestLineRead), StateTransition::Stay);
        assert_eq!(sm.handle_event(ConnectionEvent::Fault), StateTransition::Stay);
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.handle_event(ConnectionEvent::BodyRead), StateTransition::Stay);
        assert_eq!(sm.handle_event(ConnectionEvent::Executed), StateTransition::Stay);
        assert_eq!(sm.get_current_state(), ConnectionState::ReadRequestLine);
    }
}
