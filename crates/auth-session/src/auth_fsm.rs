//! Session lifecycle state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │  Uninitialized  │ (initial)
//! └────────┬────────┘
//!          │ Activate
//!          ▼
//! ┌─────────────────┐
//! │    Resolving    │
//! └────────┬────────┘
//!          │ LookupSettled / ChangeObserved
//!          ▼
//! ┌─────────────────┐
//! │      Ready      │ ◄── LookupSettled / ChangeObserved
//! └────────┬────────┘
//!          │ Dispose (from any state)
//!          ▼
//!      Disposed
//! ```
//!
//! Nothing leads out of `Ready` except `Dispose`, so `ready` never reverts.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        Activate => Resolving,
        Dispose => Disposed
    },
    Resolving => {
        // Initial user lookup finished, successfully or not
        LookupSettled => Ready,
        // A session change notification arrived first
        ChangeObserved => Ready,
        Dispose => Disposed
    },
    Ready => {
        LookupSettled => Ready,
        ChangeObserved => Ready,
        Dispose => Disposed
    },
    Disposed => {
        Dispose => Disposed
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Lifecycle phase for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Resolving,
    Ready,
    Disposed,
}

impl SessionPhase {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionPhase::Ready)
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => SessionPhase::Uninitialized,
            SessionMachineState::Resolving => SessionPhase::Resolving,
            SessionMachineState::Ready => SessionPhase::Ready,
            SessionMachineState::Disposed => SessionPhase::Disposed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_uninitialized() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::Uninitialized);
    }

    #[test]
    fn test_lookup_first() {
        let mut machine = SessionMachine::new();

        machine.consume(&SessionMachineInput::Activate).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Resolving);

        machine.consume(&SessionMachineInput::LookupSettled).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Ready);

        // Later notifications keep the machine ready
        machine.consume(&SessionMachineInput::ChangeObserved).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Ready);
    }

    #[test]
    fn test_notification_first() {
        let mut machine = SessionMachine::new();

        machine.consume(&SessionMachineInput::Activate).unwrap();
        machine.consume(&SessionMachineInput::ChangeObserved).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Ready);

        // The lookup settling afterwards does not regress
        machine.consume(&SessionMachineInput::LookupSettled).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Ready);
    }

    #[test]
    fn test_cannot_activate_twice() {
        let mut machine = SessionMachine::new();

        machine.consume(&SessionMachineInput::Activate).unwrap();
        assert!(machine.consume(&SessionMachineInput::Activate).is_err());

        machine.consume(&SessionMachineInput::LookupSettled).unwrap();
        assert!(machine.consume(&SessionMachineInput::Activate).is_err());
    }

    #[test]
    fn test_events_before_activation_are_rejected() {
        let mut machine = SessionMachine::new();
        assert!(machine.consume(&SessionMachineInput::ChangeObserved).is_err());
        assert!(machine.consume(&SessionMachineInput::LookupSettled).is_err());
    }

    #[test]
    fn test_dispose_from_every_state() {
        for steps in [
            vec![],
            vec![SessionMachineInput::Activate],
            vec![
                SessionMachineInput::Activate,
                SessionMachineInput::LookupSettled,
            ],
        ] {
            let mut machine = SessionMachine::new();
            for input in &steps {
                machine.consume(input).unwrap();
            }
            machine.consume(&SessionMachineInput::Dispose).unwrap();
            assert_eq!(*machine.state(), SessionMachineState::Disposed);

            // Disposing again is allowed, nothing else is
            machine.consume(&SessionMachineInput::Dispose).unwrap();
            assert!(machine.consume(&SessionMachineInput::ChangeObserved).is_err());
            assert!(machine.consume(&SessionMachineInput::Activate).is_err());
        }
    }

    #[test]
    fn test_phase_conversion() {
        assert_eq!(
            SessionPhase::from(&SessionMachineState::Resolving),
            SessionPhase::Resolving
        );
        assert!(SessionPhase::from(&SessionMachineState::Ready).is_ready());
        assert!(!SessionPhase::from(&SessionMachineState::Disposed).is_ready());
    }
}
