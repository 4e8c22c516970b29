//! Jail lifecycle state machine
//!
//! Plans are replayed through this machine before anything runs, so a
//! sequence such as "start a jail that is already up" is caught as a
//! planning bug instead of reaching iocage.

use crate::error::Error;
use crate::jail::types::RunState;

use state_machines::state_machine;

state_machine! {
    name: JailMachine,
    dynamic: true,
    initial: Absent,
    states: [Absent, Down, Up],
    events {
        create {
            transition: { from: Absent, to: Down }
        }
        start {
            transition: { from: Down, to: Up }
        }
        stop {
            transition: { from: Up, to: Down }
        }
        destroy {
            transition: { from: Down, to: Absent }
        }
    }
}

/// Lifecycle position of a single jail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Absent,
    Down,
    Up,
}

impl Lifecycle {
    fn from_str(s: &str) -> Self {
        match s {
            "Down" => Lifecycle::Down,
            "Up" => Lifecycle::Up,
            _ => Lifecycle::Absent,
        }
    }
}

impl From<Option<RunState>> for Lifecycle {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => Lifecycle::Absent,
            Some(RunState::Down) => Lifecycle::Down,
            Some(RunState::Up) => Lifecycle::Up,
        }
    }
}

/// Replays planned actions against the observed state of one jail
pub struct LifecycleTracker {
    jail: String,
    machine: DynamicJailMachine<()>,
}

impl LifecycleTracker {
    /// Position the machine at the observed state
    pub fn new(jail: &str, observed: Lifecycle) -> crate::error::Result<Self> {
        let mut tracker = Self {
            jail: jail.to_string(),
            machine: JailMachine::new(()).into_dynamic(),
        };
        if observed != Lifecycle::Absent {
            tracker.create()?;
        }
        if observed == Lifecycle::Up {
            tracker.start()?;
        }
        Ok(tracker)
    }

    pub fn state(&self) -> Lifecycle {
        Lifecycle::from_str(self.machine.current_state())
    }

    pub fn create(&mut self) -> crate::error::Result<()> {
        self.fire(JailMachineEvent::Create, "create")
    }

    pub fn start(&mut self) -> crate::error::Result<()> {
        self.fire(JailMachineEvent::Start, "start")
    }

    pub fn stop(&mut self) -> crate::error::Result<()> {
        self.fire(JailMachineEvent::Stop, "stop")
    }

    pub fn destroy(&mut self) -> crate::error::Result<()> {
        self.fire(JailMachineEvent::Destroy, "destroy")
    }

    /// iocage restart tears down when up and always ends up
    pub fn restart(&mut self) -> crate::error::Result<()> {
        if self.state() == Lifecycle::Up {
            self.stop()?;
        }
        self.start()
    }

    /// Property changes and updates need an existing jail
    pub fn require_present(&self, action: &str) -> crate::error::Result<()> {
        match self.state() {
            Lifecycle::Absent => Err(self.reject(action)),
            _ => Ok(()),
        }
    }

    /// Commands inside the jail need it running
    pub fn require_up(&self, action: &str) -> crate::error::Result<()> {
        match self.state() {
            Lifecycle::Up => Ok(()),
            _ => Err(self.reject(action)),
        }
    }

    fn fire(&mut self, event: JailMachineEvent, action: &str) -> crate::error::Result<()> {
        let before = self.reject(action);
        self.machine.handle(event).map_err(|_| before)
    }

    fn reject(&self, action: &str) -> Error {
        Error::Plan {
            jail: self.jail.clone(),
            action: action.to_string(),
            state: self.machine.current_state().to_lowercase(),
        }
    }
}
