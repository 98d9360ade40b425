//! Session state flags
//!
//! The flags nest: a session must be active before the physical interface
//! can be activated, and the physical interface must be active before the
//! target can be attached for debugging or put into programming mode. Debug
//! and programming mode exclude each other.

use crate::error::{Error, Result};

/// Nested session flags of a probe connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    session: bool,
    physical: bool,
    debug: bool,
    program: bool,
}

impl SessionState {
    /// All flags cleared
    pub const fn new() -> Self {
        Self {
            session: false,
            physical: false,
            debug: false,
            program: false,
        }
    }

    /// Probe session is open
    pub fn session_active(&self) -> bool {
        self.session
    }

    /// Physical interface to the target is active
    pub fn physical_active(&self) -> bool {
        self.physical
    }

    /// Debugger is attached
    pub fn debug_active(&self) -> bool {
        self.debug
    }

    /// Target is in programming mode
    pub fn program_active(&self) -> bool {
        self.program
    }

    /// Fail unless a session is active
    pub fn require_session(&self, operation: &'static str) -> Result<()> {
        guard(self.session, operation, "session")
    }

    /// Fail unless the physical interface is active
    pub fn require_physical(&self, operation: &'static str) -> Result<()> {
        guard(self.physical, operation, "physical")
    }

    /// Fail unless the debugger is attached
    pub fn require_debug(&self, operation: &'static str) -> Result<()> {
        guard(self.debug, operation, "debug mode")
    }

    /// Fail unless programming mode is active
    pub fn require_program(&self, operation: &'static str) -> Result<()> {
        guard(self.program, operation, "program mode")
    }

    /// Fail unless either debug or programming mode is active
    pub fn require_debug_or_program(&self, operation: &'static str) -> Result<()> {
        guard(self.debug || self.program, operation, "debug or program mode")
    }

    /// Record a started session
    pub fn start_session(&mut self) {
        self.session = true;
    }

    /// Record an ended session, dropping everything nested inside it
    pub fn end_session(&mut self) {
        *self = Self::new();
    }

    /// Record physical activation
    pub fn activate_physical(&mut self, operation: &'static str) -> Result<()> {
        self.require_session(operation)?;
        self.physical = true;
        Ok(())
    }

    /// Record physical deactivation
    pub fn deactivate_physical(&mut self) {
        self.physical = false;
        self.debug = false;
        self.program = false;
    }

    /// Record a debugger attach
    pub fn attach(&mut self, operation: &'static str) -> Result<()> {
        self.require_physical(operation)?;
        if self.program {
            return Err(Error::PreconditionViolated {
                operation,
                requires: "program mode left",
            });
        }
        self.debug = true;
        Ok(())
    }

    /// Record a debugger detach
    pub fn detach(&mut self) {
        self.debug = false;
    }

    /// Record entering programming mode
    pub fn enter_program(&mut self, operation: &'static str) -> Result<()> {
        self.require_physical(operation)?;
        if self.debug {
            return Err(Error::PreconditionViolated {
                operation,
                requires: "debugger detached",
            });
        }
        self.program = true;
        Ok(())
    }

    /// Record leaving programming mode
    pub fn leave_program(&mut self) {
        self.program = false;
    }
}

fn guard(flag: bool, operation: &'static str, requires: &'static str) -> Result<()> {
    if flag {
        Ok(())
    } else {
        Err(Error::PreconditionViolated {
            operation,
            requires,
        })
    }
}
