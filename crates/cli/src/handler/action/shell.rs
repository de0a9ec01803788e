// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runs a shell command. Grounded on
//! `pyowmaster/event/action/shell.py::ShellAction`.

use std::process::Command;

use tracing::{debug, warn};

use owmaster_core::event::Event;

pub struct ShellAction {
    command: String,
}

impl ShellAction {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }

    pub fn run(&self, _event: &Event) {
        match Command::new("sh").arg("-c").arg(&self.command).output() {
            Ok(out) if out.status.success() => {
                debug!(
                    command = %self.command,
                    output = %String::from_utf8_lossy(&out.stdout),
                    "shell action completed"
                );
            }
            Ok(out) => {
                warn!(
                    command = %self.command,
                    status = %out.status,
                    output = %String::from_utf8_lossy(&out.stdout),
                    "shell action exited non-zero"
                );
            }
            Err(e) => {
                warn!(command = %self.command, error = %e, "failed to spawn shell action");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use owmaster_core::event::EventKind;

    #[test]
    fn runs_a_successful_command() {
        let action = ShellAction::new("true");
        action.run(&Event::new(0.0, None, EventKind::Config));
    }

    #[test]
    fn logs_failure_without_panicking() {
        let action = ShellAction::new("false");
        action.run(&Event::new(0.0, None, EventKind::Config));
    }
}
