//! Virtual outputs — record every command, optionally unreachable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use homenode_app::ports::{DeviceCommand, DeviceDriver};

#[derive(Default)]
struct OutputState {
    unreachable: AtomicBool,
    commands: Mutex<Vec<DeviceCommand>>,
}

/// Shared handle onto a virtual output, for inspection from tests or a
/// demo harness.
#[derive(Clone, Default)]
pub struct OutputHandle {
    inner: Arc<OutputState>,
}

impl OutputHandle {
    /// Simulate the peer going offline: subsequent sends are rejected so
    /// the group retries them.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Every command the output accepted or rejected, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.inner
            .commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The on/off state implied by the last accepted command.
    #[must_use]
    pub fn is_on(&self) -> Option<bool> {
        self.commands()
            .last()
            .map(|command| !matches!(command, DeviceCommand::Off))
    }
}

/// Driver writing into an [`OutputHandle`].
pub(crate) struct VirtualOutput {
    handle: OutputHandle,
}

impl VirtualOutput {
    pub(crate) fn new(handle: OutputHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl DeviceDriver for VirtualOutput {
    async fn send(&self, command: DeviceCommand) -> bool {
        if self.handle.inner.unreachable.load(Ordering::SeqCst) {
            return false;
        }
        self.handle
            .inner
            .commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(command);
        true
    }
}
