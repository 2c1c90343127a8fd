//! Network attach/detach strategy consulted by the C/R driver's
//! `network-lock`/`network-unlock` notifications (spec §4.6.1).
//!
//! No pack grounding — introduced because the spec names it as an external
//! collaborator the core calls into. Only a no-op, host-passthrough
//! implementation ships; Non-goals explicitly exclude a full CNI runner.

use crate::error::Result;

/// Strategy for detaching/reattaching a container's network interfaces
/// around a checkpoint/restore cycle.
pub trait NetworkStrategy: std::fmt::Debug + Send {
    /// Called on the C/R helper's `network-lock` notification, just before
    /// it freezes the container's network state for dump.
    fn lock(&self) -> Result<()>;
    /// Called on `network-unlock`, after the helper is done with the
    /// container's network state.
    fn unlock(&self) -> Result<()>;
}

/// The only shipped strategy: the container shares (or already owns) its
/// network namespace and nothing needs to be done around C/R.
#[derive(Debug, Default)]
pub struct HostPassthrough;

impl NetworkStrategy for HostPassthrough {
    fn lock(&self) -> Result<()> {
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_passthrough_is_always_a_no_op() {
        let strategy = HostPassthrough;
        assert!(strategy.lock().is_ok());
        assert!(strategy.unlock().is_ok());
    }
}
