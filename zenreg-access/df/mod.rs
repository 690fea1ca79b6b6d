//! Data fabric indirect access
//!
//! Per-instance fabric registers are reached through a two-register
//! mailbox on function 4 of each fabric node: write the address-select
//! value (FICAA), then read or write the data register (FICAD). Both steps
//! must run back to back, so each I/O die owns one [`DfMailbox`] whose mutex
//! is held across exactly that pair.
//!
//! Two lock-free paths exist for bring-up, before any [`IoDie`] is built:
//! [`df_broadcast_read32`]/[`df_broadcast_write32`] drive the mailbox over
//! legacy port I/O, and [`df_early_read32`] reads a direct register that is
//! identical on every die. Both assume a single thread.

mod bcast;
mod mailbox;

pub use bcast::{df_broadcast_read32, df_broadcast_write32, df_early_read32};
pub use mailbox::{df_read32, df_write32};

use parking_lot::Mutex;
use std::sync::Arc;

use zenreg_raw::df::{mailbox_layout, MailboxLayout, DF_FIRST_DEVICE, DF_MAX_NODES};
use zenreg_raw::invariant::Invariant;
use zenreg_raw::DfRev;

use crate::common::pci::{ConfigSpace, PciAddress};
use crate::telemetry::AccessMetrics;

/// Where a fabric node sits in config space, and which revision it speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfNode {
    pub bus: u8,
    pub device: u8,
    pub rev: DfRev,
}

impl DfNode {
    /// Fabric node of die `die` on bus 0. Fatal past the last addressable node.
    #[track_caller]
    pub fn for_die(die: u8, rev: DfRev) -> Self {
        zenreg_raw::invariant!(
            die < DF_MAX_NODES,
            Invariant::OutOfRange,
            "fabric node {} >= {}",
            die,
            DF_MAX_NODES
        );
        Self {
            bus: 0,
            device: DF_FIRST_DEVICE + die,
            rev,
        }
    }

    pub const fn function(&self, func: u8) -> PciAddress {
        PciAddress::new(self.bus, self.device, func)
    }
}

/// The address-select/data register pair of one die and the lock that
/// keeps their use paired
pub struct DfMailbox {
    layout: &'static MailboxLayout,
    lock: Mutex<()>,
}

impl DfMailbox {
    /// Fatal if `rev` has no known mailbox.
    #[track_caller]
    pub fn new(rev: DfRev) -> Self {
        Self {
            layout: mailbox_layout(rev),
            lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &'static MailboxLayout {
        self.layout
    }
}

/// Per-I/O-die handle
pub struct IoDie {
    index: u8,
    node: DfNode,
    mailbox: DfMailbox,
    cfg: Arc<dyn ConfigSpace>,
    metrics: Option<Arc<AccessMetrics>>,
}

impl IoDie {
    #[track_caller]
    pub fn new(index: u8, node: DfNode, cfg: Arc<dyn ConfigSpace>) -> Self {
        tracing::info!(
            "I/O die {}: fabric node {:02x}:{:02x} ({})",
            index,
            node.bus,
            node.device,
            node.rev.name()
        );
        Self {
            index,
            node,
            mailbox: DfMailbox::new(node.rev),
            cfg,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AccessMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn node(&self) -> DfNode {
        self.node
    }

    pub fn rev(&self) -> DfRev {
        self.node.rev
    }

    pub fn mailbox(&self) -> &DfMailbox {
        &self.mailbox
    }
}
