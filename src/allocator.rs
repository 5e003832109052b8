use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Numeric resources reserved for one session: the virtual display number
/// and the two loopback ports its VNC server and WebSocket bridge listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayResources {
    pub display: u32,
    pub vnc_port: u16,
    pub ws_port: u16,
}

/// Issues unique display/port triples from a single monotonic counter.
///
/// Each `allocate()` call performs exactly one atomic fetch-add, so no two
/// callers can observe the same index even under concurrent creates. Numbers
/// are never reused while the process lives; the counter resets on restart.
/// This trades unbounded counter growth for not having to track a free-list,
/// which is acceptable given typical service lifetimes and the port ranges
/// involved.
#[derive(Clone)]
pub struct ResourceAllocator {
    index: Arc<AtomicU32>,
    display_base: u32,
    vnc_port_base: u16,
    ws_port_base: u16,
}

impl ResourceAllocator {
    pub fn new(display_base: u32, vnc_port_base: u16, ws_port_base: u16) -> Self {
        Self {
            index: Arc::new(AtomicU32::new(0)),
            display_base,
            vnc_port_base,
            ws_port_base,
        }
    }

    /// Reserve the next display/port triple.
    pub fn allocate(&self) -> DisplayResources {
        let index = self.index.fetch_add(1, Ordering::AcqRel);
        DisplayResources {
            display: self.display_base + index,
            vnc_port: self.vnc_port_base + index as u16,
            ws_port: self.ws_port_base + index as u16,
        }
    }
}

impl Default for ResourceAllocator {
    fn default() -> Self {
        // Display :100 upward, VNC from 5900, bridge from 6900.
        Self::new(100, 5900, 6900)
    }
}
