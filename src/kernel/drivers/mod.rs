//!
//! Driver manager (component 4.G)
//!
//! Walks the parsed device tree depth-first and matches each enabled
//! node against a registry of driver descriptors assembled at link time
//! (spec §3, §6). Individual device drivers are out of scope (spec §1);
//! this module only owns the walk-and-match-and-attach loop.

pub mod fdt;

use fdt::{FdtManager, NodeId};

use crate::kernel::error::KernelResult;

/// `attach` binds the driver to `node`. On success it may associate
/// private data with the node via `fdt.set_device_data(node, ptr)`,
/// retrievable later through `get_device_data(phandle)` (spec §4.G). A
/// driver that depends on a later-initialized service must tolerate its
/// absence here or record an explicit dependency of its own (spec §4.G
/// "Ordering").
pub struct DriverDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub compatible: &'static str,
    pub version: u32,
    pub attach: fn(node: NodeId, fdt: &mut FdtManager) -> KernelResult<()>,
}

pub struct DriverManager {
    registry: &'static [DriverDescriptor],
    attached_count: usize,
}

impl DriverManager {
    pub const fn new() -> Self {
        Self {
            registry: &[],
            attached_count: 0,
        }
    }

    /// `registry` is the link-time collected, null-terminated-in-spirit
    /// table of descriptors (represented here as a plain slice, the
    /// idiomatic Rust equivalent of a section collected at link time).
    pub fn init(&mut self, registry: &'static [DriverDescriptor]) {
        self.registry = registry;
        self.attached_count = 0;
    }

    pub fn attached_count(&self) -> usize {
        self.attached_count
    }

    /// Depth-first walk, siblings visited in blob order, matching spec
    /// §4.G exactly.
    pub fn attach_all(&mut self, fdt: &mut FdtManager) -> KernelResult<usize> {
        if let Some(root) = fdt.root() {
            self.walk(fdt, root)?;
        }
        Ok(self.attached_count)
    }

    fn walk(&mut self, fdt: &mut FdtManager, node: NodeId) -> KernelResult<()> {
        if fdt.is_node_operational(node) && fdt.prop_by_name(node, "compatible").is_some() {
            for driver in self.registry {
                if fdt.match_compatible(node, driver.compatible) {
                    (driver.attach)(node, fdt)?;
                    self.attached_count += 1;
                    break;
                }
            }
        }
        let mut child = fdt.first_child(node);
        while let Some(c) = child {
            self.walk(fdt, c)?;
            child = fdt.next_sibling(c);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::error::KernelError;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static ATTACH_HITS: AtomicUsize = AtomicUsize::new(0);

    fn mock_attach(_node: NodeId, _fdt: &mut FdtManager) -> KernelResult<()> {
        ATTACH_HITS.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn mock_attach_with_device_data(node: NodeId, fdt: &mut FdtManager) -> KernelResult<()> {
        ATTACH_HITS.fetch_add(1, Ordering::Relaxed);
        fdt.set_device_data(node, 0xdead_beef);
        Ok(())
    }

    fn mock_blob_single_node_compatible(compatible: &str) -> alloc::vec::Vec<u8> {
        mock_blob_single_node_compatible_with_phandle(compatible, None)
    }

    fn mock_blob_single_node_compatible_with_phandle(
        compatible: &str,
        phandle: Option<u32>,
    ) -> alloc::vec::Vec<u8> {
        // Re-uses the same minimal single-node blob shape the fdt tests build.
        let mut strings = alloc::vec::Vec::new();
        let mut struct_data = alloc::vec::Vec::new();
        let compatible_off = strings.len() as u32;
        strings.extend_from_slice(b"compatible\0");
        let phandle_off = strings.len() as u32;
        strings.extend_from_slice(b"phandle\0");

        struct_data.extend_from_slice(&1u32.to_be_bytes()); // BEGIN_NODE
        struct_data.push(0);
        while struct_data.len() % 4 != 0 {
            struct_data.push(0);
        }
        let mut payload = compatible.as_bytes().to_vec();
        payload.push(0);
        struct_data.extend_from_slice(&3u32.to_be_bytes()); // PROP
        struct_data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        struct_data.extend_from_slice(&compatible_off.to_be_bytes());
        struct_data.extend_from_slice(&payload);
        while struct_data.len() % 4 != 0 {
            struct_data.push(0);
        }
        if let Some(id) = phandle {
            let payload = id.to_be_bytes();
            struct_data.extend_from_slice(&3u32.to_be_bytes()); // PROP
            struct_data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            struct_data.extend_from_slice(&phandle_off.to_be_bytes());
            struct_data.extend_from_slice(&payload);
        }
        struct_data.extend_from_slice(&2u32.to_be_bytes()); // END_NODE
        struct_data.extend_from_slice(&9u32.to_be_bytes()); // END

        let header_size = 40;
        let struct_offset = header_size + 16;
        let strings_offset = struct_offset + struct_data.len();
        let total_size = strings_offset + strings.len();

        let mut blob = alloc::vec::Vec::new();
        blob.extend_from_slice(&0xd00dfeedu32.to_be_bytes());
        blob.extend_from_slice(&(total_size as u32).to_be_bytes());
        blob.extend_from_slice(&(struct_offset as u32).to_be_bytes());
        blob.extend_from_slice(&(strings_offset as u32).to_be_bytes());
        blob.extend_from_slice(&(header_size as u32).to_be_bytes());
        blob.extend_from_slice(&17u32.to_be_bytes());
        blob.extend_from_slice(&17u32.to_be_bytes());
        blob.extend_from_slice(&0u32.to_be_bytes());
        blob.extend_from_slice(&(strings.len() as u32).to_be_bytes());
        blob.extend_from_slice(&(struct_data.len() as u32).to_be_bytes());
        blob.extend_from_slice(&0u64.to_be_bytes());
        blob.extend_from_slice(&0u64.to_be_bytes());
        blob.extend_from_slice(&struct_data);
        blob.extend_from_slice(&strings);
        blob
    }

    #[test]
    fn matching_node_is_attached_exactly_once() {
        ATTACH_HITS.store(0, Ordering::Relaxed);
        static REGISTRY: [DriverDescriptor; 1] = [DriverDescriptor {
            name: "mock",
            description: "test driver",
            compatible: "vendor,mock-device",
            version: 1,
            attach: mock_attach,
        }];

        let blob = mock_blob_single_node_compatible("vendor,mock-device");
        let mut fdt = FdtManager::new();
        fdt.init(&blob).unwrap();

        let mut manager = DriverManager::new();
        manager.init(&REGISTRY);
        assert_eq!(manager.attach_all(&mut fdt).unwrap(), 1);
        assert_eq!(ATTACH_HITS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn attach_records_device_data_retrievable_by_phandle() {
        ATTACH_HITS.store(0, Ordering::Relaxed);
        static REGISTRY: [DriverDescriptor; 1] = [DriverDescriptor {
            name: "mock",
            description: "test driver",
            compatible: "vendor,mock-device",
            version: 1,
            attach: mock_attach_with_device_data,
        }];

        let blob = mock_blob_single_node_compatible_with_phandle("vendor,mock-device", Some(7));
        let mut fdt = FdtManager::new();
        fdt.init(&blob).unwrap();

        let mut manager = DriverManager::new();
        manager.init(&REGISTRY);
        assert_eq!(manager.attach_all(&mut fdt).unwrap(), 1);
        assert_eq!(fdt.get_device_data(7), Some(0xdead_beef));
    }

    #[test]
    fn non_matching_node_is_skipped() {
        static REGISTRY: [DriverDescriptor; 1] = [DriverDescriptor {
            name: "mock",
            description: "test driver",
            compatible: "vendor,other-device",
            version: 1,
            attach: mock_attach,
        }];
        let blob = mock_blob_single_node_compatible("vendor,mock-device");
        let mut fdt = FdtManager::new();
        fdt.init(&blob).unwrap();

        let mut manager = DriverManager::new();
        manager.init(&REGISTRY);
        assert_eq!(manager.attach_all(&mut fdt).unwrap(), 0);
        let _ = KernelError::NoSuchId;
    }
}
