//!
//! Flattened device tree parser (component 4.F)
//!
//! Decodes a flat big-endian blob into an owned, arena-indexed tree
//! (spec §9 "Pointer graphs in a safe-ownership language" recommends
//! exactly this re-architecture over the source's raw node pointers, so
//! this module follows it: every node and property lives in a `Vec`
//! owned by the manager and is referenced by index, not by pointer).
//! The blob itself need not outlive `init` — every name and cell payload
//! is copied out during parse.

use crate::kernel::error::{KernelError, KernelResult};

use alloc::string::String;
use alloc::vec::Vec;

pub type NodeId = usize;
pub type PropId = usize;

const FDT_MAGIC: u32 = 0xd00dfeed;
const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

const DEFAULT_ADDRESS_CELLS: u32 = 2;
const DEFAULT_SIZE_CELLS: u32 = 1;

#[repr(C)]
struct FdtHeader {
    magic: u32,
    total_size: u32,
    off_dt_struct: u32,
    off_dt_strings: u32,
    off_mem_rsvmap: u32,
    version: u32,
    last_comp_version: u32,
    boot_cpuid_phys: u32,
    size_dt_strings: u32,
    size_dt_struct: u32,
}

struct Node {
    name: String,
    address_cells: u32,
    size_cells: u32,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    first_prop: Option<PropId>,
    /// Private data a bound driver associates via `set_device_data`
    /// (spec §3 "FDT node" `device-data:ptr`, spec §4.G).
    device_data: Option<usize>,
}

struct Prop {
    name: String,
    cells: Vec<u8>,
    next_prop: Option<PropId>,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryReservation {
    pub base: u64,
    pub size: u64,
}

/// A `(base, size)` span taken from a memory node's `reg` property (spec
/// §3 "Memory-reservation node" names usable memory as the counterpart
/// list to the reserved one; spec §6 lists `reg` as the property that
/// carries it).
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
}

pub struct FdtManager {
    nodes: Vec<Node>,
    props: Vec<Prop>,
    phandles: Vec<(u32, NodeId)>,
    reserved_memory: Vec<MemoryReservation>,
    memory: Vec<MemoryRegion>,
}

impl FdtManager {
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            props: Vec::new(),
            phandles: Vec::new(),
            reserved_memory: Vec::new(),
            memory: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].next_sibling
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].first_child
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].parent
    }

    pub fn name(&self, node: NodeId) -> &str {
        &self.nodes[node].name
    }

    pub fn first_prop(&self, node: NodeId) -> Option<PropId> {
        self.nodes[node].first_prop
    }

    pub fn next_prop(&self, prop: PropId) -> Option<PropId> {
        self.props[prop].next_prop
    }

    pub fn prop_name(&self, prop: PropId) -> &str {
        &self.props[prop].name
    }

    pub fn prop_cells(&self, prop: PropId) -> &[u8] {
        &self.props[prop].cells
    }

    pub fn prop_by_name(&self, node: NodeId, name: &str) -> Option<PropId> {
        let mut cursor = self.nodes[node].first_prop;
        while let Some(p) = cursor {
            if self.props[p].name == name {
                return Some(p);
            }
            cursor = self.props[p].next_prop;
        }
        None
    }

    pub fn node_by_phandle(&self, id: u32) -> Option<NodeId> {
        self.phandles.iter().find(|(h, _)| *h == id).map(|(_, n)| *n)
    }

    /// First DFS match (spec §9 "Open questions" fixes this ambiguity).
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.root().and_then(|root| self.find_by_name_dfs(root, name))
    }

    fn find_by_name_dfs(&self, node: NodeId, name: &str) -> Option<NodeId> {
        if self.nodes[node].name == name {
            return Some(node);
        }
        let mut child = self.nodes[node].first_child;
        while let Some(c) = child {
            if let Some(found) = self.find_by_name_dfs(c, name) {
                return Some(found);
            }
            child = self.nodes[c].next_sibling;
        }
        None
    }

    /// Prefix-exact string compare against the `compatible` property,
    /// which may contain several NUL-separated strings.
    pub fn match_compatible(&self, node: NodeId, compatible: &str) -> bool {
        let Some(prop) = self.prop_by_name(node, "compatible") else {
            return false;
        };
        for candidate in self.props[prop].cells.split(|b| *b == 0) {
            if candidate == compatible.as_bytes() {
                return true;
            }
        }
        false
    }

    pub fn is_node_operational(&self, node: NodeId) -> bool {
        match self.prop_by_name(node, "status") {
            None => true,
            Some(prop) => {
                let cells = &self.props[prop].cells;
                cells.starts_with(b"okay")
            }
        }
    }

    pub fn get_reserved_memory(&self) -> &[MemoryReservation] {
        &self.reserved_memory
    }

    /// Usable memory list, built from every direct child of the root
    /// whose name is `"memory"` or starts with `"memory@"`, parsing its
    /// `reg` property into `(base, size)` pairs using that node's own
    /// (possibly inherited) address/size cells (spec §3, §6).
    pub fn get_memory(&self) -> &[MemoryRegion] {
        &self.memory
    }

    /// Associates `ptr` with `node`; a later `get_device_data` looks it
    /// up by the node's `phandle` (spec §4.G).
    pub fn set_device_data(&mut self, node: NodeId, ptr: usize) {
        self.nodes[node].device_data = Some(ptr);
    }

    pub fn get_device_data(&self, phandle: u32) -> Option<usize> {
        self.node_by_phandle(phandle)
            .and_then(|node| self.nodes[node].device_data)
    }

    /// Parses `blob` in place. Every name and property payload is copied
    /// into owned storage before this function returns, so `blob` need
    /// not outlive the call.
    pub fn init(&mut self, blob: &[u8]) -> KernelResult<()> {
        if blob.len() < core::mem::size_of::<FdtHeader>() {
            return Err(KernelError::IncorrectValue);
        }
        let header = read_header(blob)?;
        if header.magic != FDT_MAGIC {
            return Err(KernelError::IncorrectValue);
        }
        if (header.total_size as usize) > blob.len() {
            return Err(KernelError::IncorrectValue);
        }

        self.nodes.clear();
        self.props.clear();
        self.phandles.clear();
        self.reserved_memory.clear();
        self.memory.clear();

        let mut rsv_cursor = header.off_mem_rsvmap as usize;
        loop {
            let base = read_u64(blob, rsv_cursor)?;
            let size = read_u64(blob, rsv_cursor + 8)?;
            if base == 0 && size == 0 {
                break;
            }
            self.reserved_memory.push(MemoryReservation { base, size });
            rsv_cursor += 16;
        }

        let struct_start = header.off_dt_struct as usize;
        let struct_end = struct_start + header.size_dt_struct as usize;
        let strings_start = header.off_dt_strings as usize;

        let mut cursor = struct_start;
        self.parse_node(
            blob,
            strings_start,
            struct_end,
            &mut cursor,
            None,
            DEFAULT_ADDRESS_CELLS,
            DEFAULT_SIZE_CELLS,
        )?;
        self.collect_memory_regions();
        Ok(())
    }

    fn collect_memory_regions(&mut self) {
        let Some(root) = self.root() else {
            return;
        };
        let mut child = self.first_child(root);
        while let Some(c) = child {
            if self.nodes[c].name == "memory" || self.nodes[c].name.starts_with("memory@") {
                if let Some(prop) = self.prop_by_name(c, "reg") {
                    self.push_reg_entries(c, prop);
                }
            }
            child = self.next_sibling(c);
        }
    }

    fn push_reg_entries(&mut self, node: NodeId, prop: PropId) {
        let address_cells = self.nodes[node].address_cells as usize;
        let size_cells = self.nodes[node].size_cells as usize;
        let entry_len = (address_cells + size_cells) * 4;
        if entry_len == 0 {
            return;
        }
        let cells = self.props[prop].cells.clone();
        let mut offset = 0;
        while offset + entry_len <= cells.len() {
            let base = read_be_cells(&cells[offset..offset + address_cells * 4]);
            let size = read_be_cells(&cells[offset + address_cells * 4..offset + entry_len]);
            self.memory.push(MemoryRegion { base, size });
            offset += entry_len;
        }
    }

    fn parse_node(
        &mut self,
        blob: &[u8],
        strings_start: usize,
        struct_end: usize,
        cursor: &mut usize,
        parent: Option<NodeId>,
        inherited_address_cells: u32,
        inherited_size_cells: u32,
    ) -> KernelResult<NodeId> {
        skip_nops(blob, struct_end, cursor)?;
        if read_u32(blob, *cursor)? != FDT_BEGIN_NODE {
            return Err(KernelError::IncorrectValue);
        }
        *cursor += 4;
        let name = read_nul_string(blob, *cursor)?;
        *cursor += name.len() + 1;
        align4(cursor);

        let node_id = self.nodes.len();
        self.nodes.push(Node {
            name,
            address_cells: inherited_address_cells,
            size_cells: inherited_size_cells,
            parent,
            first_child: None,
            next_sibling: None,
            first_prop: None,
            device_data: None,
        });

        let mut last_prop: Option<PropId> = None;
        let mut last_child: Option<NodeId> = None;

        loop {
            skip_nops(blob, struct_end, cursor)?;
            let token = read_u32(blob, *cursor)?;
            match token {
                FDT_PROP => {
                    *cursor += 4;
                    let len = read_u32(blob, *cursor)? as usize;
                    *cursor += 4;
                    let name_offset = read_u32(blob, *cursor)? as usize;
                    *cursor += 4;
                    let prop_name = read_nul_string(blob, strings_start + name_offset)?;
                    let cells = blob
                        .get(*cursor..*cursor + len)
                        .ok_or(KernelError::IncorrectValue)?
                        .to_vec();
                    *cursor += len;
                    align4(cursor);

                    self.apply_binding_action(node_id, &prop_name, &cells)?;

                    let prop_id = self.props.len();
                    self.props.push(Prop {
                        name: prop_name,
                        cells,
                        next_prop: None,
                    });
                    match last_prop {
                        Some(p) => self.props[p].next_prop = Some(prop_id),
                        None => self.nodes[node_id].first_prop = Some(prop_id),
                    }
                    last_prop = Some(prop_id);
                }
                FDT_BEGIN_NODE => {
                    let (addr_cells, size_cells) = {
                        let n = &self.nodes[node_id];
                        (n.address_cells, n.size_cells)
                    };
                    let child_id = self.parse_node(
                        blob,
                        strings_start,
                        struct_end,
                        cursor,
                        Some(node_id),
                        addr_cells,
                        size_cells,
                    )?;
                    match last_child {
                        Some(c) => self.nodes[c].next_sibling = Some(child_id),
                        None => self.nodes[node_id].first_child = Some(child_id),
                    }
                    last_child = Some(child_id);
                }
                FDT_END_NODE => {
                    *cursor += 4;
                    return Ok(node_id);
                }
                FDT_END => return Err(KernelError::IncorrectValue),
                _ => return Err(KernelError::IncorrectValue),
            }
        }
    }

    fn apply_binding_action(&mut self, node: NodeId, name: &str, cells: &[u8]) -> KernelResult<()> {
        match name {
            "phandle" | "linux,phandle" => {
                if cells.len() != 4 {
                    return Err(KernelError::IncorrectValue);
                }
                let id = u32::from_be_bytes(cells.try_into().unwrap());
                self.phandles.push((id, node));
            }
            "#address-cells" => {
                if cells.len() != 4 {
                    return Err(KernelError::IncorrectValue);
                }
                self.nodes[node].address_cells = u32::from_be_bytes(cells.try_into().unwrap());
            }
            "#size-cells" => {
                if cells.len() != 4 {
                    return Err(KernelError::IncorrectValue);
                }
                self.nodes[node].size_cells = u32::from_be_bytes(cells.try_into().unwrap());
            }
            _ => {}
        }
        Ok(())
    }
}

fn read_header(blob: &[u8]) -> KernelResult<FdtHeader> {
    Ok(FdtHeader {
        magic: read_u32(blob, 0)?,
        total_size: read_u32(blob, 4)?,
        off_dt_struct: read_u32(blob, 8)?,
        off_dt_strings: read_u32(blob, 12)?,
        off_mem_rsvmap: read_u32(blob, 16)?,
        version: read_u32(blob, 20)?,
        last_comp_version: read_u32(blob, 24)?,
        boot_cpuid_phys: read_u32(blob, 28)?,
        size_dt_strings: read_u32(blob, 32)?,
        size_dt_struct: read_u32(blob, 36)?,
    })
}

fn read_u32(blob: &[u8], offset: usize) -> KernelResult<u32> {
    let bytes = blob
        .get(offset..offset + 4)
        .ok_or(KernelError::IncorrectValue)?;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

fn read_u64(blob: &[u8], offset: usize) -> KernelResult<u64> {
    let bytes = blob
        .get(offset..offset + 8)
        .ok_or(KernelError::IncorrectValue)?;
    Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
}

fn read_nul_string(blob: &[u8], offset: usize) -> KernelResult<String> {
    let rest = blob.get(offset..).ok_or(KernelError::IncorrectValue)?;
    let end = rest.iter().position(|b| *b == 0).ok_or(KernelError::IncorrectValue)?;
    String::from_utf8(rest[..end].to_vec()).map_err(|_| KernelError::IncorrectValue)
}

/// Combines one or two big-endian 32-bit cells into a single value, the
/// way `#address-cells`/`#size-cells` of 1 or 2 are meant to be read.
fn read_be_cells(bytes: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for chunk in bytes.chunks(4) {
        let cell = u32::from_be_bytes(chunk.try_into().unwrap());
        value = (value << 32) | cell as u64;
    }
    value
}

fn align4(cursor: &mut usize) {
    *cursor = (*cursor + 3) & !3;
}

fn skip_nops(blob: &[u8], struct_end: usize, cursor: &mut usize) -> KernelResult<()> {
    while *cursor < struct_end && read_u32(blob, *cursor)? == FDT_NOP {
        *cursor += 4;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-builds a minimal FDT blob: root (compatible="utk,utk-fdt-v1")
    /// with child "cpus" containing cpu@0..cpu@3, and a sibling node
    /// "acpi@E0000" with phandle=1 (spec §8 scenario 3).
    fn build_test_blob() -> Vec<u8> {
        let mut strings = Vec::new();
        let mut struct_data = Vec::new();

        let mut intern = |strings: &mut Vec<u8>, s: &str| -> u32 {
            let offset = strings.len() as u32;
            strings.extend_from_slice(s.as_bytes());
            strings.push(0);
            offset
        };

        fn push_token(buf: &mut Vec<u8>, token: u32) {
            buf.extend_from_slice(&token.to_be_bytes());
        }
        fn push_name(buf: &mut Vec<u8>, name: &str) {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        }
        fn push_prop(buf: &mut Vec<u8>, name_offset: u32, payload: &[u8]) {
            push_token(buf, FDT_PROP);
            buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            buf.extend_from_slice(&name_offset.to_be_bytes());
            buf.extend_from_slice(payload);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        }

        let compatible_off = intern(&mut strings, "compatible");
        let phandle_off = intern(&mut strings, "phandle");
        let reg_off = intern(&mut strings, "reg");

        // root
        push_token(&mut struct_data, FDT_BEGIN_NODE);
        push_name(&mut struct_data, "");
        let mut compatible_payload = b"utk,utk-fdt-v1".to_vec();
        compatible_payload.push(0);
        push_prop(&mut struct_data, compatible_off, &compatible_payload);

        // cpus node with four children
        push_token(&mut struct_data, FDT_BEGIN_NODE);
        push_name(&mut struct_data, "cpus");
        for i in 0..4 {
            push_token(&mut struct_data, FDT_BEGIN_NODE);
            push_name(&mut struct_data, &alloc::format!("cpu@{i}"));
            push_token(&mut struct_data, FDT_END_NODE);
        }
        push_token(&mut struct_data, FDT_END_NODE); // end cpus

        // acpi node with phandle=1
        push_token(&mut struct_data, FDT_BEGIN_NODE);
        push_name(&mut struct_data, "acpi@E0000");
        push_prop(&mut struct_data, phandle_off, &1u32.to_be_bytes());
        push_token(&mut struct_data, FDT_END_NODE);

        // memory node: default address-cells=2, size-cells=1, one (base, size) pair
        push_token(&mut struct_data, FDT_BEGIN_NODE);
        push_name(&mut struct_data, "memory@0");
        let mut reg_payload = Vec::new();
        reg_payload.extend_from_slice(&0u32.to_be_bytes());
        reg_payload.extend_from_slice(&0x1000_0000u32.to_be_bytes());
        reg_payload.extend_from_slice(&0x2000_0000u32.to_be_bytes());
        push_prop(&mut struct_data, reg_off, &reg_payload);
        push_token(&mut struct_data, FDT_END_NODE);

        push_token(&mut struct_data, FDT_END_NODE); // end root
        push_token(&mut struct_data, FDT_END);

        let header_size = core::mem::size_of::<FdtHeader>();
        let mem_rsv_size = 16; // one terminating {0,0} entry
        let struct_offset = header_size + mem_rsv_size;
        let strings_offset = struct_offset + struct_data.len();
        let total_size = strings_offset + strings.len();

        let mut blob = Vec::new();
        blob.extend_from_slice(&FDT_MAGIC.to_be_bytes());
        blob.extend_from_slice(&(total_size as u32).to_be_bytes());
        blob.extend_from_slice(&(struct_offset as u32).to_be_bytes());
        blob.extend_from_slice(&(strings_offset as u32).to_be_bytes());
        blob.extend_from_slice(&(header_size as u32).to_be_bytes());
        blob.extend_from_slice(&17u32.to_be_bytes()); // version
        blob.extend_from_slice(&17u32.to_be_bytes()); // last_comp_version
        blob.extend_from_slice(&0u32.to_be_bytes()); // boot_cpuid_phys
        blob.extend_from_slice(&(strings.len() as u32).to_be_bytes());
        blob.extend_from_slice(&(struct_data.len() as u32).to_be_bytes());
        blob.extend_from_slice(&0u64.to_be_bytes()); // mem rsv terminator base
        blob.extend_from_slice(&0u64.to_be_bytes()); // mem rsv terminator size
        blob.extend_from_slice(&struct_data);
        blob.extend_from_slice(&strings);
        blob
    }

    #[test]
    fn parses_tree_shape_and_phandle() {
        let blob = build_test_blob();
        let mut fdt = FdtManager::new();
        fdt.init(&blob).unwrap();

        let root = fdt.root().unwrap();
        assert!(fdt.match_compatible(root, "utk,utk-fdt-v1"));

        let cpus = fdt.first_child(root).unwrap();
        assert_eq!(fdt.name(cpus), "cpus");

        let cpu0 = fdt.first_child(cpus).unwrap();
        assert_eq!(fdt.name(cpu0), "cpu@0");
        let cpu1 = fdt.next_sibling(cpu0).unwrap();
        assert_eq!(fdt.name(cpu1), "cpu@1");
        let cpu2 = fdt.next_sibling(cpu1).unwrap();
        assert_eq!(fdt.name(cpu2), "cpu@2");
        let cpu3 = fdt.next_sibling(cpu2).unwrap();
        assert_eq!(fdt.name(cpu3), "cpu@3");
        assert!(fdt.next_sibling(cpu3).is_none());

        let acpi = fdt.next_sibling(cpus).unwrap();
        assert_eq!(fdt.name(acpi), "acpi@E0000");
        assert_eq!(fdt.node_by_phandle(1), Some(acpi));
    }

    #[test]
    fn node_by_name_finds_first_dfs_match() {
        let blob = build_test_blob();
        let mut fdt = FdtManager::new();
        fdt.init(&blob).unwrap();
        assert_eq!(fdt.name(fdt.node_by_name("cpu@2").unwrap()), "cpu@2");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut blob = build_test_blob();
        blob[0] = 0;
        let mut fdt = FdtManager::new();
        assert!(fdt.init(&blob).is_err());
    }

    #[test]
    fn get_memory_parses_reg_property() {
        let blob = build_test_blob();
        let mut fdt = FdtManager::new();
        fdt.init(&blob).unwrap();

        let regions = fdt.get_memory();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].base, 0x1000_0000);
        assert_eq!(regions[0].size, 0x2000_0000);
    }

    #[test]
    fn device_data_round_trips_through_phandle() {
        let blob = build_test_blob();
        let mut fdt = FdtManager::new();
        fdt.init(&blob).unwrap();

        let acpi = fdt.node_by_phandle(1).unwrap();
        assert_eq!(fdt.get_device_data(1), None);
        fdt.set_device_data(acpi, 0x1234);
        assert_eq!(fdt.get_device_data(1), Some(0x1234));
    }
}
