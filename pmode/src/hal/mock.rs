//! Recording CPU for host tests.

use x86_64::structures::gdt::SegmentSelector;

use super::{Cpu, DescriptorTablePointer, PortIo};

/// One observable hardware operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwOp {
    LoadGdt(DescriptorTablePointer),
    LoadIdt(DescriptorTablePointer),
    ReloadDataSegments(u16),
    ReloadCodeSegment(u16),
    LoadTaskRegister(u16),
    WriteCr0(u32),
    WriteCr3(u32),
    PortWrite(u16, u8),
    PortRead(u16),
    DisableInterrupts,
    EnableInterrupts,
}

/// CPU double that records every operation in order.
///
/// `halt` panics with "cpu halted" so fatal paths can be asserted with
/// `#[should_panic]`.
#[derive(Debug, Default)]
pub struct MockCpu {
    pub ops: Vec<HwOp>,
    pub cr0: u32,
    pub cr2: u32,
    pub cr3: u32,
    pub interrupts: bool,
    /// Value returned by every port read.
    pub port_input: u8,
}

impl MockCpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Port writes in order.
    pub fn port_writes(&self) -> Vec<(u16, u8)> {
        self.ops
            .iter()
            .filter_map(|op| match *op {
                HwOp::PortWrite(port, value) => Some((port, value)),
                _ => None,
            })
            .collect()
    }

    /// Every operation except port traffic.
    pub fn cpu_ops(&self) -> Vec<HwOp> {
        self.ops
            .iter()
            .copied()
            .filter(|op| !matches!(op, HwOp::PortWrite(..) | HwOp::PortRead(_)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

impl PortIo for MockCpu {
    unsafe fn write_u8(&mut self, port: u16, value: u8) {
        self.ops.push(HwOp::PortWrite(port, value));
    }

    unsafe fn read_u8(&mut self, port: u16) -> u8 {
        self.ops.push(HwOp::PortRead(port));
        self.port_input
    }
}

impl Cpu for MockCpu {
    unsafe fn load_gdt(&mut self, pointer: &DescriptorTablePointer) {
        self.ops.push(HwOp::LoadGdt(*pointer));
    }

    unsafe fn load_idt(&mut self, pointer: &DescriptorTablePointer) {
        self.ops.push(HwOp::LoadIdt(*pointer));
    }

    unsafe fn reload_data_segments(&mut self, selector: SegmentSelector) {
        self.ops.push(HwOp::ReloadDataSegments(selector.0));
    }

    unsafe fn reload_code_segment(&mut self, selector: SegmentSelector) {
        self.ops.push(HwOp::ReloadCodeSegment(selector.0));
    }

    unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
        self.ops.push(HwOp::LoadTaskRegister(selector.0));
    }

    fn read_cr0(&self) -> u32 {
        self.cr0
    }

    unsafe fn write_cr0(&mut self, value: u32) {
        self.cr0 = value;
        self.ops.push(HwOp::WriteCr0(value));
    }

    fn read_cr2(&self) -> u32 {
        self.cr2
    }

    fn read_cr3(&self) -> u32 {
        self.cr3
    }

    unsafe fn write_cr3(&mut self, value: u32) {
        self.cr3 = value;
        self.ops.push(HwOp::WriteCr3(value));
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts
    }

    fn disable_interrupts(&mut self) {
        self.interrupts = false;
        self.ops.push(HwOp::DisableInterrupts);
    }

    unsafe fn enable_interrupts(&mut self) {
        self.interrupts = true;
        self.ops.push(HwOp::EnableInterrupts);
    }

    fn halt(&mut self) -> ! {
        panic!("cpu halted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::without_interrupts;

    #[test]
    fn test_without_interrupts_restores_state() {
        let mut cpu = MockCpu::new();
        cpu.interrupts = true;

        let seen = without_interrupts(&mut cpu, |cpu| cpu.interrupts_enabled());

        assert!(!seen);
        assert!(cpu.interrupts);
        assert_eq!(
            cpu.ops,
            vec![HwOp::DisableInterrupts, HwOp::EnableInterrupts]
        );
    }

    #[test]
    fn test_without_interrupts_leaves_disabled_cpu_alone() {
        let mut cpu = MockCpu::new();
        without_interrupts(&mut cpu, |_| ());
        assert!(cpu.ops.is_empty());
        assert!(!cpu.interrupts);
    }

    #[test]
    fn test_table_pointer_bytes() {
        let pointer = DescriptorTablePointer::new(0x0010_2000, 6);
        assert_eq!(pointer.limit, 47);
        assert_eq!(pointer.to_bytes(), [47, 0, 0x00, 0x20, 0x10, 0x00]);
    }
}
