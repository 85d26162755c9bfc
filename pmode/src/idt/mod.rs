//! Interrupt Descriptor Table and interrupt dispatch.
//!
//! Every vector enters through an assembly stub that saves an
//! [`InterruptFrame`] and calls into the kernel, which hands the frame to
//! [`InterruptDispatcher::dispatch`]. The dispatcher classifies the vector
//! (see [`vector`]) and looks up the handler registered for it:
//!
//! | Class    | Registered         | Unregistered            |
//! |----------|--------------------|-------------------------|
//! | fault    | handler            | diagnostic, halt        |
//! | IRQ      | handler, then EOI  | EOI                     |
//! | software | handler            | warning                 |
//! | reserved | -                  | diagnostic, halt        |
//!
//! # Installation
//!
//! 1. remap the 8259 pair
//! 2. point all 256 gates at the fallback stub
//! 3. install one gate per vector, reserved ones included
//! 4. `lidt`

pub mod dispatch;
pub mod frame;
pub mod gate;
pub mod registry;
pub mod vector;

#[cfg(test)]
mod tests;

use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

use crate::config::{PicConfig, FAULT_HANDLERS, IRQ_LINES, SOFTWARE_HANDLERS};
use crate::hal::Cpu;
use crate::pic::ChainedPics;

pub use dispatch::Route;
pub use frame::InterruptFrame;
pub use gate::{GateDescriptor, GateKind, InterruptDescriptorTable};
pub use registry::{Handler, RegistrationError, Registry};
pub use vector::{exception_name, LayoutError, VectorClass, VectorLayout};

use vector::fault_index;

/// Addresses of the assembly entry stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trampolines {
    /// Entry every gate holds until its own stub is installed.
    pub fallback: u32,
    /// Entry of the stub for vector 0.
    pub stubs: u32,
    /// Distance between consecutive stubs.
    pub stride: u32,
}

impl Trampolines {
    pub fn entry(&self, vector: u8) -> u32 {
        self.stubs + self.stride * u32::from(vector)
    }
}

/// One gate to install: a vector, its class and its stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSpec {
    pub vector: u8,
    pub class: VectorClass,
    pub entry: u32,
}

/// The gate of every vector under `layout`, in vector order.
///
/// Reserved vectors get their stub too, so a stray one reaches
/// [`Route::Reserved`] with its vector and error code.
pub fn gate_plan(
    layout: VectorLayout,
    trampolines: Trampolines,
) -> impl Iterator<Item = GateSpec> {
    (0..=u8::MAX).map(move |vector| GateSpec {
        vector,
        class: layout.classify(vector),
        entry: trampolines.entry(vector),
    })
}

/// The IDT, the interrupt controllers and the three handler registries.
pub struct InterruptDispatcher {
    idt: InterruptDescriptorTable,
    pics: ChainedPics,
    faults: Registry<FAULT_HANDLERS>,
    irqs: Registry<IRQ_LINES>,
    software: Registry<SOFTWARE_HANDLERS>,
    /// Gate DPL of each software vector, by software index.
    software_dpl: [PrivilegeLevel; SOFTWARE_HANDLERS],
    installed: bool,
}

impl InterruptDispatcher {
    /// Dispatcher for the default layout, nothing registered or installed.
    pub const fn new() -> Self {
        InterruptDispatcher {
            idt: InterruptDescriptorTable::new(),
            pics: ChainedPics::new(VectorLayout::DEFAULT, 0),
            faults: Registry::new(),
            irqs: Registry::new(),
            software: Registry::new(),
            software_dpl: [PrivilegeLevel::Ring0; SOFTWARE_HANDLERS],
            installed: false,
        }
    }

    /// Switch to the vector bases and mask in `config`.
    ///
    /// Software handlers follow their vector. A handler whose vector now
    /// carries an IRQ is dropped with a warning. Takes effect in hardware
    /// at the next [`install`](Self::install).
    pub fn configure(&mut self, config: &PicConfig) -> Result<(), LayoutError> {
        let pics = ChainedPics::from_config(config)?;
        let old = *self.pics.layout();
        let new = *pics.layout();

        if old != new {
            let mut software = Registry::new();
            let mut software_dpl = [PrivilegeLevel::Ring0; SOFTWARE_HANDLERS];
            for index in 0..SOFTWARE_HANDLERS {
                let handler = self.software.get(index);
                let (Some(handler), Some(vector)) = (handler, old.software_vector(index)) else {
                    continue;
                };
                match new.software_index(vector) {
                    Some(moved) => {
                        software.set(moved, handler);
                        software_dpl[moved] = self.software_dpl[index];
                    }
                    None => log::warn!(
                        "idt: dropping software handler for 0x{:x}, now an IRQ vector",
                        vector
                    ),
                }
            }
            self.software = software;
            self.software_dpl = software_dpl;
        }

        self.pics = pics;
        Ok(())
    }

    /// Remap the PICs, fill the table and load IDTR.
    ///
    /// # Safety
    /// `self` must not move afterwards, `code_selector` must be the loaded
    /// kernel code segment, and every stub address in `trampolines` must be
    /// a valid entry stub. Interrupts must be disabled.
    pub unsafe fn install<C: Cpu + ?Sized>(
        &mut self,
        cpu: &mut C,
        trampolines: Trampolines,
        code_selector: SegmentSelector,
    ) {
        // SAFETY: interrupts are off per the caller's contract, and the
        // table loaded below covers the new vectors.
        unsafe { self.pics.initialize(cpu) };

        let fallback = GateDescriptor::new(
            trampolines.fallback,
            code_selector,
            GateKind::Interrupt,
            PrivilegeLevel::Ring0,
        );
        for vector in 0..=u8::MAX {
            self.idt.set(vector, fallback);
        }

        let layout = *self.pics.layout();
        let mut installed = 0usize;
        for spec in gate_plan(layout, trampolines) {
            let dpl = match spec.class {
                VectorClass::Software(index) => self.software_dpl[index],
                _ => PrivilegeLevel::Ring0,
            };
            self.idt.set(
                spec.vector,
                GateDescriptor::new(spec.entry, code_selector, GateKind::Interrupt, dpl),
            );
            installed += 1;
        }

        let pointer = self.idt.pointer();
        // SAFETY: the table is fully populated and stays put per the
        // caller's contract.
        unsafe { cpu.load_idt(&pointer) };
        self.installed = true;

        log::info!(
            "idt: {} gates installed, base=0x{:x} limit={}",
            installed,
            pointer.base,
            pointer.limit
        );
    }

    pub fn set_fault_handler(
        &mut self,
        vector: u8,
        handler: &'static dyn Handler,
    ) -> Result<(), RegistrationError> {
        let index = fault_index(vector).ok_or(RegistrationError::NotAFault(vector))?;
        self.faults.set(index, handler);
        Ok(())
    }

    pub fn set_irq_handler(
        &mut self,
        line: u8,
        handler: &'static dyn Handler,
    ) -> Result<(), RegistrationError> {
        if !self.irqs.set(usize::from(line), handler) {
            return Err(RegistrationError::NoSuchIrqLine(line));
        }
        Ok(())
    }

    /// Register `handler` for software vector `vector` and let code running
    /// at `dpl` or more privileged raise it with `int`.
    pub fn set_int_handler(
        &mut self,
        vector: u8,
        handler: &'static dyn Handler,
        dpl: PrivilegeLevel,
    ) -> Result<(), RegistrationError> {
        let index = self
            .pics
            .layout()
            .software_index(vector)
            .ok_or(RegistrationError::NotASoftwareVector(vector))?;
        self.software.set(index, handler);
        self.set_software_dpl(vector, index, dpl);
        Ok(())
    }

    pub fn clear_fault_handler(&mut self, vector: u8) -> Result<(), RegistrationError> {
        let index = fault_index(vector).ok_or(RegistrationError::NotAFault(vector))?;
        self.faults.clear(index);
        Ok(())
    }

    pub fn clear_irq_handler(&mut self, line: u8) -> Result<(), RegistrationError> {
        if !self.irqs.clear(usize::from(line)) {
            return Err(RegistrationError::NoSuchIrqLine(line));
        }
        Ok(())
    }

    /// Unregister the handler and drop the gate back to DPL 0.
    pub fn clear_int_handler(&mut self, vector: u8) -> Result<(), RegistrationError> {
        let index = self
            .pics
            .layout()
            .software_index(vector)
            .ok_or(RegistrationError::NotASoftwareVector(vector))?;
        self.software.clear(index);
        self.set_software_dpl(vector, index, PrivilegeLevel::Ring0);
        Ok(())
    }

    /// Look up what `vector` should do, without running it.
    pub fn route(&self, vector: u8) -> Route {
        match self.pics.layout().classify(vector) {
            VectorClass::Fault(index) => Route::Fault {
                vector,
                handler: self.faults.get(index),
            },
            VectorClass::Irq(line) => Route::Irq {
                line,
                handler: self.irqs.get(usize::from(line)),
            },
            VectorClass::Software(index) => Route::Software {
                vector,
                handler: self.software.get(index),
            },
            VectorClass::Reserved => Route::Reserved { vector },
        }
    }

    /// Route and run the interrupt described by `frame`.
    pub fn dispatch(&self, frame: &mut InterruptFrame, cpu: &mut dyn Cpu) {
        self.route(frame.vector()).run(frame, cpu);
    }

    pub fn idt(&self) -> &InterruptDescriptorTable {
        &self.idt
    }

    pub fn layout(&self) -> &VectorLayout {
        self.pics.layout()
    }

    pub fn pics(&self) -> &ChainedPics {
        &self.pics
    }

    pub fn pics_mut(&mut self) -> &mut ChainedPics {
        &mut self.pics
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    fn set_software_dpl(&mut self, vector: u8, index: usize, dpl: PrivilegeLevel) {
        self.software_dpl[index] = dpl;
        let gate = self.idt.gate_mut(vector);
        if gate.is_present() {
            gate.set_dpl(dpl);
        }
    }
}

impl Default for InterruptDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
