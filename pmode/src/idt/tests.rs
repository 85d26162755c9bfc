use core::sync::atomic::{AtomicUsize, Ordering};

use x86_64::PrivilegeLevel;

use super::vector::{fault_vector, has_error_code};
use super::*;
use crate::config::IDT_ENTRIES;
use crate::gdt::KERNEL_CODE_SELECTOR;
use crate::hal::linear_address;
use crate::hal::mock::{HwOp, MockCpu};

const TRAMPOLINES: Trampolines = Trampolines {
    fallback: 0x0010_1000,
    stubs: 0x0010_2000,
    stride: 16,
};

fn layout(primary_base: u8, secondary_base: u8) -> VectorLayout {
    VectorLayout::new(&PicConfig {
        primary_base,
        secondary_base,
        initial_mask: 0,
    })
    .unwrap()
}

fn layouts() -> Vec<VectorLayout> {
    vec![
        VectorLayout::DEFAULT,
        layout(0x30, 0x70),
        layout(0x70, 0x30),
        layout(0xF0, 0x20),
    ]
}

fn installed() -> (Box<InterruptDispatcher>, MockCpu) {
    let mut dispatcher = Box::new(InterruptDispatcher::new());
    let mut cpu = MockCpu::new();
    unsafe { dispatcher.install(&mut cpu, TRAMPOLINES, KERNEL_CODE_SELECTOR) };
    cpu.clear();
    (dispatcher, cpu)
}

// === Vector transforms ===

#[test]
fn test_fault_transform_is_bijective() {
    let mut seen = 0;
    for vector in 0..=u8::MAX {
        if let Some(index) = fault_index(vector) {
            assert!(index < FAULT_HANDLERS);
            assert_eq!(fault_vector(index), Some(vector));
            seen += 1;
        }
    }
    assert_eq!(seen, FAULT_HANDLERS);
    for index in 0..FAULT_HANDLERS {
        assert_eq!(fault_vector(index).and_then(fault_index), Some(index));
    }
    assert_eq!(fault_vector(FAULT_HANDLERS), None);
}

#[test]
fn test_fault_holes() {
    for vector in (22..=27).chain([31]) {
        assert_eq!(fault_index(vector), None);
        assert_eq!(VectorLayout::DEFAULT.classify(vector), VectorClass::Reserved);
    }
    assert_eq!(fault_index(21), Some(21));
    assert_eq!(fault_index(28), Some(22));
    assert_eq!(fault_index(30), Some(24));
}

#[test]
fn test_irq_transform_is_bijective() {
    for layout in layouts() {
        for line in 0..IRQ_LINES as u8 {
            let vector = layout.irq_vector(line).unwrap();
            assert_eq!(layout.irq_line(vector), Some(line));
            assert_eq!(layout.classify(vector), VectorClass::Irq(line));
        }
        assert_eq!(layout.irq_vector(IRQ_LINES as u8), None);
    }
}

#[test]
fn test_default_irq_vectors() {
    let layout = VectorLayout::DEFAULT;
    assert_eq!(layout.irq_vector(0), Some(0x20));
    assert_eq!(layout.irq_vector(1), Some(0x21));
    assert_eq!(layout.irq_vector(8), Some(0x28));
    assert_eq!(layout.irq_vector(15), Some(0x2F));
    assert_eq!(layout.software_vector(0), Some(0x30));
}

#[test]
fn test_software_transform_is_bijective() {
    for layout in layouts() {
        let mut seen = 0;
        for vector in 0..=u8::MAX {
            if let Some(index) = layout.software_index(vector) {
                assert!(index < SOFTWARE_HANDLERS);
                assert_eq!(layout.software_vector(index), Some(vector));
                seen += 1;
            }
        }
        assert_eq!(seen, SOFTWARE_HANDLERS);
        for index in 0..SOFTWARE_HANDLERS {
            let vector = layout.software_vector(index).unwrap();
            assert_eq!(layout.software_index(vector), Some(index));
        }
        assert_eq!(layout.software_vector(SOFTWARE_HANDLERS), None);
    }
}

#[test]
fn test_classes_partition_vector_space() {
    for layout in layouts() {
        let (mut faults, mut irqs, mut software, mut reserved) = (0, 0, 0, 0);
        for vector in 0..=u8::MAX {
            match layout.classify(vector) {
                VectorClass::Fault(_) => faults += 1,
                VectorClass::Irq(_) => irqs += 1,
                VectorClass::Software(_) => software += 1,
                VectorClass::Reserved => reserved += 1,
            }
        }
        assert_eq!(faults, FAULT_HANDLERS);
        assert_eq!(irqs, IRQ_LINES);
        assert_eq!(software, SOFTWARE_HANDLERS);
        assert_eq!(faults + irqs + software + reserved, IDT_ENTRIES);
    }
}

#[test]
fn test_exception_names() {
    assert_eq!(exception_name(0), Some("Division Error"));
    assert_eq!(exception_name(14), Some("Page Fault"));
    assert_eq!(exception_name(30), Some("Security Exception"));
    assert_eq!(exception_name(23), None);
    assert_eq!(exception_name(0x80), None);
    assert!(has_error_code(14));
    assert!(!has_error_code(3));
}

// === Installation ===

#[test]
fn test_install_order_and_idtr() {
    let mut dispatcher = Box::new(InterruptDispatcher::new());
    let mut cpu = MockCpu::new();
    unsafe { dispatcher.install(&mut cpu, TRAMPOLINES, KERNEL_CODE_SELECTOR) };

    assert_eq!(cpu.ops.first(), Some(&HwOp::PortRead(0x21)));
    assert_eq!(cpu.port_writes().len(), 10);

    let pointer = dispatcher.idt().pointer();
    assert_eq!(pointer.limit, 2047);
    assert_eq!(pointer.base, linear_address(dispatcher.idt()));
    assert_eq!(cpu.ops.last(), Some(&HwOp::LoadIdt(pointer)));
    assert_eq!(cpu.cpu_ops(), vec![HwOp::LoadIdt(pointer)]);
    assert!(dispatcher.is_installed());
}

#[test]
fn test_install_gates() {
    let (dispatcher, _) = installed();
    let idt = dispatcher.idt();

    for vector in 0..=u8::MAX {
        let gate = idt.gate(vector);
        assert!(gate.is_present());
        assert_eq!(gate.selector(), KERNEL_CODE_SELECTOR);
        assert_eq!(gate.type_attr(), 0x8E);

        assert_eq!(gate.offset(), TRAMPOLINES.entry(vector), "vector {}", vector);
        assert_ne!(gate.offset(), TRAMPOLINES.fallback, "vector {}", vector);
    }
    assert_eq!(idt.gate(0x80).offset(), 0x0010_2800);
}

#[test]
fn test_gate_plan_covers_every_class_vector() {
    let plan: Vec<GateSpec> = gate_plan(VectorLayout::DEFAULT, TRAMPOLINES).collect();
    assert_eq!(plan.len(), IDT_ENTRIES);
    assert!(plan.windows(2).all(|pair| pair[0].vector < pair[1].vector));
    let classified = plan.iter().filter(|spec| spec.class != VectorClass::Reserved).count();
    assert_eq!(classified, FAULT_HANDLERS + IRQ_LINES + SOFTWARE_HANDLERS);
    assert_eq!(
        plan[22],
        GateSpec {
            vector: 22,
            class: VectorClass::Reserved,
            entry: TRAMPOLINES.entry(22),
        }
    );
    assert_eq!(
        plan[0],
        GateSpec {
            vector: 0,
            class: VectorClass::Fault(0),
            entry: TRAMPOLINES.stubs,
        }
    );
}

// === Dispatch ===

fn frame(vector: u8) -> InterruptFrame {
    InterruptFrame::new(vector, 0)
}

#[test]
fn test_registered_fault_runs_once() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    fn divide_error(frame: &mut InterruptFrame, _cpu: &mut dyn Cpu) {
        assert_eq!(frame.vector(), 0);
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    let (mut dispatcher, mut cpu) = installed();
    dispatcher.set_fault_handler(0, &divide_error).unwrap();

    dispatcher.dispatch(&mut frame(0), &mut cpu);

    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    assert!(cpu.ops.is_empty());
}

#[test]
#[should_panic(expected = "cpu halted")]
fn test_unhandled_fault_halts() {
    let (dispatcher, mut cpu) = installed();
    dispatcher.dispatch(&mut InterruptFrame::new(13, 0x10), &mut cpu);
}

#[test]
#[should_panic(expected = "cpu halted")]
fn test_reserved_vector_halts() {
    let (dispatcher, mut cpu) = installed();
    dispatcher.dispatch(&mut frame(22), &mut cpu);
}

#[test]
fn test_unhandled_irq_only_acknowledges() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    fn timer(_frame: &mut InterruptFrame, _cpu: &mut dyn Cpu) {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    let (mut dispatcher, mut cpu) = installed();
    dispatcher.set_irq_handler(0, &timer).unwrap();

    let vector = dispatcher.layout().irq_vector(1).unwrap();
    dispatcher.dispatch(&mut frame(vector), &mut cpu);

    assert_eq!(cpu.port_writes(), vec![(0x20, 0x20)]);
    assert_eq!(CALLS.load(Ordering::SeqCst), 0);
}

#[test]
fn test_secondary_irq_handler_then_eoi() {
    fn mouse(_frame: &mut InterruptFrame, cpu: &mut dyn Cpu) {
        unsafe { cpu.write_u8(0x60, 0xF4) };
    }

    let (mut dispatcher, mut cpu) = installed();
    dispatcher.set_irq_handler(12, &mouse).unwrap();

    dispatcher.dispatch(&mut frame(0x2C), &mut cpu);

    assert_eq!(
        cpu.port_writes(),
        vec![(0x60, 0xF4), (0xA0, 0x20), (0x20, 0x20)]
    );
}

#[test]
fn test_software_handler_sets_return_value() {
    let (mut dispatcher, mut cpu) = installed();
    let handler = Box::leak(Box::new(|frame: &mut InterruptFrame, _cpu: &mut dyn Cpu| {
        frame.eax = frame.ebx + 1;
    }));
    dispatcher
        .set_int_handler(0x80, handler, PrivilegeLevel::Ring3)
        .unwrap();

    let mut regs = frame(0x80);
    regs.ebx = 41;
    dispatcher.dispatch(&mut regs, &mut cpu);

    assert_eq!(regs.eax, 42);
    assert!(cpu.ops.is_empty());
}

#[test]
fn test_unhandled_software_interrupt_returns() {
    let (dispatcher, mut cpu) = installed();
    let mut regs = frame(0x81);
    regs.eax = 7;

    dispatcher.dispatch(&mut regs, &mut cpu);

    assert_eq!(regs.eax, 7);
    assert!(cpu.ops.is_empty());
}

#[test]
fn test_route_detaches_from_dispatcher() {
    fn breakpoint(frame: &mut InterruptFrame, _cpu: &mut dyn Cpu) {
        frame.eip += 1;
    }

    let (mut dispatcher, mut cpu) = installed();
    dispatcher.set_fault_handler(3, &breakpoint).unwrap();

    let route = dispatcher.route(3);
    drop(dispatcher);

    let mut regs = frame(3);
    route.run(&mut regs, &mut cpu);
    assert_eq!(regs.eip, 1);
    assert!(matches!(route, Route::Fault { vector: 3, handler: Some(_) }));
}

// === Registration ===

fn noop(_frame: &mut InterruptFrame, _cpu: &mut dyn Cpu) {}

#[test]
fn test_registration_outside_class_is_rejected() {
    let (mut dispatcher, _) = installed();
    let before: Vec<[u8; 8]> = dispatcher.idt().gates().iter().map(|g| *g.as_bytes()).collect();

    assert_eq!(
        dispatcher.set_fault_handler(22, &noop),
        Err(RegistrationError::NotAFault(22))
    );
    assert_eq!(
        dispatcher.set_fault_handler(0x40, &noop),
        Err(RegistrationError::NotAFault(0x40))
    );
    assert_eq!(
        dispatcher.set_irq_handler(16, &noop),
        Err(RegistrationError::NoSuchIrqLine(16))
    );
    assert_eq!(
        dispatcher.set_int_handler(0x21, &noop, PrivilegeLevel::Ring3),
        Err(RegistrationError::NotASoftwareVector(0x21))
    );
    assert_eq!(
        dispatcher.set_int_handler(5, &noop, PrivilegeLevel::Ring3),
        Err(RegistrationError::NotASoftwareVector(5))
    );

    let after: Vec<[u8; 8]> = dispatcher.idt().gates().iter().map(|g| *g.as_bytes()).collect();
    assert_eq!(before, after);
    assert!(dispatcher.route(22).handler().is_none());
    assert!(dispatcher.route(0x21).handler().is_none());
}

#[test]
fn test_int_handler_raises_gate_dpl() {
    let (mut dispatcher, _) = installed();
    let before = *dispatcher.idt().gate(0x80);

    dispatcher
        .set_int_handler(0x80, &noop, PrivilegeLevel::Ring3)
        .unwrap();

    let after = dispatcher.idt().gate(0x80);
    assert_eq!(after.type_attr(), 0xEE);
    assert_eq!(after.dpl(), PrivilegeLevel::Ring3);
    assert_eq!(after.offset(), before.offset());
    assert_eq!(after.selector(), before.selector());
    assert_eq!(dispatcher.idt().gate(0x81).type_attr(), 0x8E);
}

#[test]
fn test_dpl_registered_before_install_survives() {
    let mut dispatcher = Box::new(InterruptDispatcher::new());
    dispatcher
        .set_int_handler(0x80, &noop, PrivilegeLevel::Ring3)
        .unwrap();
    assert!(!dispatcher.idt().gate(0x80).is_present());

    let mut cpu = MockCpu::new();
    unsafe { dispatcher.install(&mut cpu, TRAMPOLINES, KERNEL_CODE_SELECTOR) };

    assert_eq!(dispatcher.idt().gate(0x80).dpl(), PrivilegeLevel::Ring3);
}

#[test]
fn test_clear_handlers() {
    let (mut dispatcher, mut cpu) = installed();
    dispatcher.set_fault_handler(6, &noop).unwrap();
    dispatcher.set_irq_handler(3, &noop).unwrap();
    dispatcher
        .set_int_handler(0x80, &noop, PrivilegeLevel::Ring3)
        .unwrap();

    dispatcher.clear_fault_handler(6).unwrap();
    dispatcher.clear_irq_handler(3).unwrap();
    dispatcher.clear_int_handler(0x80).unwrap();

    assert!(dispatcher.route(6).handler().is_none());
    assert!(dispatcher.route(0x23).handler().is_none());
    assert!(dispatcher.route(0x80).handler().is_none());
    assert_eq!(dispatcher.idt().gate(0x80).dpl(), PrivilegeLevel::Ring0);

    assert_eq!(
        dispatcher.clear_irq_handler(20),
        Err(RegistrationError::NoSuchIrqLine(20))
    );

    dispatcher.dispatch(&mut frame(0x80), &mut cpu);
    assert!(cpu.ops.is_empty());
}

#[test]
fn test_configure_moves_software_handlers() {
    let mut dispatcher = Box::new(InterruptDispatcher::new());
    dispatcher
        .set_int_handler(0x80, &noop, PrivilegeLevel::Ring3)
        .unwrap();
    dispatcher
        .set_int_handler(0x70, &noop, PrivilegeLevel::Ring0)
        .unwrap();
    dispatcher.set_irq_handler(1, &noop).unwrap();

    dispatcher
        .configure(&PicConfig {
            primary_base: 0x30,
            secondary_base: 0x70,
            initial_mask: 0xFFFB,
        })
        .unwrap();

    assert!(matches!(dispatcher.route(0x80), Route::Software { handler: Some(_), .. }));
    assert!(matches!(dispatcher.route(0x70), Route::Irq { line: 8, handler: None }));
    assert!(matches!(dispatcher.route(0x31), Route::Irq { line: 1, handler: Some(_) }));
    assert!(matches!(dispatcher.route(0x20), Route::Software { handler: None, .. }));

    let mut cpu = MockCpu::new();
    unsafe { dispatcher.install(&mut cpu, TRAMPOLINES, KERNEL_CODE_SELECTOR) };
    assert_eq!(dispatcher.idt().gate(0x80).dpl(), PrivilegeLevel::Ring3);
    assert_eq!(&cpu.port_writes()[8..], &[(0x21, 0xFB), (0xA1, 0xFF)]);
}

#[test]
fn test_configure_rejects_bad_layout() {
    let mut dispatcher = InterruptDispatcher::new();
    let result = dispatcher.configure(&PicConfig {
        primary_base: 0x00,
        secondary_base: 0x08,
        initial_mask: 0,
    });
    assert_eq!(result, Err(LayoutError::CollidesWithExceptions(0x00)));
    assert_eq!(dispatcher.layout(), &VectorLayout::DEFAULT);
}
