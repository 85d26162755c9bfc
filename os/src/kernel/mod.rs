//! Kernel singletons and boot orchestration.
//!
//! The descriptor tables, the interrupt dispatcher, the frame pool and the
//! address space each live in a `spin::Mutex` static. Foreground code only
//! takes those locks with interrupts disabled; the interrupt path holds the
//! dispatcher lock just long enough to pick a [`Route`](pmode::idt::Route).

pub mod selftest;

use core::fmt;
use core::ptr::addr_of;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::LevelFilter;
use pmode::config::{KernelLayout, PicConfig, Section, PAGE_FAULT_VECTOR, PAGE_SIZE, SYSCALL_VECTOR};
use pmode::gdt::{DescriptorTables, KERNEL_CODE_SELECTOR};
use pmode::hal::{self, Cpu, PortIo};
use pmode::idt::{Handler, InterruptDispatcher, InterruptFrame, LayoutError, RegistrationError};
use pmode::paging::{
    self, page_fault_handler, AddressSpace, FrameAllocator, IdentityMemory, PagingError,
};
use pmode::{PhysAddr, PhysFrame};
use spin::Mutex;
use x86_64::PrivilegeLevel;

use crate::cpu::HardwareCpu;
use crate::entry;

/// Frames available for page tables.
pub const FRAME_POOL_FRAMES: usize = 64;

pub const TIMER_LINE: u8 = 0;
pub const TIMER_HZ: u32 = 100;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_RATE_GENERATOR: u8 = 0x36; // channel 0, lo/hi byte, mode 3
const PIT_BASE_HZ: u32 = 1_193_182;

/// System call numbers, passed in EAX.
pub const SYS_TICKS: u32 = 0;
pub const SYS_PAGING_ENABLED: u32 = 1;

#[repr(C, align(4096))]
struct FramePool([[u8; PAGE_SIZE as usize]; FRAME_POOL_FRAMES]);

static mut FRAME_POOL: FramePool = FramePool([[0; PAGE_SIZE as usize]; FRAME_POOL_FRAMES]);

static GDT: Mutex<DescriptorTables> = Mutex::new(DescriptorTables::new());
static GDT_INSTALLED: AtomicBool = AtomicBool::new(false);
static DISPATCHER: Mutex<InterruptDispatcher> = Mutex::new(InterruptDispatcher::new());
static FRAMES: Mutex<Option<FrameAllocator<FRAME_POOL_FRAMES>>> = Mutex::new(None);
static ADDRESS_SPACE: Mutex<Option<AddressSpace<IdentityMemory>>> = Mutex::new(None);
static TICKS: AtomicU32 = AtomicU32::new(0);

extern "C" {
    static _boot_start: u8;
    static _boot_end: u8;
    static _ro_start: u8;
    static _ro_end: u8;
    static _rw_start: u8;
    static _rw_end: u8;
    static _kernel_stack_bottom: u8;
    static _kernel_stack_top: u8;
}

/// Boot-time settings.
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    pub pic: PicConfig,
    pub syscall_vector: u8,
    pub log_level: LevelFilter,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            pic: PicConfig {
                // timer and the cascade line
                initial_mask: !(1 << TIMER_LINE | 1 << 2),
                ..PicConfig::DEFAULT
            },
            syscall_vector: SYSCALL_VECTOR,
            log_level: LevelFilter::Info,
        }
    }
}

#[derive(Debug)]
pub enum KernelInitError {
    AlreadyInstalled(&'static str),
    NotInstalled(&'static str),
    Layout(LayoutError),
    Registration(RegistrationError),
    Paging(PagingError),
    SelfTestFailed,
}

impl fmt::Display for KernelInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelInitError::AlreadyInstalled(what) => write!(f, "{} already installed", what),
            KernelInitError::NotInstalled(what) => write!(f, "{} not installed", what),
            KernelInitError::Layout(err) => write!(f, "interrupt layout: {}", err),
            KernelInitError::Registration(err) => write!(f, "handler registration: {}", err),
            KernelInitError::Paging(err) => write!(f, "paging: {}", err),
            KernelInitError::SelfTestFailed => write!(f, "self test failed"),
        }
    }
}

impl From<LayoutError> for KernelInitError {
    fn from(err: LayoutError) -> Self {
        KernelInitError::Layout(err)
    }
}

impl From<RegistrationError> for KernelInitError {
    fn from(err: RegistrationError) -> Self {
        KernelInitError::Registration(err)
    }
}

impl From<PagingError> for KernelInitError {
    fn from(err: PagingError) -> Self {
        KernelInitError::Paging(err)
    }
}

pub struct KernelState {
    pub layout: KernelLayout,
}

fn cpu() -> HardwareCpu {
    // SAFETY: the kernel runs at ring 0.
    unsafe { HardwareCpu::new() }
}

fn symbol(address: *const u8) -> u32 {
    address as usize as u32
}

/// Kernel image sections as placed by the linker script.
pub fn kernel_layout() -> KernelLayout {
    // SAFETY: only the addresses of the linker symbols are taken.
    unsafe {
        KernelLayout {
            boot: Section::identity(symbol(addr_of!(_boot_start)), symbol(addr_of!(_boot_end))),
            read_only: Section::identity(symbol(addr_of!(_ro_start)), symbol(addr_of!(_ro_end))),
            read_write: Section::identity(symbol(addr_of!(_rw_start)), symbol(addr_of!(_rw_end))),
            stack: Section::identity(
                symbol(addr_of!(_kernel_stack_bottom)),
                symbol(addr_of!(_kernel_stack_top)),
            ),
        }
    }
}

fn kernel_stack_top() -> u32 {
    // SAFETY: only the address is taken.
    symbol(unsafe { addr_of!(_kernel_stack_top) })
}

fn frame_pool_base() -> PhysFrame {
    // SAFETY: only the address is taken; paging is identity so it is physical.
    let address = symbol(unsafe { addr_of!(FRAME_POOL) }.cast());
    PhysFrame::containing_address(PhysAddr::new(address))
}

/// Build the GDT and TSS and load GDTR, the segment registers and TR.
pub fn install_gdt() -> Result<(), KernelInitError> {
    if GDT_INSTALLED.swap(true, Ordering::AcqRel) {
        return Err(KernelInitError::AlreadyInstalled("gdt"));
    }
    let mut cpu = cpu();
    hal::without_interrupts(&mut cpu, |cpu| {
        // SAFETY: the tables are in a static and never move; the stack is
        // the one reserved by the linker script.
        unsafe { GDT.lock().install(cpu, kernel_stack_top()) };
    });
    Ok(())
}

/// Remap the 8259 pair per `pic` and load the IDT.
pub fn install_idt(pic: &PicConfig) -> Result<(), KernelInitError> {
    let mut cpu = cpu();
    hal::without_interrupts(&mut cpu, |cpu| -> Result<(), KernelInitError> {
        let mut dispatcher = DISPATCHER.lock();
        dispatcher.configure(pic)?;
        // SAFETY: the dispatcher is in a static, the GDT holds the kernel
        // code segment, the stubs come from `entry` and interrupts are off.
        unsafe { dispatcher.install(cpu, entry::trampolines(), KERNEL_CODE_SELECTOR) };
        Ok(())
    })
}

fn with_dispatcher<R>(f: impl FnOnce(&mut InterruptDispatcher) -> R) -> R {
    let mut cpu = cpu();
    hal::without_interrupts(&mut cpu, |_| f(&mut DISPATCHER.lock()))
}

pub fn set_fault_handler(
    vector: u8,
    handler: &'static dyn Handler,
) -> Result<(), RegistrationError> {
    with_dispatcher(|dispatcher| dispatcher.set_fault_handler(vector, handler))
}

pub fn set_irq_handler(line: u8, handler: &'static dyn Handler) -> Result<(), RegistrationError> {
    with_dispatcher(|dispatcher| dispatcher.set_irq_handler(line, handler))
}

pub fn set_int_handler(
    vector: u8,
    handler: &'static dyn Handler,
    dpl: PrivilegeLevel,
) -> Result<(), RegistrationError> {
    with_dispatcher(|dispatcher| dispatcher.set_int_handler(vector, handler, dpl))
}

/// Entry point of every interrupt stub.
pub fn dispatch(frame: &mut InterruptFrame, cpu: &mut HardwareCpu) {
    let route = match DISPATCHER.try_lock() {
        Some(dispatcher) => dispatcher.route(frame.vector()),
        None => {
            log::error!("interrupt 0x{:x} with the dispatcher locked", frame.vector());
            cpu.halt()
        }
    };
    route.run(frame, cpu);
}

/// Build the kernel address space from `layout`. Paging stays off.
pub fn install_mmu(layout: &KernelLayout) -> Result<(), KernelInitError> {
    let mut cpu = cpu();
    hal::without_interrupts(&mut cpu, |_| -> Result<(), KernelInitError> {
        let mut space = ADDRESS_SPACE.lock();
        if space.is_some() {
            return Err(KernelInitError::AlreadyInstalled("mmu"));
        }

        let mut frames = FRAMES.lock();
        let frames = frames.get_or_insert_with(|| FrameAllocator::new(frame_pool_base()));
        // SAFETY: paging is off, so every frame of the pool is addressable
        // at its physical address.
        let memory = unsafe { IdentityMemory::new(0) };
        let mut new_space = AddressSpace::new(memory, frames)?;
        new_space.map_layout(frames, layout)?;

        log::info!("mmu: {} of {} table frames used", frames.used_frames(), frames.capacity());
        *space = Some(new_space);
        Ok(())
    })
}

pub fn enable_paging() -> Result<(), KernelInitError> {
    let mut cpu = cpu();
    hal::without_interrupts(&mut cpu, |cpu| -> Result<(), KernelInitError> {
        let space = ADDRESS_SPACE.lock();
        let space = space.as_ref().ok_or(KernelInitError::NotInstalled("mmu"))?;
        // SAFETY: the image, the stack and the frame pool are identity mapped.
        unsafe { space.activate(cpu)? };
        Ok(())
    })
}

pub fn disable_paging() {
    let mut cpu = cpu();
    hal::without_interrupts(&mut cpu, |cpu| {
        // SAFETY: the kernel is linked at its load address.
        unsafe { paging::deactivate(cpu) };
    });
}

pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

fn timer_tick(_frame: &mut InterruptFrame, _cpu: &mut dyn Cpu) {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

fn syscall(frame: &mut InterruptFrame, cpu: &mut dyn Cpu) {
    log::debug!(
        "syscall {} from ring {}",
        frame.eax,
        if frame.from_user_mode() { 3 } else { 0 }
    );
    frame.eax = match frame.eax {
        SYS_TICKS => ticks(),
        SYS_PAGING_ENABLED => u32::from(paging::is_enabled(&*cpu)),
        _ => u32::MAX,
    };
}

fn program_timer(cpu: &mut HardwareCpu, hz: u32) {
    let divisor = (PIT_BASE_HZ / hz) as u16;
    // SAFETY: the PIT only drives IRQ 0.
    unsafe {
        cpu.write_u8(PIT_COMMAND, PIT_RATE_GENERATOR);
        cpu.write_u8(PIT_CHANNEL0, divisor as u8);
        cpu.write_u8(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
}

/// Bring the protection machinery up, in order: GDT, IDT and handlers,
/// address space, paging, then interrupts.
pub fn early_init(config: &BootConfig) -> Result<KernelState, KernelInitError> {
    log::info!("pmode-os: starting");

    install_gdt()?;
    install_idt(&config.pic)?;

    set_fault_handler(PAGE_FAULT_VECTOR, &page_fault_handler)?;
    set_irq_handler(TIMER_LINE, &timer_tick)?;
    set_int_handler(config.syscall_vector, &syscall, PrivilegeLevel::Ring3)?;

    let layout = kernel_layout();
    install_mmu(&layout)?;
    enable_paging()?;

    if !selftest::run() {
        return Err(KernelInitError::SelfTestFailed);
    }

    let mut cpu = cpu();
    program_timer(&mut cpu, TIMER_HZ);
    // SAFETY: the IDT is loaded and the only unmasked line has a handler.
    unsafe { cpu.enable_interrupts() };
    log::info!("pmode-os: interrupts on, timer at {} Hz", TIMER_HZ);

    Ok(KernelState { layout })
}

pub fn kernel_loop(state: KernelState) -> ! {
    log::info!(
        "pmode-os: idle, image 0x{:x}-0x{:x}",
        state.layout.boot.start.as_u32(),
        state.layout.stack.end.as_u32()
    );
    let mut cpu = cpu();
    let mut reported = 0;
    loop {
        let seconds = ticks() / TIMER_HZ;
        if seconds != reported {
            reported = seconds;
            log::debug!("uptime {}s", seconds);
        }
        cpu.wait_for_interrupt();
    }
}

pub fn halt() -> ! {
    cpu().halt()
}
