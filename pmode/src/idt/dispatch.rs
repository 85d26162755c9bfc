//! What happens to one interrupt once its vector is known.

use core::fmt;

use super::frame::InterruptFrame;
use super::registry::Handler;
use super::vector::exception_name;
use crate::hal::Cpu;
use crate::pic;

/// The registry lookup for one vector, detached from the registries.
///
/// Produced by [`InterruptDispatcher::route`] under whatever lock guards
/// the dispatcher, then [`run`] after the lock is released, so a handler
/// may itself register handlers.
///
/// [`InterruptDispatcher::route`]: super::InterruptDispatcher::route
/// [`run`]: Route::run
#[derive(Clone, Copy)]
pub enum Route {
    Fault {
        vector: u8,
        handler: Option<&'static dyn Handler>,
    },
    Irq {
        line: u8,
        handler: Option<&'static dyn Handler>,
    },
    Software {
        vector: u8,
        handler: Option<&'static dyn Handler>,
    },
    /// A reserved exception vector fired.
    Reserved { vector: u8 },
}

impl Route {
    pub fn handler(&self) -> Option<&'static dyn Handler> {
        match *self {
            Route::Fault { handler, .. }
            | Route::Irq { handler, .. }
            | Route::Software { handler, .. } => handler,
            Route::Reserved { .. } => None,
        }
    }

    /// Run the class policy:
    ///
    /// - fault: the handler, or a diagnostic and halt
    /// - IRQ: the handler if any, then EOI in every case
    /// - software: the handler, or a warning
    /// - reserved: a diagnostic and halt
    pub fn run(self, frame: &mut InterruptFrame, cpu: &mut dyn Cpu) {
        match self {
            Route::Fault {
                handler: Some(handler),
                ..
            } => handler.handle(frame, cpu),
            Route::Fault {
                vector,
                handler: None,
            } => {
                log::error!(
                    "unhandled fault {} ({}): error code 0x{:x} eip 0x{:08x} cs 0x{:x}",
                    vector,
                    exception_name(vector).unwrap_or("Unknown"),
                    frame.err_code,
                    frame.eip,
                    frame.cs
                );
                cpu.halt();
            }
            Route::Irq { line, handler } => {
                if let Some(handler) = handler {
                    handler.handle(frame, cpu);
                }
                // SAFETY: line `line` is being serviced right now.
                unsafe { pic::end_of_interrupt(cpu, line) };
            }
            Route::Software {
                handler: Some(handler),
                ..
            } => handler.handle(frame, cpu),
            Route::Software {
                vector,
                handler: None,
            } => {
                log::warn!("unhandled software interrupt 0x{:x}", vector);
            }
            Route::Reserved { vector } => {
                log::error!(
                    "reserved exception vector {} fired: error code 0x{:x} eip 0x{:08x}",
                    vector,
                    frame.err_code,
                    frame.eip
                );
                cpu.halt();
            }
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Route::Fault { vector, handler } => f
                .debug_struct("Fault")
                .field("vector", &vector)
                .field("handled", &handler.is_some())
                .finish(),
            Route::Irq { line, handler } => f
                .debug_struct("Irq")
                .field("line", &line)
                .field("handled", &handler.is_some())
                .finish(),
            Route::Software { vector, handler } => f
                .debug_struct("Software")
                .field("vector", &vector)
                .field("handled", &handler.is_some())
                .finish(),
            Route::Reserved { vector } => {
                f.debug_struct("Reserved").field("vector", &vector).finish()
            }
        }
    }
}
