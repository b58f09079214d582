//! # Page faults
//!
//! The trap glue turns a `#PF` into a [`PageFault`] record (faulting address
//! from CR2 plus the pushed error code) and hands it to
//! [`AddressSpace::handle_fault`](crate::AddressSpace::handle_fault). A
//! successful [`FaultResolution`] means the faulting instruction can be
//! restarted; any [`FaultError`] is fatal and the caller halts.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Page-fault error code layout (i386).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15 "Page-Fault Exception (#PF)".
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32, // reserved / ignored bits
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped yet)"
        } else if self.instruction_fetch() {
            "Instruction fetch on protected page"
        } else if self.user() && self.write() {
            "User-mode write to protected page"
        } else if self.user() {
            "User-mode read of protected page"
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// Everything the handler needs to know about one page fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageFault {
    /// The linear address whose translation failed (CR2).
    pub address: VirtualAddress,
    /// The error code pushed by the processor.
    pub error: PageFaultError,
}

impl PageFault {
    #[inline]
    #[must_use]
    pub const fn new(address: VirtualAddress, error: PageFaultError) -> Self {
        Self { address, error }
    }

    /// Builds the record for the fault currently being serviced.
    ///
    /// # Safety
    /// Must run in ring 0 inside the `#PF` handler, before anything else can
    /// fault and overwrite CR2.
    #[cfg(all(feature = "asm", target_arch = "x86"))]
    #[must_use]
    pub unsafe fn capture(error_code: u32) -> Self {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::cr2::Cr2;

        let cr2 = unsafe { Cr2::load_unsafe() };
        Self::new(cr2.fault_address(), PageFaultError::from_bits(error_code))
    }
}

/// What the handler changed to make the faulting access succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultResolution {
    /// A fresh, zero-filled frame now backs the faulting page.
    Mapped {
        frame: FrameNumber,
        /// Whether a page table had to be created first.
        table_created: bool,
    },
    /// The page was already mapped; only the translation cache was flushed.
    Spurious,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("protection violation at {address}: {}", .error.explain())]
    ProtectionViolation {
        address: VirtualAddress,
        error: PageFaultError,
    },
    #[error("{0} is not inside any region of a registered VM pool")]
    IllegalAddress(VirtualAddress),
    #[error("fault at {0} inside the recursive page-table window")]
    WindowFault(VirtualAddress),
    #[error("the faulting address space is not the current one")]
    NotCurrent,
    #[error("paging is not enabled")]
    PagingDisabled,
    #[error("kernel pool exhausted while creating a page table")]
    OutOfTableFrames,
    #[error("process pool exhausted while backing {0}")]
    OutOfFrames(VirtualAddress),
}
