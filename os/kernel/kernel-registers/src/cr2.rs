use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

#[cfg(all(feature = "asm", target_arch = "x86"))]
use crate::LoadRegisterUnsafe;

/// CR2: Page-Fault Linear Address.
///
/// Written by the processor on every `#PF` with the linear address whose
/// translation failed. Read-only from the kernel's point of view.
#[bitfield(u32)]
pub struct Cr2 {
    /// Bits 0–31: faulting linear address.
    pub linear_address: u32,
}

impl Cr2 {
    /// The faulting address as a [`VirtualAddress`].
    #[must_use]
    pub const fn fault_address(&self) -> VirtualAddress {
        VirtualAddress::new(self.linear_address())
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl LoadRegisterUnsafe for Cr2 {
    unsafe fn load_unsafe() -> Self {
        let mut cr2: u32;
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr2)
    }
}
