use crate::mmu::Mmu;
use kernel_alloc::phys_mapper::{IdentityPhysMapper, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr3::Cr3;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

/// The processor's own MMU, driven through CR0 and CR3.
///
/// Physical memory is reached through the identity mapping of the shared
/// region.
#[derive(Copy, Clone, Debug, Default)]
pub struct HardwareMmu;

impl PhysMapper for HardwareMmu {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { IdentityPhysMapper.phys_to_mut(pa) }
    }
}

impl Mmu for HardwareMmu {
    unsafe fn load_directory(&self, directory: PhysicalAddress) {
        unsafe { Cr3::from_directory_phys(directory, false, false).store_unsafe() }
    }

    fn current_directory(&self) -> PhysicalAddress {
        // SAFETY: The kernel runs in ring 0, where reading CR3 is permitted.
        unsafe { Cr3::load_unsafe() }.directory_phys()
    }

    unsafe fn enable_paging(&self) {
        unsafe {
            let cr0 = Cr0::load_unsafe().with_pg_paging(true);
            cr0.store_unsafe();
        }
    }

    fn paging_enabled(&self) -> bool {
        // SAFETY: The kernel runs in ring 0, where reading CR0 is permitted.
        unsafe { Cr0::load_unsafe() }.pg_paging()
    }

    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        unsafe { &mut *(va.as_u32() as usize as *mut T) }
    }
}
