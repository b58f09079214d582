//! # Simulated i386 MMU
//!
//! A software model of the parts of the processor that paging code talks to,
//! for hosted tests:
//!
//! - flat physical memory starting at address zero,
//! - CR3 and CR0.PG,
//! - a two-level page walk that honours present, writable and user bits
//!   (and therefore the recursive directory entry),
//! - a TLB that caches successful walks until the next root load.
//!
//! [`SimulatedMachine::access`] behaves like a memory access of the CPU: it
//! either yields the physical address or the [`PageFault`] the processor
//! would raise.
//!
//! ### Examples
//! ```rust
//! # use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//! # use kernel_vmem::simulated::{Access, SimulatedMachine};
//! let machine = SimulatedMachine::new(4);
//! // Without paging every address is physical.
//! let pa = machine.access(VirtualAddress::new(0x1234), Access::WRITE).unwrap();
//! assert_eq!(pa, PhysicalAddress::new(0x1234));
//! ```

extern crate alloc;

use crate::fault::{PageFault, PageFaultError};
use crate::mmu::Mmu;
use crate::page_table::pd::PdEntry;
use crate::page_table::pt::PtEntry;
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use alloc::collections::BTreeMap;
use core::ptr::NonNull;
use kernel_alloc::phys_mapper::PhysMapper;
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, Size4K, VirtualAddress};
use kernel_sync::SpinMutex;

/// Kind of a simulated memory access.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Access {
    pub write: bool,
    pub user: bool,
}

impl Access {
    pub const READ: Self = Self { write: false, user: false };
    pub const WRITE: Self = Self { write: true, user: false };
    pub const USER_READ: Self = Self { write: false, user: true };
    pub const USER_WRITE: Self = Self { write: true, user: true };
}

/// A cached translation; permissions are the intersection of PDE and PTE.
#[derive(Debug, Copy, Clone)]
struct TlbEntry {
    frame: FrameNumber,
    writable: bool,
    user: bool,
}

struct Cpu {
    cr3: PhysicalAddress,
    paging: bool,
    tlb: BTreeMap<u32, TlbEntry>,
    root_loads: usize,
}

/// Physical memory plus the translation state of one processor.
pub struct SimulatedMachine {
    memory: NonNull<u8>,
    frames: u32,
    cpu: SpinMutex<Cpu>,
}

// SAFETY: The memory is owned by the machine, and all CPU state is behind
// a lock.
unsafe impl Send for SimulatedMachine {}
// SAFETY: See above.
unsafe impl Sync for SimulatedMachine {}

impl SimulatedMachine {
    /// A machine with `frames` zeroed frames of physical memory.
    ///
    /// # Panics
    /// If `frames` is zero or the memory cannot be allocated.
    #[must_use]
    pub fn new(frames: u32) -> Self {
        assert!(frames > 0, "a machine needs memory");
        let layout = Self::layout(frames);
        // SAFETY: The layout has a non-zero size.
        let memory = NonNull::new(unsafe { alloc_zeroed(layout) }).unwrap_or_else(|| handle_alloc_error(layout));
        Self {
            memory,
            frames,
            cpu: SpinMutex::new(Cpu {
                cr3: PhysicalAddress::zero(),
                paging: false,
                tlb: BTreeMap::new(),
                root_loads: 0,
            }),
        }
    }

    fn layout(frames: u32) -> Layout {
        let size = frames as usize * FRAME_SIZE as usize;
        match Layout::from_size_align(size, FRAME_SIZE as usize) {
            Ok(layout) => layout,
            Err(_) => panic!("{frames} frames do not fit the host address space"),
        }
    }

    /// Number of frames of physical memory.
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.frames
    }

    /// How often a page directory has been loaded (each load flushes the TLB).
    #[must_use]
    pub fn root_loads(&self) -> usize {
        self.cpu.lock().root_loads
    }

    /// Number of cached translations.
    #[must_use]
    pub fn tlb_len(&self) -> usize {
        self.cpu.lock().tlb.len()
    }

    /// Performs an access to `va` the way the processor would.
    ///
    /// # Errors
    /// The [`PageFault`] the access raises: not-present if the walk finds no
    /// mapping, a protection fault if the mapping forbids the access.
    pub fn access(&self, va: VirtualAddress, access: Access) -> Result<PhysicalAddress, PageFault> {
        let mut cpu = self.cpu.lock();
        if !cpu.paging {
            return Ok(PhysicalAddress::new(va.as_u32()));
        }

        let error = PageFaultError::new()
            .with_write(access.write)
            .with_user(access.user);

        let vpn = va.page::<Size4K>().number();
        let entry = if let Some(&entry) = cpu.tlb.get(&vpn) {
            entry
        } else {
            let entry = self.walk(cpu.cr3, va).ok_or(PageFault::new(va, error))?;
            cpu.tlb.insert(vpn, entry);
            entry
        };

        if (access.write && !entry.writable) || (access.user && !entry.user) {
            return Err(PageFault::new(va, error.with_present(true)));
        }

        Ok(entry.frame.base() + va.offset::<Size4K>().as_u32())
    }

    /// Reads a word at `va` as the kernel.
    ///
    /// # Errors
    /// The page fault the read raises.
    pub fn read_u32(&self, va: VirtualAddress) -> Result<u32, PageFault> {
        let pa = self.access(va, Access::READ)?;
        Ok(self.read_phys(pa))
    }

    /// Writes a word at `va` as the kernel.
    ///
    /// # Errors
    /// The page fault the write raises.
    pub fn write_u32(&self, va: VirtualAddress, value: u32) -> Result<(), PageFault> {
        let pa = self.access(va, Access::WRITE)?;
        // SAFETY: In bounds (checked by `phys_ptr`); unaligned access is fine.
        unsafe { self.phys_ptr(pa, 4).cast::<u32>().write_unaligned(value) };
        Ok(())
    }

    fn walk(&self, cr3: PhysicalAddress, va: VirtualAddress) -> Option<TlbEntry> {
        let pde = PdEntry::from_raw(self.read_phys(cr3 + u32::from(va.directory_index()) * 4));
        let table = pde.table_frame()?;
        let pte = PtEntry::from_raw(self.read_phys(table.base() + u32::from(va.table_index()) * 4));
        let (frame, flags) = pte.page_4k()?;
        Some(TlbEntry {
            frame,
            writable: pde.flags().writable() && flags.writable(),
            user: pde.flags().user_access() && flags.user_access(),
        })
    }

    fn read_phys(&self, pa: PhysicalAddress) -> u32 {
        // SAFETY: In bounds (checked by `phys_ptr`); unaligned access is fine.
        unsafe { self.phys_ptr(pa, 4).cast::<u32>().read_unaligned() }
    }

    fn phys_ptr(&self, pa: PhysicalAddress, len: usize) -> *mut u8 {
        let size = self.frames as usize * FRAME_SIZE as usize;
        assert!(
            pa.as_usize().checked_add(len).is_some_and(|end| end <= size),
            "physical access to {pa}+{len} beyond {size} bytes of memory"
        );
        // SAFETY: In bounds of the allocation, asserted above.
        unsafe { self.memory.as_ptr().add(pa.as_usize()) }
    }
}

impl Drop for SimulatedMachine {
    fn drop(&mut self) {
        // SAFETY: Allocated in `new` with the same layout.
        unsafe { dealloc(self.memory.as_ptr(), Self::layout(self.frames)) }
    }
}

impl PhysMapper for SimulatedMachine {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.phys_ptr(pa, size_of::<T>()).cast::<T>();
        debug_assert!(ptr.is_aligned(), "misaligned physical access at {pa}");
        // SAFETY: In bounds; the caller guarantees exclusivity.
        unsafe { &mut *ptr }
    }

    unsafe fn phys_to_bytes<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let ptr = self.phys_ptr(pa, len);
        // SAFETY: In bounds; the caller guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(ptr, len) }
    }
}

impl Mmu for SimulatedMachine {
    unsafe fn load_directory(&self, directory: PhysicalAddress) {
        let mut cpu = self.cpu.lock();
        cpu.cr3 = directory;
        cpu.tlb.clear();
        cpu.root_loads += 1;
    }

    fn current_directory(&self) -> PhysicalAddress {
        self.cpu.lock().cr3
    }

    unsafe fn enable_paging(&self) {
        let mut cpu = self.cpu.lock();
        cpu.paging = true;
        cpu.tlb.clear();
    }

    fn paging_enabled(&self) -> bool {
        self.cpu.lock().paging
    }

    /// # Panics
    /// If `va` is not mapped writable for the kernel. Callers must only use
    /// mapped addresses, so this is a bug in the code under test.
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        debug_assert!(
            va.offset::<Size4K>().as_u32() as usize + size_of::<T>() <= FRAME_SIZE as usize,
            "access at {va} crosses a page boundary"
        );
        match self.access(va, Access::WRITE) {
            // SAFETY: Forwarded from the caller.
            Ok(pa) => unsafe { self.phys_to_mut(pa) },
            Err(fault) => panic!("kernel access to {va} faulted: {}", fault.error.explain()),
        }
    }
}
