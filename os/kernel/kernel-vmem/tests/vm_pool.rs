mod common;

use common::{PAGE, Space, assert_conserved, boot, vm_pool};
use kernel_info::memory::{MAX_VM_POOLS, REGIONS_PER_POOL};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::simulated::Access;
use kernel_vmem::{AddressSpace, AddressSpaceError, FaultError, Region, VmPoolError};

const V: u32 = 0x4000_0000;

#[test]
fn construction_validates_the_range() {
    boot(|_, space| {
        assert_eq!(vm_pool(space, V + 1, 4 * PAGE).unwrap_err(), VmPoolError::Misaligned(VirtualAddress::new(V + 1)));
        assert_eq!(vm_pool(space, V, PAGE).unwrap_err(), VmPoolError::InvalidSize(PAGE));
        assert_eq!(vm_pool(space, V, 3 * PAGE + 1).unwrap_err(), VmPoolError::InvalidSize(3 * PAGE + 1));
        assert!(matches!(vm_pool(space, 0x0010_0000, 4 * PAGE), Err(VmPoolError::InvalidRange { .. })));
        assert!(matches!(vm_pool(space, 0xFFBF_F000, 2 * PAGE), Err(VmPoolError::InvalidRange { .. })));
        assert_eq!(space.vm_pool_count(), 0);
    });
}

#[test]
fn first_page_is_reserved_for_the_region_table() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 8 * PAGE).unwrap();
        assert_eq!(pool.base_address(), VirtualAddress::new(V));
        assert_eq!(pool.size(), 8 * PAGE);
        assert_eq!(pool.available_size(), 7 * PAGE);
        assert_eq!(
            pool.regions().collect::<Vec<_>>(),
            [Region { base: VirtualAddress::new(V), size: PAGE }]
        );
        assert_eq!(space.vm_pool_count(), 1);
        assert_eq!(pool.frame_pool().base_frame_no(), space.paging().process_pool().base_frame_no());
        assert_conserved(pool);
    });
}

#[test]
fn construction_backs_only_the_table_page() {
    boot(|machine, space| {
        let process_pool = space.paging().process_pool();
        let free = process_pool.free_count();
        let pool = vm_pool(space, V, 3 * PAGE).unwrap();

        assert_eq!(process_pool.free_count(), free - 1);
        let table = space.translate(VirtualAddress::new(V)).unwrap();
        assert!(process_pool.contains(table.frame()));
        assert_eq!(space.translate(VirtualAddress::new(V + PAGE)), None);

        // Region 0 is the first entry of the table in that page.
        assert_eq!(machine.read_u32(VirtualAddress::new(V)), Ok(V));
        assert_eq!(machine.read_u32(VirtualAddress::new(V + 4)), Ok(PAGE));
        let a = pool.allocate(PAGE).unwrap();
        assert_eq!(machine.read_u32(VirtualAddress::new(V + 8)), Ok(a.as_u32()));
        assert_eq!(machine.read_u32(VirtualAddress::new(V + 12)), Ok(PAGE));
        assert_eq!(process_pool.free_count(), free - 1);
    });
}

#[test]
fn construction_needs_the_current_address_space() {
    boot(|_, space| {
        let other: &Space = Box::leak(Box::new(AddressSpace::new(space.paging()).unwrap()));
        assert_eq!(
            vm_pool(other, V, 3 * PAGE).unwrap_err(),
            VmPoolError::TablePage(FaultError::NotCurrent)
        );
        assert_eq!(other.vm_pool_count(), 0);
    });
}

#[test]
fn table_is_out_of_reach_while_another_space_is_loaded() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 8 * PAGE).unwrap();
        let a = pool.allocate(PAGE).unwrap();

        let other: &Space = Box::leak(Box::new(AddressSpace::new(space.paging()).unwrap()));
        other.load();
        assert!(!pool.is_legitimate(a));
        assert_eq!(
            pool.allocate(PAGE),
            Err(VmPoolError::AddressSpace(AddressSpaceError::NotCurrent))
        );
        assert_eq!(pool.release(a), Err(VmPoolError::AddressSpace(AddressSpaceError::NotCurrent)));
        assert_eq!(pool.regions().count(), 0);

        space.load();
        assert!(pool.is_legitimate(a));
        assert_eq!(pool.region_count(), 2);
        assert_conserved(pool);
    });
}

#[test]
fn allocations_are_rounded_and_packed() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 16 * PAGE).unwrap();
        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(PAGE + 1).unwrap();
        let c = pool.allocate(3 * PAGE).unwrap();
        assert_eq!(a, VirtualAddress::new(V + PAGE));
        assert_eq!(b, VirtualAddress::new(V + 2 * PAGE));
        assert_eq!(c, VirtualAddress::new(V + 4 * PAGE));
        assert_eq!(pool.available_size(), 9 * PAGE);
        assert_eq!(pool.region_count(), 4);
        assert_conserved(pool);
    });
}

#[test]
fn allocation_beyond_available_space_fails() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 4 * PAGE).unwrap();
        assert_eq!(pool.allocate(0), Err(VmPoolError::OutOfSpace { requested: 0, available: 3 * PAGE }));
        assert_eq!(
            pool.allocate(3 * PAGE + 1),
            Err(VmPoolError::OutOfSpace { requested: 3 * PAGE + 1, available: 3 * PAGE })
        );
        assert!(pool.allocate(u32::MAX).is_err());

        pool.allocate(3 * PAGE).unwrap();
        assert_eq!(pool.available_size(), 0);
        assert!(matches!(pool.allocate(1), Err(VmPoolError::OutOfSpace { .. })));
        assert_conserved(pool);
    });
}

#[test]
fn freed_space_in_the_middle_is_not_reused() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 5 * PAGE).unwrap();
        let a = pool.allocate(2 * PAGE).unwrap();
        pool.allocate(2 * PAGE).unwrap();
        pool.release(a).unwrap();

        assert_eq!(pool.available_size(), 2 * PAGE);
        assert!(matches!(pool.allocate(PAGE), Err(VmPoolError::OutOfSpace { .. })));
        assert_conserved(pool);
    });
}

#[test]
fn release_unmaps_and_returns_frames() {
    boot(|machine, space| {
        let pool = vm_pool(space, V, 16 * PAGE).unwrap();
        let process_pool = space.paging().process_pool();
        let region = pool.allocate(4 * PAGE).unwrap();
        let free_before = process_pool.free_count();

        // Touch two of the four pages.
        for va in [region, region + 2 * PAGE + 5] {
            let fault = machine.access(va, Access::WRITE).unwrap_err();
            space.handle_fault(fault).unwrap();
        }
        assert_eq!(process_pool.free_count(), free_before - 2);

        assert_eq!(pool.release(region), Ok(2));
        assert_eq!(process_pool.free_count(), free_before);
        assert_eq!(pool.region_count(), 1);
        assert_eq!(pool.available_size(), 15 * PAGE);
        assert!(machine.access(region, Access::READ).is_err());
        assert_conserved(pool);
    });
}

#[test]
fn release_keeps_later_regions_in_order() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 16 * PAGE).unwrap();
        let a = pool.allocate(PAGE).unwrap();
        let b = pool.allocate(2 * PAGE).unwrap();
        let c = pool.allocate(PAGE).unwrap();
        pool.release(b).unwrap();

        let bases: Vec<_> = pool.regions().map(|r| r.base).collect();
        assert_eq!(bases, [VirtualAddress::new(V), a, c]);
        assert_conserved(pool);
    });
}

#[test]
fn release_needs_an_exact_region_start() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 8 * PAGE).unwrap();
        let a = pool.allocate(2 * PAGE).unwrap();

        let outside = VirtualAddress::new(V + 6 * PAGE);
        assert_eq!(pool.release(outside), Err(VmPoolError::NotLegitimate(outside)));
        assert_eq!(pool.release(a + PAGE), Err(VmPoolError::NoSuchRegion(a + PAGE)));
        assert_eq!(
            pool.release(VirtualAddress::new(V)),
            Err(VmPoolError::NoSuchRegion(VirtualAddress::new(V)))
        );
        assert_eq!(pool.region_count(), 2);
        assert_conserved(pool);
    });
}

#[test]
fn legitimacy_follows_the_regions() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 8 * PAGE).unwrap();
        let a = pool.allocate(2 * PAGE).unwrap();

        assert!(pool.is_legitimate(VirtualAddress::new(V)));
        assert!(pool.is_legitimate(a));
        assert!(pool.is_legitimate(a + 2 * PAGE));
        assert!(!pool.is_legitimate(a + 2 * PAGE + 1));
        assert!(!pool.is_legitimate(VirtualAddress::new(V - 1)));

        pool.release(a).unwrap();
        assert!(!pool.is_legitimate(a + PAGE));
    });
}

#[test]
fn gap_left_by_a_released_region_is_not_legitimate() {
    boot(|_, space| {
        let pool = vm_pool(space, V, 16 * PAGE).unwrap();
        let a = pool.allocate(PAGE).unwrap();
        let b = pool.allocate(2 * PAGE).unwrap();
        let c = pool.allocate(PAGE).unwrap();
        pool.release(b).unwrap();

        assert!(!pool.is_legitimate(b + 1));
        assert!(!pool.is_legitimate(b + PAGE));
        assert!(!pool.is_legitimate(b + (2 * PAGE - 1)));
        // Inclusive upper bound of `a`.
        assert!(pool.is_legitimate(a + PAGE));
        assert!(pool.is_legitimate(c));
        assert!(pool.is_legitimate(c + (PAGE - 1)));
    });
}

#[test]
fn region_table_has_fixed_capacity() {
    boot(|_, space| {
        let pages = u32::try_from(REGIONS_PER_POOL).unwrap() + 2;
        let pool = vm_pool(space, V, pages * PAGE).unwrap();
        for _ in 1..REGIONS_PER_POOL {
            pool.allocate(PAGE).unwrap();
        }
        assert_eq!(pool.region_count(), REGIONS_PER_POOL);
        assert_eq!(pool.allocate(PAGE), Err(VmPoolError::RegionTableFull));
        assert_eq!(pool.available_size(), 2 * PAGE);
        assert_conserved(pool);
    });
}

#[test]
fn address_space_holds_a_bounded_number_of_pools() {
    boot(|_, space| {
        let size = 4 * PAGE;
        for i in 0..u32::try_from(MAX_VM_POOLS).unwrap() {
            vm_pool(space, V + i * size, size).unwrap();
        }
        let process_pool = space.paging().process_pool();
        let free = process_pool.free_count();
        assert_eq!(
            vm_pool(space, 0x8000_0000, size).unwrap_err(),
            VmPoolError::AddressSpace(AddressSpaceError::TooManyPools)
        );
        assert_eq!(space.vm_pool_count(), MAX_VM_POOLS);
        // The table page of the rejected pool went back.
        assert_eq!(process_pool.free_count(), free);
        assert_eq!(space.translate(VirtualAddress::new(0x8000_0000)), None);
    });
}

#[test]
fn any_registered_pool_can_claim_a_fault() {
    boot(|machine, space| {
        let low = vm_pool(space, V, 4 * PAGE).unwrap();
        let high = vm_pool(space, 0x8000_0000, 4 * PAGE).unwrap();
        low.allocate(PAGE).unwrap();
        let region = high.allocate(PAGE).unwrap();

        let fault = machine.access(region, Access::WRITE).unwrap_err();
        assert!(space.handle_fault(fault).is_ok());
    });
}
