mod common;

use common::{PAGE, boot, vm_pool};
use kernel_alloc::frame_alloc::FrameState;
use kernel_info::memory::{MEM_HOLE_FRAMES, MEM_HOLE_START_FRAME, SHARED_REGION_SIZE};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_vmem::simulated::Access;
use kernel_vmem::{FaultError, FaultResolution, recursive};

const V: u32 = 0x4000_0000;

#[test]
fn fault_inside_allocated_region_is_resolved_once() {
    boot(|machine, space| {
        let pool = vm_pool(space, V, 3 * PAGE).unwrap();
        let region = pool.allocate(PAGE).unwrap();
        assert_eq!(region, VirtualAddress::new(V + PAGE));

        let va = region + 10;
        let fault = machine.access(va, Access::WRITE).unwrap_err();
        assert!(matches!(space.handle_fault(fault), Ok(FaultResolution::Mapped { .. })));

        // The same byte no longer traps.
        assert!(machine.access(va, Access::WRITE).is_ok());
        assert!(machine.access(va, Access::READ).is_ok());
    });
}

#[test]
fn fault_outside_every_region_is_fatal() {
    boot(|machine, space| {
        let pool = vm_pool(space, V, 3 * PAGE).unwrap();
        pool.allocate(PAGE).unwrap();

        let va = VirtualAddress::new(V + 10 * PAGE);
        let fault = machine.access(va, Access::READ).unwrap_err();
        assert_eq!(space.handle_fault(fault), Err(FaultError::IllegalAddress(va)));
        assert!(machine.access(va, Access::READ).is_err());
    });
}

#[test]
fn without_vm_pools_every_address_is_backed() {
    boot(|machine, space| {
        for va in [0x0040_0000, 0x8000_0000, 0xFFBF_F000] {
            let va = VirtualAddress::new(va);
            let fault = machine.access(va, Access::WRITE).unwrap_err();
            space.handle_fault(fault).unwrap();
            assert!(machine.access(va, Access::WRITE).is_ok());
        }
    });
}

#[test]
fn frames_come_from_the_right_pools() {
    boot(|machine, space| {
        let paging = space.paging();
        let va = VirtualAddress::new(V);
        let fault = machine.access(va, Access::WRITE).unwrap_err();
        let Ok(FaultResolution::Mapped { frame, table_created: true }) = space.handle_fault(fault) else {
            panic!("expected a fresh table");
        };
        assert!(paging.process_pool().contains(frame));
        assert_eq!(paging.process_pool().state_of(frame), Some(FrameState::HeadOfSequence));

        let table = unsafe { recursive::RecursiveMapping::new(paging.mmu()).directory_entry_for(va) }
            .table_frame()
            .unwrap();
        assert!(paging.kernel_pool().contains(table));
        assert_eq!(paging.frame_pools().pool_for(table).map(|p| p.base_frame_no()), Some(paging.kernel_pool().base_frame_no()));
    });
}

#[test]
fn data_frames_skip_the_memory_hole() {
    boot(|machine, space| {
        let process_pool = space.paging().process_pool();
        let hole = FrameNumber::new(MEM_HOLE_START_FRAME);
        assert_eq!(process_pool.state_of(hole), Some(FrameState::HeadOfSequence));

        // Take everything below the hole, then fault in one page.
        let below = MEM_HOLE_START_FRAME - process_pool.base_frame_no().as_u32();
        let low = process_pool.get_frames(below).unwrap();
        let fault = machine.access(VirtualAddress::new(V), Access::WRITE).unwrap_err();
        let Ok(FaultResolution::Mapped { frame, .. }) = space.handle_fault(fault) else {
            panic!("fault not resolved");
        };
        assert_eq!(frame, FrameNumber::new(MEM_HOLE_START_FRAME + MEM_HOLE_FRAMES));
        process_pool.release_frames(low).unwrap();
    });
}

#[test]
fn released_page_traps_again() {
    boot(|machine, space| {
        let va = VirtualAddress::new(V + 0x123);
        let fault = machine.access(va, Access::WRITE).unwrap_err();
        let Ok(FaultResolution::Mapped { frame, .. }) = space.handle_fault(fault) else {
            panic!("fault not resolved");
        };
        machine.write_u32(va, 7).unwrap();

        assert_eq!(space.free_page(va.page()), Ok(true));
        assert_eq!(space.paging().process_pool().state_of(frame), Some(FrameState::Free));
        assert_eq!(space.translate(va), None);

        let again = machine.access(va, Access::READ).unwrap_err();
        assert_eq!(again.address, va);
        assert!(!again.error.present());
    });
}

#[test]
fn write_to_shared_region_as_user_is_a_protection_violation() {
    boot(|machine, space| {
        let va = VirtualAddress::new(0x0010_0000);
        let fault = machine.access(va, Access::USER_WRITE).unwrap_err();
        assert!(fault.error.present());
        assert_eq!(
            space.handle_fault(fault).unwrap_err().to_string(),
            "protection violation at 0x00100000: User-mode write to protected page"
        );
    });
}

#[test]
fn shared_region_translates_to_itself() {
    boot(|_, space| {
        let last = VirtualAddress::new(SHARED_REGION_SIZE - PAGE);
        assert_eq!(space.translate(last), Some(PhysicalAddress::new(last.as_u32())));
        assert_eq!(space.translate(VirtualAddress::new(SHARED_REGION_SIZE)), None);
    });
}
