/// Boot-time paging plumbing.
///
/// The bootloader maps all physical memory at a fixed virtual offset and
/// hands over a memory map. `init` resolves the active level-4 table
/// through that window; `BootInfoFrameAllocator` walks the map's usable
/// regions front to back behind a cursor, so each allocation is O(1)
/// rather than a rescan of the map, and counts what it hands out so the
/// shell can report frame pressure next to the heap numbers. Frames are
/// only consumed by the heap mapping at boot; the core never remaps
/// kernel memory afterwards.

use core::sync::atomic::{AtomicUsize, Ordering};

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{FrameAllocator, OffsetPageTable, PageTable, PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

const FRAME_SIZE: u64 = crate::config::PAGE_SIZE;

static FRAMES_HANDED_OUT: AtomicUsize = AtomicUsize::new(0);
static FRAMES_USABLE: AtomicUsize = AtomicUsize::new(0);

/// (handed out, usable) 4 KiB frames, for the shell's `info`.
pub fn frame_stats() -> (usize, usize) {
    (
        FRAMES_HANDED_OUT.load(Ordering::Relaxed),
        FRAMES_USABLE.load(Ordering::Relaxed),
    )
}

/// Resolve the active level-4 page table through the physical-memory
/// window and wrap it for mapping.
///
/// # Safety
/// All physical memory must be mapped at `physical_memory_offset`, and
/// this must be called at most once: a second `OffsetPageTable` would
/// alias the live table.
pub unsafe fn init(physical_memory_offset: VirtAddr) -> OffsetPageTable<'static> {
    let (frame, _flags) = Cr3::read();
    let table_addr = physical_memory_offset + frame.start_address().as_u64();
    let table: &'static mut PageTable = unsafe { &mut *table_addr.as_mut_ptr() };
    unsafe { OffsetPageTable::new(table, physical_memory_offset) }
}

/// Bump allocator over the bootloader memory map's usable regions.
pub struct BootInfoFrameAllocator {
    memory_regions: &'static MemoryRegions,
    region: usize,
    next_addr: u64,
}

impl BootInfoFrameAllocator {
    /// # Safety
    /// Frames marked usable in the map must really be unused.
    pub unsafe fn init(memory_regions: &'static MemoryRegions) -> Self {
        let usable: usize = memory_regions
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .map(|r| ((r.end - r.start) / FRAME_SIZE) as usize)
            .sum();
        FRAMES_USABLE.store(usable, Ordering::Relaxed);

        BootInfoFrameAllocator {
            memory_regions,
            region: 0,
            next_addr: 0,
        }
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootInfoFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        while let Some(region) = self.memory_regions.get(self.region) {
            if region.kind != MemoryRegionKind::Usable {
                self.region += 1;
                continue;
            }

            // Resume behind the cursor, aligned up to a frame boundary.
            let addr = (self.next_addr.max(region.start) + FRAME_SIZE - 1) & !(FRAME_SIZE - 1);
            if addr + FRAME_SIZE > region.end {
                self.region += 1;
                self.next_addr = 0;
                continue;
            }

            self.next_addr = addr + FRAME_SIZE;
            FRAMES_HANDED_OUT.fetch_add(1, Ordering::Relaxed);
            return Some(PhysFrame::containing_address(PhysAddr::new(addr)));
        }
        None
    }
}
