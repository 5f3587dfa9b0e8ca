//! A growable list of buddy pages.
//!
//! Allocation scans the pages in creation order and takes the first one that
//! can serve the request. When none can, a new page is appended: either the
//! default page size or, for requests larger than that, a page sized to the
//! request.

use super::buddy::{BuddyAllocation, BuddyAllocator, BuddyBlock};

/// An allocation from a [`MultiBuddyAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultiBuddyAllocation {
    /// Index of the page holding the allocation.
    pub page: usize,
    /// The buddy block inside the page.
    pub block: BuddyBlock,
    /// Aligned byte offset inside the page.
    pub offset: u32,
    /// Requested size in bytes.
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct MultiBuddyAllocator {
    min_block: u32,
    default_page_size: u32,
    pages: Vec<BuddyAllocator>,
}

impl MultiBuddyAllocator {
    /// Create an allocator with no pages.
    pub fn new(min_block: u32, default_page_size: u32) -> Self {
        assert!(
            min_block.is_power_of_two() && default_page_size.is_power_of_two(),
            "multi-buddy sizes must be powers of two"
        );
        Self {
            min_block,
            default_page_size,
            pages: Vec::new(),
        }
    }

    pub fn min_block(&self) -> u32 {
        self.min_block
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> &BuddyAllocator {
        &self.pages[index]
    }

    /// Size of the page that would be appended for a `size`-byte request.
    ///
    /// Oversized requests get `next_pow2(size / min_block) * min_block`
    /// bytes. The division truncates, so the result is doubled until a
    /// buddy over it can actually hold the request.
    pub fn page_size_for(&self, size: u32, align: u32) -> u32 {
        if size <= self.default_page_size {
            let probe = BuddyAllocator::new(self.min_block, self.default_page_size);
            if probe.order_for(size, align).is_some() {
                return self.default_page_size;
            }
        }

        let units = (size / self.min_block).max(1);
        let mut page_size = units
            .checked_next_power_of_two()
            .and_then(|u| u.checked_mul(self.min_block))
            .unwrap_or_else(|| crate::contract_violation!("buddy page for {size} bytes overflows"));
        let fits = |page_size: u32| {
            BuddyAllocator::new(self.min_block, page_size)
                .order_for(size, align)
                .is_some()
        };
        if !fits(page_size) {
            while !fits(page_size) {
                page_size = page_size.checked_mul(2).unwrap_or_else(|| {
                    crate::contract_violation!("buddy page for {size} bytes overflows")
                });
            }
            log::warn!("multi-buddy: grew oversized page to {page_size} bytes for {size}-byte request");
        }
        page_size
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// `request_page(index, page_size)` is called before a new page is
    /// appended; if it fails, no page is added and the error is returned.
    pub fn allocate<E>(
        &mut self,
        size: u32,
        align: u32,
        request_page: impl FnOnce(usize, u32) -> Result<(), E>,
    ) -> Result<MultiBuddyAllocation, E> {
        for (page, buddy) in self.pages.iter_mut().enumerate() {
            if let Some(alloc) = buddy.allocate(size, align) {
                return Ok(Self::wrap(page, alloc));
            }
        }

        let page_size = self.page_size_for(size, align);
        let page = self.pages.len();
        request_page(page, page_size)?;
        log::debug!("multi-buddy: appended page {page} ({page_size} bytes)");

        let mut buddy = BuddyAllocator::new(self.min_block, page_size);
        let alloc = match buddy.allocate(size, align) {
            Some(alloc) => alloc,
            None => crate::contract_violation!("fresh buddy page cannot hold {size} bytes"),
        };
        self.pages.push(buddy);
        Ok(Self::wrap(page, alloc))
    }

    /// Release an allocation back to its page.
    pub fn release(&mut self, alloc: &MultiBuddyAllocation) {
        match self.pages.get_mut(alloc.page) {
            Some(buddy) => buddy.release(alloc.block),
            None => crate::contract_violation!("multi-buddy page {} does not exist", alloc.page),
        }
    }

    /// Bytes held by live blocks across all pages.
    pub fn used_bytes(&self) -> u64 {
        self.pages.iter().map(BuddyAllocator::used_bytes).sum()
    }

    fn wrap(page: usize, alloc: BuddyAllocation) -> MultiBuddyAllocation {
        MultiBuddyAllocation {
            page,
            block: alloc.block,
            offset: alloc.offset,
            size: alloc.size,
        }
    }
}
