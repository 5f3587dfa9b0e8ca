//! Bump-pointer allocator over fixed-size pages.
//!
//! Each allocation advances an offset inside the current page. When a request
//! does not fit, the allocator asks the caller for a fresh page and starts
//! again at offset zero. Requests larger than a page get a dedicated *large*
//! page of exactly their size and leave the current page untouched.
//!
//! Nothing is ever freed individually: the owner recycles whole pages once
//! the frame that used them has completed, then calls [`LinearAllocator::reset`].

use super::align_up;

/// Result of a linear allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinearAllocation {
    /// Page index returned by the page callback.
    pub page: usize,
    /// Byte offset inside the page.
    pub offset: u64,
    /// Requested size in bytes.
    pub size: u64,
    /// Whether the allocation owns a dedicated oversized page.
    pub large: bool,
}

/// Bump allocator state.
#[derive(Debug, Clone)]
pub struct LinearAllocator {
    page_size: u64,
    current_page: Option<usize>,
    next_offset: u64,
}

impl LinearAllocator {
    /// Create an allocator that requests pages of `page_size` bytes.
    pub fn new(page_size: u64) -> Self {
        assert!(page_size > 0, "linear allocator page size must be non-zero");
        Self {
            page_size,
            current_page: None,
            next_offset: 0,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Page currently being filled, if any.
    pub fn current_page(&self) -> Option<usize> {
        self.current_page
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// `request_page(size, large)` must return the index of a page of at
    /// least `size` bytes. It is called with `large = true` for oversized
    /// requests and with `(page_size, false)` when the current page is full
    /// or there is none yet. Errors from the callback are returned as is and
    /// leave the allocator unchanged.
    pub fn allocate<E>(
        &mut self,
        size: u64,
        align: u64,
        request_page: impl FnOnce(u64, bool) -> Result<usize, E>,
    ) -> Result<LinearAllocation, E> {
        if size > self.page_size {
            let page = request_page(size, true)?;
            log::trace!("linear: large page {page} for {size} bytes");
            return Ok(LinearAllocation {
                page,
                offset: 0,
                size,
                large: true,
            });
        }

        let aligned = align_up(self.next_offset, align);
        let page = match self.current_page {
            Some(page) if aligned + size <= self.page_size => {
                self.next_offset = aligned;
                page
            }
            _ => {
                let page = request_page(self.page_size, false)?;
                self.current_page = Some(page);
                self.next_offset = 0;
                page
            }
        };

        let offset = self.next_offset;
        self.next_offset += size;
        Ok(LinearAllocation {
            page,
            offset,
            size,
            large: false,
        })
    }

    /// Forget the current page. The next allocation requests a new one.
    pub fn reset(&mut self) {
        self.current_page = None;
        self.next_offset = 0;
    }

    /// Bytes left in the current page.
    pub fn remaining(&self) -> u64 {
        match self.current_page {
            Some(_) => self.page_size - self.next_offset,
            None => 0,
        }
    }
}
