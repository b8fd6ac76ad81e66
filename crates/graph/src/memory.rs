//! The shared-memory pool and typed views into it.

use core::any;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};
use core::ptr::NonNull;
use core::slice;

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use anyhow::{Result, bail, ensure};
use protocol::flags::MemFlags;
use slab::Slab;
use tracing::Level;

use crate::id::MemId;

/// A region of memory mapped from a pool file.
///
/// A region is a non-owning view; the pool keeps the mapping alive through
/// reference counting until every region created from it is freed.
#[must_use = "A region must be freed against the pool to release the mapping"]
pub struct Region<T>
where
    T: ?Sized,
{
    file: usize,
    size: usize,
    ptr: NonNull<()>,
    _marker: PhantomData<*mut T>,
}

impl Region<[MaybeUninit<u8>]> {
    /// Advance the region by the given offset.
    pub fn offset(&self, offset: usize) -> Result<Self> {
        if offset > self.size {
            bail!("Offset {offset} is larger than region size {}", self.size);
        }

        let ptr = unsafe {
            let ptr = self.ptr.as_ptr().cast::<MaybeUninit<u8>>().add(offset);
            NonNull::new_unchecked(ptr)
        };

        Ok(Region {
            file: self.file,
            size: self.size - offset,
            ptr: ptr.cast(),
            _marker: PhantomData,
        })
    }

    /// Limit the size of the region.
    pub fn size(&self, size: usize) -> Result<Self> {
        if size > self.size {
            bail!("Size {size} is larger than region size {}", self.size);
        }

        Ok(Region {
            file: self.file,
            size,
            ptr: self.ptr,
            _marker: PhantomData,
        })
    }

    /// Cast the region to a sized type which must exactly fill it.
    pub fn cast<U>(&self) -> Result<Region<U>> {
        const {
            assert!(mem::size_of::<U>() > 0);
        }

        ensure!(
            self.ptr.as_ptr().addr() % mem::align_of::<U>() == 0,
            "Region<{}> pointer {:p} must be aligned to 0x{:x}",
            any::type_name::<U>(),
            self.ptr.as_ptr(),
            mem::align_of::<U>()
        );

        ensure!(
            self.size == mem::size_of::<U>(),
            "Region<{}> cast size {} must match {}",
            any::type_name::<U>(),
            mem::size_of::<U>(),
            self.size
        );

        Ok(Region {
            file: self.file,
            size: self.size,
            ptr: self.ptr,
            _marker: PhantomData,
        })
    }

    /// Cast the region to a byte slice view.
    pub fn cast_bytes(&self) -> Region<[u8]> {
        Region {
            file: self.file,
            size: self.size,
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl Region<[u8]> {
    /// The length of the region in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Test if the region is empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Access the region as a slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other thread writes the region for the
    /// duration of the borrow.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr().cast(), self.size) }
    }

    /// Access the region as a mutable slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure exclusive access for the duration of the
    /// borrow.
    pub unsafe fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().cast(), self.size) }
    }
}

impl<T> Region<T> {
    /// Get a pointer to the memory region.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.cast::<T>().as_ptr().cast_const()
    }

    /// Get a mutable pointer to the memory region.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut T {
        self.ptr.cast::<T>().as_ptr()
    }

    /// Read the whole region.
    ///
    /// # Safety
    ///
    /// The memory may be contested between processes; the read is volatile
    /// and never guaranteed to observe a consistent snapshot. The caller
    /// must only rely on fields with single-writer discipline.
    #[inline]
    pub unsafe fn read(&self) -> T
    where
        T: Copy,
    {
        unsafe { self.ptr.cast::<T>().as_ptr().read_volatile() }
    }

    /// Write the whole region.
    ///
    /// # Safety
    ///
    /// As with [`read`][Self::read], the caller is responsible for the
    /// write not racing another writer.
    #[inline]
    pub unsafe fn write(&self, value: T)
    where
        T: Copy,
    {
        unsafe {
            self.ptr.cast::<T>().as_ptr().write_volatile(value);
        }
    }
}

impl<T> Clone for Region<T>
where
    T: ?Sized,
{
    #[inline]
    fn clone(&self) -> Self {
        Self {
            file: self.file,
            size: self.size,
            ptr: self.ptr,
            _marker: self._marker,
        }
    }
}

impl<T> fmt::Debug for Region<T>
where
    T: ?Sized,
{
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("file", &self.file)
            .field("size", &self.size)
            .field("ptr", &self.ptr)
            .finish()
    }
}

#[derive(Debug)]
struct File {
    fd: OwnedFd,
    #[allow(unused)]
    flags: MemFlags,
    size: usize,
    users: u32,
    ptr: NonNull<()>,
}

/// The pool of shared memory blocks owned by the runtime.
///
/// Blocks are allocated as sealed memfds, mapped once and handed out as
/// [`Region`] views. Unmapping is deferred until every user of a block has
/// freed its regions.
#[derive(Debug)]
pub struct Memory {
    map: HashMap<MemId, usize>,
    files: Slab<File>,
    next_id: u32,
}

impl Memory {
    /// Construct a new empty pool.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            files: Slab::new(),
            next_id: 0,
        }
    }

    /// Allocate a new shared block of the given size.
    #[tracing::instrument(skip(self), ret(level = Level::TRACE))]
    pub fn alloc(&mut self, name: &str, size: usize, flags: MemFlags) -> Result<MemId> {
        let Ok(name) = CString::new(name) else {
            bail!("Memory name contains an interior nul: {name:?}");
        };

        // SAFETY: We're just using c-apis as intended.
        let (fd, ptr) = unsafe {
            let fd = libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING);

            if fd == -1 {
                bail!(io::Error::last_os_error());
            }

            let fd = OwnedFd::from_raw_fd(fd);

            if libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) == -1 {
                bail!(io::Error::last_os_error());
            }

            if flags.contains(MemFlags::SEAL) {
                let seals = libc::F_SEAL_GROW | libc::F_SEAL_SHRINK | libc::F_SEAL_SEAL;

                if libc::fcntl(fd.as_raw_fd(), libc::F_ADD_SEALS, seals) == -1 {
                    bail!(io::Error::last_os_error());
                }
            }

            let mut prot = 0;

            if flags.contains(MemFlags::READABLE) {
                prot |= libc::PROT_READ;
            }

            if flags.contains(MemFlags::WRITABLE) {
                prot |= libc::PROT_WRITE;
            }

            let ptr = libc::mmap(
                core::ptr::null_mut(),
                size,
                prot,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            );

            if ptr == libc::MAP_FAILED {
                bail!(io::Error::last_os_error());
            }

            (fd, NonNull::new_unchecked(ptr.cast::<()>()))
        };

        let file = self.files.insert(File {
            fd,
            flags,
            size,
            users: 1,
            ptr,
        });

        let id = MemId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.map.insert(id, file);
        Ok(id)
    }

    /// Duplicate the fd backing a block, for handing to another process.
    pub fn dup_fd(&self, mem_id: MemId) -> Result<OwnedFd> {
        let Some(file) = self.map.get(&mem_id).and_then(|&index| self.files.get(index)) else {
            bail!("Memory {mem_id} missing");
        };

        Ok(file.fd.try_clone()?)
    }

    /// The size of a block.
    pub fn size(&self, mem_id: MemId) -> Option<usize> {
        self.map
            .get(&mem_id)
            .and_then(|&index| self.files.get(index))
            .map(|file| file.size)
    }

    /// Map a range of a block as a region, adding a user to the block.
    pub fn map_region(
        &mut self,
        mem_id: MemId,
        offset: usize,
        size: usize,
    ) -> Result<Region<[MaybeUninit<u8>]>> {
        let Some(&index) = self.map.get(&mem_id) else {
            bail!("Memory {mem_id} missing");
        };

        let Some(file) = self.files.get_mut(index) else {
            bail!("Memory {mem_id} missing");
        };

        if offset + size > file.size {
            bail!(
                "Range {offset}..{} is out of bounds of memory {mem_id} with size {}",
                offset + size,
                file.size
            );
        }

        let ptr = unsafe {
            let ptr = file.ptr.as_ptr().cast::<MaybeUninit<u8>>().add(offset);
            NonNull::new_unchecked(ptr)
        };

        file.users += 1;

        Ok(Region {
            file: index,
            size,
            ptr: ptr.cast(),
            _marker: PhantomData,
        })
    }

    /// Add a user to the block backing a region.
    pub fn track<T>(&mut self, region: &Region<T>)
    where
        T: ?Sized,
    {
        if let Some(file) = self.files.get_mut(region.file) {
            file.users += 1;
        }
    }

    /// Drop a region, unmapping the block when the last user goes away.
    #[tracing::instrument(skip(self, region))]
    pub fn free<T>(&mut self, region: Region<T>)
    where
        T: ?Sized,
    {
        self.free_file(region.file);
    }

    /// Release the allocation user of a block.
    pub fn release(&mut self, mem_id: MemId) {
        let Some(index) = self.map.remove(&mem_id) else {
            tracing::warn!("Tried to release memory with id {mem_id} but it was not found");
            return;
        };

        self.free_file(index);
    }

    fn free_file(&mut self, index: usize) {
        let Some(file) = self.files.get_mut(index) else {
            return;
        };

        file.users -= 1;

        if file.users > 0 {
            return;
        }

        let file = self.files.remove(index);

        // SAFETY: The mapping was created by this pool and the last user is
        // gone, nothing can observe the memory anymore.
        unsafe {
            libc::munmap(file.ptr.as_ptr().cast(), file.size);
        }
    }
}

impl Default for Memory {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
