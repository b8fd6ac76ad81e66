use anyhow::Result;
use bittle::{Bits, BitsMut};
use protocol::flags::{DataFlags, MemFlags};
use protocol::id::DataType;

use crate::ffi;
use crate::id::MemId;
use crate::memory::{Memory, Region};

const DATA_ALIGN: usize = 64;

/// One data block of a buffer.
#[derive(Debug)]
pub struct DataBlock {
    pub ty: DataType,
    pub flags: DataFlags,
    pub maxsize: usize,
    pub(crate) data: Region<[u8]>,
    pub(crate) chunk: Region<ffi::Chunk>,
}

impl DataBlock {
    /// Read the chunk describing the valid data.
    pub fn chunk(&self) -> ffi::Chunk {
        // SAFETY: The chunk is written by one side at a time, following the
        // io buffers handshake.
        unsafe { self.chunk.read() }
    }

    /// Update the chunk describing the valid data.
    pub fn set_chunk(&self, chunk: ffi::Chunk) {
        // SAFETY: See `chunk`.
        unsafe { self.chunk.write(chunk) }
    }

    /// Access the block data.
    ///
    /// # Safety
    ///
    /// The caller must hold the buffer according to the io-buffers
    /// handshake so that the other side is not writing it.
    pub unsafe fn data(&self) -> &[u8] {
        unsafe { self.data.as_slice() }
    }

    /// Access the block data mutably.
    ///
    /// # Safety
    ///
    /// As with [`data`][Self::data], exclusive hold required.
    pub unsafe fn data_mut(&mut self) -> &mut [u8] {
        unsafe { self.data.as_slice_mut() }
    }
}

/// A buffer descriptor with its mapped blocks and metadata.
#[derive(Debug)]
pub struct Buffer {
    pub id: u32,
    pub(crate) header: Option<Region<ffi::MetaHeader>>,
    pub blocks: Vec<DataBlock>,
}

impl Buffer {
    /// Write the meta header of the buffer, if it has one.
    pub fn set_header(&self, header: ffi::MetaHeader) {
        if let Some(region) = &self.header {
            // SAFETY: The header follows the same handshake as the data.
            unsafe { region.write(header) };
        }
    }

    /// Read the meta header of the buffer, if it has one.
    pub fn header(&self) -> Option<ffi::MetaHeader> {
        // SAFETY: See `set_header`.
        self.header.as_ref().map(|region| unsafe { region.read() })
    }
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    meta_size: usize,
    block_size: usize,
    buffer_size: usize,
    total: usize,
}

fn layout(n_buffers: u32, blocks: u32, size: u32, with_header: bool) -> Layout {
    let header_size = if with_header {
        core::mem::size_of::<ffi::MetaHeader>()
    } else {
        0
    };

    let chunks_size = core::mem::size_of::<ffi::Chunk>() * blocks as usize;
    let meta_size = (header_size + chunks_size).next_multiple_of(DATA_ALIGN);
    let block_size = (size as usize).next_multiple_of(DATA_ALIGN);
    let buffer_size = meta_size + block_size * blocks as usize;

    Layout {
        meta_size,
        block_size,
        buffer_size,
        total: buffer_size * n_buffers as usize,
    }
}

/// A buffer set backed by one shared block.
///
/// Per buffer, the meta header comes first, then one chunk per data block,
/// then the data blocks themselves, 64-byte aligned. The allocating side
/// owns the block; the other side of a link maps a view of the same block.
#[derive(Debug)]
pub struct BufferSet {
    pub(crate) mem: MemId,
    /// This set allocated the block, as opposed to mapping a view of it.
    owner: bool,
    pub buffers: Vec<Buffer>,
    /// Buffers currently free on the producing side.
    pub(crate) available: u128,
    /// Per buffer, the number of consumers the buffer is outstanding with.
    pub(crate) outstanding: Vec<u32>,
}

impl BufferSet {
    /// Allocate a buffer set satisfying the negotiated requirements.
    pub(crate) fn alloc(
        memory: &mut Memory,
        name: &str,
        n_buffers: u32,
        blocks: u32,
        size: u32,
        with_header: bool,
    ) -> Result<Self> {
        let layout = layout(n_buffers, blocks, size, with_header);
        let mem = memory.alloc(name, layout.total, MemFlags::READWRITE | MemFlags::SEAL)?;
        Self::build(memory, mem, layout, n_buffers, blocks, size, with_header, true)
    }

    /// Map a view of a buffer set allocated by the other side of a link.
    pub(crate) fn map_view(
        memory: &mut Memory,
        mem: MemId,
        n_buffers: u32,
        blocks: u32,
        size: u32,
        with_header: bool,
    ) -> Result<Self> {
        let layout = layout(n_buffers, blocks, size, with_header);
        Self::build(memory, mem, layout, n_buffers, blocks, size, with_header, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        memory: &mut Memory,
        mem: MemId,
        layout: Layout,
        n_buffers: u32,
        blocks: u32,
        size: u32,
        with_header: bool,
        owner: bool,
    ) -> Result<Self> {
        let region = memory.map_region(mem, 0, layout.total)?;

        let mut buffers = Vec::with_capacity(n_buffers as usize);
        let mut available = 0u128;

        for id in 0..n_buffers {
            let base = region.offset(layout.buffer_size * id as usize)?;
            let mut cursor = 0usize;

            let header = if with_header {
                let header = base
                    .offset(cursor)?
                    .size(core::mem::size_of::<ffi::MetaHeader>())?
                    .cast::<ffi::MetaHeader>()?;
                memory.track(&header);
                cursor += core::mem::size_of::<ffi::MetaHeader>();
                Some(header)
            } else {
                None
            };

            let mut chunks = Vec::with_capacity(blocks as usize);

            for _ in 0..blocks {
                let chunk = base
                    .offset(cursor)?
                    .size(core::mem::size_of::<ffi::Chunk>())?
                    .cast::<ffi::Chunk>()?;
                memory.track(&chunk);
                cursor += core::mem::size_of::<ffi::Chunk>();
                chunks.push(chunk);
            }

            let mut data_cursor = layout.meta_size;
            let mut data_blocks = Vec::with_capacity(blocks as usize);

            for chunk in chunks {
                let data = base.offset(data_cursor)?.size(size as usize)?.cast_bytes();
                memory.track(&data);
                data_cursor += layout.block_size;

                data_blocks.push(DataBlock {
                    ty: DataType::MEM_FD,
                    flags: DataFlags::READWRITE | DataFlags::MAPPABLE,
                    maxsize: size as usize,
                    data,
                    chunk,
                });
            }

            available.set_bit(id);

            buffers.push(Buffer {
                id,
                header,
                blocks: data_blocks,
            });
        }

        memory.free(region);

        Ok(Self {
            mem,
            owner,
            buffers,
            available,
            outstanding: vec![0; n_buffers as usize],
        })
    }

    /// The number of buffers in the set.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Test if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Get a buffer by id.
    pub fn get(&self, id: u32) -> Option<&Buffer> {
        self.buffers.get(id as usize)
    }

    /// Get a buffer by id, mutably.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Buffer> {
        self.buffers.get_mut(id as usize)
    }

    /// Take a free buffer for producing.
    pub(crate) fn take_free(&mut self) -> Option<u32> {
        let id = self.available.iter_ones().next()?;
        self.available.clear_bit(id);
        Some(id)
    }

    /// Return a buffer to the free set.
    pub(crate) fn mark_free(&mut self, id: u32) {
        if (id as usize) < self.buffers.len() {
            self.available.set_bit(id);
        }
    }

    /// Free the set against the pool.
    pub(crate) fn release(self, memory: &mut Memory) {
        for buffer in self.buffers {
            if let Some(header) = buffer.header {
                memory.free(header);
            }

            for block in buffer.blocks {
                memory.free(block.data);
                memory.free(block.chunk);
            }
        }

        if self.owner {
            memory.release(self.mem);
        }
    }
}
