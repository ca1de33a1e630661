//! Buffer usage flags.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be copied from.
        const TRANSFER_SRC = 1 << 0;
        /// Buffer can be copied to.
        const TRANSFER_DST = 1 << 1;
        /// Buffer can be bound as a uniform buffer.
        const UNIFORM = 1 << 4;
        /// Buffer can be bound as a storage buffer.
        const STORAGE = 1 << 5;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 6;
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 7;
        /// Buffer can source indirect draw arguments.
        const INDIRECT = 1 << 8;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}
