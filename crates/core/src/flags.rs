use bitflags::bitflags;

bitflags! {
    /// `co_flags` bits of a code object.
    ///
    /// Unknown bits (version-specific future-feature flags and anything newer)
    /// are retained verbatim so a round trip never loses them.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct CompilerFlags: u32 {
        const OPTIMIZED = 0x0001;
        const NEWLOCALS = 0x0002;
        const VARARGS = 0x0004;
        const VARKEYWORDS = 0x0008;
        const NESTED = 0x0010;
        const GENERATOR = 0x0020;
        const NOFREE = 0x0040;
        /// Native coroutine (`async def`).
        const COROUTINE = 0x0080;
        /// Generator-based coroutine decorated with `types.coroutine`.
        const ITERABLE_COROUTINE = 0x0100;
        /// Generator defined inside an `async def` function.
        const ASYNC_GENERATOR = 0x0200;
        /// `from __future__ import generator_stop` (3.9+ bit position).
        const FUTURE_GENERATOR_STOP = 0x800000;
        /// `from __future__ import annotations` (3.9+ bit position).
        const FUTURE_ANNOTATIONS = 0x1000000;

        const _ = !0;
    }
}

impl Default for CompilerFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_survive() {
        let raw = CompilerFlags::OPTIMIZED.bits() | 0x8000_0000;
        let flags = CompilerFlags::from_bits_retain(raw);
        assert!(flags.contains(CompilerFlags::OPTIMIZED));
        assert_eq!(flags.bits(), raw);
    }
}
