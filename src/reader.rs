/// Reads a little-endian number of type `$ty` from `$buf` at `$start`.
///
/// The caller has already checked that enough bytes are present.
macro_rules! read_le {
    ($ty:ty, $buf:expr, $start:expr) => {{
        let start = $start;
        let end = start + std::mem::size_of::<$ty>();
        let mut raw = [0u8; std::mem::size_of::<$ty>()];
        raw.copy_from_slice(&$buf[start..end]);
        <$ty>::from_le_bytes(raw)
    }};
}

/// Forward-only cursor over a borrowed byte slice.
///
/// Every read returns `None` instead of panicking when the slice is
/// exhausted; callers turn that into the error kind of their layer.
#[derive(Debug, Clone)]
pub(crate) struct LeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! impl_reads {
    ($(($name:ident, $ty:ty),)*) => ($(
        pub(crate) fn $name(&mut self) -> Option<$ty> {
            let size = std::mem::size_of::<$ty>();
            if self.remaining() < size {
                return None;
            }
            let val = read_le!($ty, self.buf, self.pos);
            self.pos += size;
            Some(val)
        }
    )*);
}

impl<'a> LeReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    impl_reads! {
        (u8, u8),
        (i8, i8),
        (u16, u16),
        (i16, i16),
        (u32, u32),
        (i32, i32),
        (u64, u64),
        (i64, i64),
        (f32, f32),
        (f64, f64),
    }
}
