use std::{
    collections::TryReserveError,
    fmt::{Debug, Display, Formatter},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    RawImage,
    EncodedPacket,
}

/// Opaque handle to a buffer owned by capture hardware (DMA buffer, MB block...).
///
/// Implementations return the buffer to their pool on drop, so a raw frame
/// handed between stages is released exactly once by whoever drops it last.
pub trait HardwareBuffer: Send {
    fn len(&self) -> usize;

    /// CPU-visible view of the buffer, if the hardware exposes one.
    fn as_slice(&self) -> Option<&[u8]> {
        None
    }
}

/// Counts the owned payload buffers of one stream that are still alive.
#[derive(Clone, Default)]
pub struct BufferLedger {
    inner: Arc<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    live: AtomicUsize,
    live_bytes: AtomicUsize,
    allocated: AtomicU64,
    released: AtomicU64,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` into a fresh heap buffer tracked by this ledger.
    ///
    /// The reservation is fallible so an allocation failure drops a single
    /// unit instead of aborting the process.
    pub fn copy_from_slice(&self, data: &[u8]) -> Result<OwnedBuffer, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(data.len())?;
        buf.extend_from_slice(data);
        Ok(self.adopt(Bytes::from(buf)))
    }

    pub fn adopt(&self, data: Bytes) -> OwnedBuffer {
        let size = data.len();
        self.inner.live.fetch_add(1, Ordering::AcqRel);
        self.inner.live_bytes.fetch_add(size, Ordering::AcqRel);
        self.inner.allocated.fetch_add(1, Ordering::Relaxed);
        OwnedBuffer {
            data,
            _lease: Some(BufferLease {
                ledger: Arc::clone(&self.inner),
                size,
            }),
        }
    }

    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    pub fn live_bytes(&self) -> usize {
        self.inner.live_bytes.load(Ordering::Acquire)
    }

    pub fn allocated(&self) -> u64 {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }
}

struct BufferLease {
    ledger: Arc<LedgerInner>,
    size: usize,
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.ledger.live.fetch_sub(1, Ordering::AcqRel);
        self.ledger.live_bytes.fetch_sub(self.size, Ordering::AcqRel);
        self.ledger.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// Heap payload with a single owner. Not `Clone`: moving it is the only way
/// to hand it to another stage.
pub struct OwnedBuffer {
    data: Bytes,
    _lease: Option<BufferLease>,
}

impl OwnedBuffer {
    /// Buffer that is not tracked by any ledger.
    pub fn untracked(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            _lease: None,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub enum Payload {
    Owned(OwnedBuffer),
    Hardware(Box<dyn HardwareBuffer>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Owned(buf) => buf.len(),
            Payload::Hardware(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> Option<&[u8]> {
        match self {
            Payload::Owned(buf) => Some(buf.as_slice()),
            Payload::Hardware(buf) => buf.as_slice(),
        }
    }
}

/// Unit of work moved between pipeline stages.
pub struct FrameUnit {
    kind: FrameKind,
    payload: Payload,
    // producer clock, microseconds
    pts: i64,
    is_keyframe: bool,
    width: u32,
    height: u32,
}

impl FrameUnit {
    pub fn encoded(payload: OwnedBuffer, pts: i64, is_keyframe: bool) -> Self {
        Self {
            kind: FrameKind::EncodedPacket,
            payload: Payload::Owned(payload),
            pts,
            is_keyframe,
            width: 0,
            height: 0,
        }
    }

    pub fn raw(payload: OwnedBuffer, width: u32, height: u32, pts: i64) -> Self {
        Self {
            kind: FrameKind::RawImage,
            payload: Payload::Owned(payload),
            pts,
            is_keyframe: false,
            width,
            height,
        }
    }

    pub fn raw_hardware(buffer: Box<dyn HardwareBuffer>, width: u32, height: u32, pts: i64) -> Self {
        Self {
            kind: FrameKind::RawImage,
            payload: Payload::Hardware(buffer),
            pts,
            is_keyframe: false,
            width,
            height,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn is_keyframe(&self) -> bool {
        self.is_keyframe
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.payload.as_slice()
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

impl Display for FrameUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self.kind {
            FrameKind::EncodedPacket => write!(
                f,
                "EncodedPacket {{ size: {}, pts: {}, key: {} }}",
                self.size(),
                self.pts,
                self.is_keyframe
            ),
            FrameKind::RawImage => write!(
                f,
                "RawImage {{ {}x{}, size: {}, pts: {} }}",
                self.width,
                self.height,
                self.size(),
                self.pts
            ),
        }
    }
}

impl Debug for FrameUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PoolSlot(Arc<AtomicUsize>, usize);

    impl HardwareBuffer for PoolSlot {
        fn len(&self) -> usize {
            self.1
        }
    }

    impl Drop for PoolSlot {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_ledger_tracks_owned_buffers() {
        let ledger = BufferLedger::new();
        let a = ledger.copy_from_slice(&[1, 2, 3]).unwrap();
        let b = ledger.copy_from_slice(&[4; 10]).unwrap();
        assert_eq!(ledger.live(), 2);
        assert_eq!(ledger.live_bytes(), 13);

        let unit = FrameUnit::encoded(a, 1000, true);
        assert_eq!(unit.size(), 3);
        assert_eq!(unit.data(), Some(&[1u8, 2, 3][..]));
        drop(unit);
        assert_eq!(ledger.live(), 1);

        drop(b);
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.live_bytes(), 0);
        assert_eq!(ledger.allocated(), 2);
        assert_eq!(ledger.released(), 2);
    }

    #[test]
    fn test_untracked_buffer_does_not_touch_ledger() {
        let ledger = BufferLedger::new();
        let buf = OwnedBuffer::untracked(vec![0u8; 16]);
        assert_eq!(buf.len(), 16);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_hardware_payload_released_on_drop() {
        let outstanding = Arc::new(AtomicUsize::new(1));
        let unit = FrameUnit::raw_hardware(
            Box::new(PoolSlot(Arc::clone(&outstanding), 64)),
            8,
            8,
            0,
        );
        assert_eq!(unit.kind(), FrameKind::RawImage);
        assert_eq!(unit.size(), 64);
        assert!(unit.data().is_none());
        assert_eq!(format!("{}", unit), "RawImage { 8x8, size: 64, pts: 0 }");

        drop(unit);
        assert_eq!(outstanding.load(Ordering::SeqCst), 0);
    }
}
