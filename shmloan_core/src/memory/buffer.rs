// Shared buffer lifecycle, ownership transitions, and the hand-off protocol
use super::collector::ReleaseCollector;
use super::segment::{SegmentPair, ShmSegment};
use crate::error::{LoanError, LoanResult};
use bytemuck::Pod;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::mem::ManuallyDrop;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const ID_LEN: usize = 16;

/// Semantic element type of a buffer.
///
/// The storage layer itself is type-erased raw bytes; the kind only records
/// how one element is to be interpreted, and how many bytes it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl ElementKind {
    /// Size of one element in bytes.
    pub const fn size_bytes(self) -> usize {
        match self {
            ElementKind::U8 | ElementKind::I8 => 1,
            ElementKind::U16 | ElementKind::I16 => 2,
            ElementKind::U32 | ElementKind::I32 | ElementKind::F32 => 4,
            ElementKind::U64 | ElementKind::I64 | ElementKind::F64 => 8,
        }
    }
}

/// The transferable record a producer hands to a consumer process.
///
/// This is the only thing that crosses the process boundary: no OS handles,
/// no pointers, no payload bytes. The receiving process re-derives both
/// segment names from `id` and maps them itself. Serialize it with whatever
/// transport the surrounding system already uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub id: String,
    pub kind: ElementKind,
    pub len: usize,
}

/// A typed buffer in cross-process shared memory.
///
/// Exactly one constructor produces an owning instance
/// ([`SharedBuffer::allocate`]) and exactly one produces a non-owning one
/// ([`SharedBuffer::resume_from_transfer`]). The owner holds the right to
/// unlink the OS objects; a non-owner only ever unmaps its local view.
///
/// Dropping a buffer runs the release protocol automatically: a non-owner
/// signals completion through the flag segment, and an owner either destroys
/// the segments on the spot or defers them to its [`ReleaseCollector`] while
/// a transfer is still in flight.
pub struct SharedBuffer {
    id: String,
    kind: ElementKind,
    len: usize,
    data: ManuallyDrop<ShmSegment>,
    flag: ManuallyDrop<ShmSegment>,
    is_owner: bool,
    collector: Option<Arc<ReleaseCollector>>,
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

impl SharedBuffer {
    /// Allocate a fresh owning buffer of `len` elements of `kind`.
    ///
    /// The collector is where this buffer's segments end up if it is dropped
    /// while a transfer is still in flight; one collector per process is the
    /// normal arrangement.
    pub fn allocate(
        kind: ElementKind,
        len: usize,
        collector: Arc<ReleaseCollector>,
    ) -> LoanResult<Self> {
        let id = random_id();
        let (data, flag) = SegmentPair::create(&id, len, kind.size_bytes())?;
        log::info!(
            "allocated shared buffer '{}' ({} x {:?}, {} bytes)",
            id,
            len,
            kind,
            data.size()
        );
        Ok(Self {
            id,
            kind,
            len,
            data: ManuallyDrop::new(data),
            flag: ManuallyDrop::new(flag),
            is_owner: true,
            collector: Some(collector),
        })
    }

    /// Reconstruct a buffer from a descriptor received from another process.
    ///
    /// Opens both segments by their derived names and yields a non-owning
    /// instance. A stale descriptor (producer already fully released the
    /// buffer) surfaces as [`LoanError::NotFound`].
    pub fn resume_from_transfer(descriptor: &TransferDescriptor) -> LoanResult<Self> {
        let (data, flag) =
            SegmentPair::open(&descriptor.id, descriptor.len, descriptor.kind.size_bytes())?;
        log::info!(
            "resumed shared buffer '{}' ({} x {:?})",
            descriptor.id,
            descriptor.len,
            descriptor.kind
        );
        Ok(Self {
            id: descriptor.id.clone(),
            kind: descriptor.kind,
            len: descriptor.len,
            data: ManuallyDrop::new(data),
            flag: ManuallyDrop::new(flag),
            is_owner: false,
            collector: None,
        })
    }

    /// Declare a hand-off to another process and produce the descriptor to
    /// send it.
    ///
    /// Clears the release flag first, so by the time the descriptor can
    /// reach the consumer the segments are already marked "do not destroy".
    /// Fails with a protocol error on a non-owning instance, or while a
    /// previous transfer is still in flight (the protocol is a single
    /// borrower move, not a share).
    pub fn prepare_for_transfer(&mut self) -> LoanResult<TransferDescriptor> {
        if !self.is_owner {
            return Err(LoanError::protocol(
                "only the owning instance may initiate a transfer",
            ));
        }
        if self.flag.flag_cell().load(Ordering::Acquire) == 0 {
            return Err(LoanError::protocol(format!(
                "buffer '{}' already has a transfer in flight",
                self.id
            )));
        }
        // Release ordering: the flag write must be visible to the consumer
        // before the descriptor leaves this process.
        self.flag.flag_cell().store(0, Ordering::Release);
        Ok(TransferDescriptor {
            id: self.id.clone(),
            kind: self.kind,
            len: self.len,
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len * self.kind.size_bytes()
    }

    /// Whether this instance holds OS-level destruction rights.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Raw byte view of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_bytes_mut()
    }

    /// Typed view of the payload. `T` must match the element kind's size.
    pub fn view<T: Pod>(&self) -> LoanResult<&[T]> {
        self.check_element::<T>()?;
        bytemuck::try_cast_slice(self.data.as_bytes())
            .map_err(|e| LoanError::protocol(format!("payload cast failed: {}", e)))
    }

    /// Mutable typed view of the payload, valid only while this instance is
    /// alive. Producer and consumer views are never synchronized by this
    /// crate; ordering between processes is the caller's responsibility.
    pub fn view_mut<T: Pod>(&mut self) -> LoanResult<&mut [T]> {
        self.check_element::<T>()?;
        bytemuck::try_cast_slice_mut(self.data.as_bytes_mut())
            .map_err(|e| LoanError::protocol(format!("payload cast failed: {}", e)))
    }

    fn check_element<T>(&self) -> LoanResult<()> {
        if std::mem::size_of::<T>() != self.kind.size_bytes() {
            return Err(LoanError::protocol(format!(
                "element size mismatch: view type is {} bytes, buffer holds {:?} ({} bytes)",
                std::mem::size_of::<T>(),
                self.kind,
                self.kind.size_bytes()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("len", &self.len)
            .field("is_owner", &self.is_owner)
            .finish()
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        // Move both segments out; the struct is never touched again.
        let data = unsafe { ManuallyDrop::take(&mut self.data) };
        let flag = unsafe { ManuallyDrop::take(&mut self.flag) };

        let safe_to_destroy = flag.flag_cell().load(Ordering::Acquire) != 0;
        if !self.is_owner || safe_to_destroy {
            // Either we are the borrower signaling completion, or we are a
            // sole owner with no transfer in flight. Setting the flag is
            // idempotent and always safe.
            flag.flag_cell().store(1, Ordering::Release);
            if self.is_owner {
                data.unlink();
                flag.unlink();
            }
            // Dropping the segments unmaps this process's views.
        } else if let Some(collector) = self.collector.take() {
            // Owner with a transfer in flight: the borrower still reads the
            // payload, so destruction is deferred until it signals done.
            collector.enqueue(data, flag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> Arc<ReleaseCollector> {
        Arc::new(ReleaseCollector::new())
    }

    #[test]
    fn test_element_kind_sizes() {
        assert_eq!(ElementKind::U8.size_bytes(), 1);
        assert_eq!(ElementKind::I16.size_bytes(), 2);
        assert_eq!(ElementKind::F32.size_bytes(), 4);
        assert_eq!(ElementKind::F64.size_bytes(), 8);
    }

    #[test]
    fn test_random_ids_are_alphanumeric_and_distinct() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_descriptor_serde_round_trip() {
        let descriptor = TransferDescriptor {
            id: "A1b2C3d4E5f6G7h8".to_string(),
            kind: ElementKind::F32,
            len: 1024,
        };

        let json = serde_json::to_string(&descriptor).unwrap();
        assert_eq!(
            serde_json::from_str::<TransferDescriptor>(&json).unwrap(),
            descriptor
        );

        let wire = bincode::serialize(&descriptor).unwrap();
        assert_eq!(
            bincode::deserialize::<TransferDescriptor>(&wire).unwrap(),
            descriptor
        );
    }

    #[test]
    fn test_descriptor_carries_no_handles() {
        let json = serde_json::to_value(TransferDescriptor {
            id: "x".into(),
            kind: ElementKind::U8,
            len: 1,
        })
        .unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["id", "kind", "len"]);
    }

    #[test]
    fn test_typed_view_checks_element_size() {
        let mut buf = SharedBuffer::allocate(ElementKind::F32, 8, collector()).unwrap();
        assert!(buf.view_mut::<f32>().is_ok());
        assert!(buf.view::<u32>().is_ok()); // same size, different interpretation
        assert!(matches!(buf.view::<u8>(), Err(LoanError::Protocol(_))));
        assert!(matches!(buf.view::<f64>(), Err(LoanError::Protocol(_))));
    }

    #[test]
    fn test_double_transfer_is_rejected() {
        let mut buf = SharedBuffer::allocate(ElementKind::U8, 4, collector()).unwrap();
        let descriptor = buf.prepare_for_transfer().unwrap();
        assert!(matches!(
            buf.prepare_for_transfer(),
            Err(LoanError::Protocol(_))
        ));
        // Let a borrower finish the transfer so the owner tears down
        // synchronously at the end of the test.
        drop(SharedBuffer::resume_from_transfer(&descriptor).unwrap());
    }

    #[test]
    fn test_non_owner_cannot_transfer() {
        let mut owner = SharedBuffer::allocate(ElementKind::U8, 4, collector()).unwrap();
        let descriptor = owner.prepare_for_transfer().unwrap();
        let mut borrowed = SharedBuffer::resume_from_transfer(&descriptor).unwrap();
        assert!(!borrowed.is_owner());
        let err = borrowed.prepare_for_transfer();
        assert!(matches!(err, Err(LoanError::Protocol(_))));
        // The failed call must not have touched the flag: the owner's
        // transfer is still in flight.
        assert_eq!(owner.flag.flag_cell().load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_stale_descriptor_is_not_found() {
        let descriptor = TransferDescriptor {
            id: "nosuchbufferhere".to_string(),
            kind: ElementKind::U8,
            len: 4,
        };
        assert!(matches!(
            SharedBuffer::resume_from_transfer(&descriptor),
            Err(LoanError::NotFound { .. })
        ));
    }
}
