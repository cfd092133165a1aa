use kms_crypto::{CipherOperation, DigestOperation, SignatureOperation};
use kms_mem::MemPtr;
use kms_types::{
    KmsError, KmsResult, MechanismType, ObjectHandle, SessionFlags, SessionHandle, SessionInfo,
    SessionState,
};
use tracing::debug;

// ---------------------------------------------------------------------------
// Operation contexts
// ---------------------------------------------------------------------------

/// CCM decryption progress: the tag trails the payload in the caller's
/// stream and has to be split off mid-update.
#[derive(Debug)]
pub(crate) struct CcmTracker {
    /// Declared payload length.
    pub data_len: usize,
    /// Payload and tag bytes not yet seen.
    pub data_remain: usize,
    pub tag_len: usize,
    /// Tag bytes collected so far.
    pub partial: Vec<u8>,
    /// Verified tag, handed out by the next `DecryptFinal`.
    pub tag: Option<Vec<u8>>,
}

impl CcmTracker {
    pub fn new(data_len: usize, tag_len: usize) -> Self {
        Self {
            data_len,
            data_remain: data_len + tag_len,
            tag_len,
            partial: Vec::with_capacity(tag_len),
            tag: None,
        }
    }

    /// Payload bytes still expected before the tag starts.
    pub fn payload_left(&self) -> usize {
        self.data_remain - (self.tag_len - self.partial.len())
    }
}

pub(crate) struct CipherContext {
    pub op: Box<dyn CipherOperation>,
    pub ccm: Option<CcmTracker>,
}

/// Paged search results; the handles themselves live in the context block.
#[derive(Debug)]
pub(crate) struct SearchContext {
    pub count: usize,
    pub cursor: usize,
}

pub(crate) enum Operation {
    Digest(Box<dyn DigestOperation>),
    Cipher(CipherContext),
    Signature(Box<dyn SignatureOperation>),
    Search(SearchContext),
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Self::Digest(_) => "digest",
            Self::Cipher(_) => "cipher",
            Self::Signature(_) => "signature",
            Self::Search(_) => "search",
        }
    }
}

/// Working state of an in-flight operation. `block` is the allocator block
/// backing it and must be freed when the session returns to idle.
pub(crate) struct OperationContext {
    pub block: MemPtr,
    pub op: Operation,
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("block", &self.block)
            .field("op", &self.op.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session table
// ---------------------------------------------------------------------------

/// One slot of the session table.
#[derive(Debug)]
pub struct Session {
    pub(crate) slot_id: u32,
    pub(crate) state: SessionState,
    pub(crate) flags: u32,
    pub(crate) device_error: u32,
    pub(crate) application: Option<u64>,
    pub(crate) mechanism: Option<MechanismType>,
    pub(crate) key: ObjectHandle,
    pub(crate) context: Option<OperationContext>,
}

impl Session {
    fn unused() -> Self {
        Self {
            slot_id: 0,
            state: SessionState::NotUsed,
            flags: 0,
            device_error: 0,
            application: None,
            mechanism: None,
            key: ObjectHandle::UNKNOWN,
            context: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Opaque value supplied by the application at open time.
    pub fn application(&self) -> Option<u64> {
        self.application
    }

    pub fn mechanism(&self) -> Option<MechanismType> {
        self.mechanism
    }

    pub fn key(&self) -> ObjectHandle {
        self.key
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::NotUsed
    }
}

/// Fixed-capacity session table.
///
/// Handles are 1-based indexes into the table. A session holds at most one
/// in-flight operation; its state names the operation family that may
/// continue it.
#[derive(Debug)]
pub struct SessionManager {
    slots: Vec<Session>,
}

impl SessionManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Session::unused()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of open sessions.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_open()).count()
    }

    /// Return every slot to `NOT_USED`, dropping contexts. Outstanding
    /// context blocks are handed back so the caller can release them.
    pub(crate) fn reset(&mut self) -> Vec<(SessionHandle, MemPtr)> {
        let mut blocks = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(ctx) = slot.context.take() {
                blocks.push((SessionHandle::from_index(index), ctx.block));
            }
            *slot = Session::unused();
        }
        blocks
    }

    /// Close every open session of `slot_id`, whatever its state. Context
    /// blocks are handed back as in [`SessionManager::reset`].
    pub(crate) fn close_slot(&mut self, slot_id: u32) -> Vec<(SessionHandle, MemPtr)> {
        let mut blocks = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.is_open() || slot.slot_id != slot_id {
                continue;
            }
            if let Some(ctx) = slot.context.take() {
                blocks.push((SessionHandle::from_index(index), ctx.block));
            }
            *slot = Session::unused();
        }
        blocks
    }

    /// Open a session in the first unused slot.
    pub fn open(
        &mut self,
        slot_id: u32,
        flags: u32,
        application: Option<u64>,
    ) -> KmsResult<SessionHandle> {
        if flags & SessionFlags::SERIAL_SESSION == 0 {
            return Err(KmsError::SessionParallelNotSupported);
        }
        let index = self
            .slots
            .iter()
            .position(|s| !s.is_open())
            .ok_or(KmsError::SessionCount)?;
        let slot = &mut self.slots[index];
        *slot = Session::unused();
        slot.slot_id = slot_id;
        slot.flags = flags;
        slot.application = application;
        slot.state = SessionState::Idle;

        let handle = SessionHandle::from_index(index);
        debug!(session = handle.value(), slot_id, "session opened");
        Ok(handle)
    }

    /// Close an idle session.
    pub fn close(&mut self, handle: SessionHandle) -> KmsResult<()> {
        let session = self.get_mut(handle)?;
        if session.state != SessionState::Idle {
            return Err(KmsError::SessionHandleInvalid);
        }
        *session = Session::unused();
        debug!(session = handle.value(), "session closed");
        Ok(())
    }

    /// Bounds and liveness check.
    pub fn check_handle(&self, handle: SessionHandle) -> KmsResult<()> {
        self.get(handle).map(|_| ())
    }

    pub fn get(&self, handle: SessionHandle) -> KmsResult<&Session> {
        handle
            .index()
            .and_then(|i| self.slots.get(i))
            .filter(|s| s.is_open())
            .ok_or(KmsError::SessionHandleInvalid)
    }

    pub(crate) fn get_mut(&mut self, handle: SessionHandle) -> KmsResult<&mut Session> {
        handle
            .index()
            .and_then(|i| self.slots.get_mut(i))
            .filter(|s| s.is_open())
            .ok_or(KmsError::SessionHandleInvalid)
    }

    /// The session, if it is open and in `state`.
    pub(crate) fn expect_state(
        &mut self,
        handle: SessionHandle,
        state: SessionState,
    ) -> KmsResult<&mut Session> {
        let session = self.get_mut(handle)?;
        if session.state != state {
            return Err(KmsError::OperationNotInitialized);
        }
        Ok(session)
    }

    /// Move an idle session into an operation state with its context.
    pub(crate) fn begin(
        &mut self,
        handle: SessionHandle,
        state: SessionState,
        mechanism: Option<MechanismType>,
        key: ObjectHandle,
        context: OperationContext,
    ) -> KmsResult<()> {
        let session = self.get_mut(handle)?;
        session.state = state;
        session.mechanism = mechanism;
        session.key = key;
        session.context = Some(context);
        Ok(())
    }

    /// The single transition back to `IDLE`. Returns the context that was
    /// attached, for the caller to release.
    pub(crate) fn set_idle(&mut self, handle: SessionHandle) -> Option<OperationContext> {
        let session = self.get_mut(handle).ok()?;
        session.state = SessionState::Idle;
        session.mechanism = None;
        session.key = ObjectHandle::UNKNOWN;
        session.context.take()
    }

    pub fn info(&self, handle: SessionHandle) -> KmsResult<SessionInfo> {
        let session = self.get(handle)?;
        Ok(SessionInfo {
            slot_id: session.slot_id,
            state: session.state,
            flags: session.flags,
            device_error: session.device_error,
        })
    }
}
