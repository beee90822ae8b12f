use ferry_abi::{GuestFnIndex, GuestPtr, Handle};
use ferry_mem::{
    Element, FreeListAllocator, GuestAlloc, LinearMemory, TypedView, TypedViewMut, ViewCache,
};

use crate::closure::ClosureArena;
use crate::config::BoundaryConfig;
use crate::functions::FunctionTable;
use crate::handles::HandleTable;
use crate::object::ObjectTable;
use crate::schedule::Scheduler;
use crate::trampoline::{HostRegistry, PendingError};
use crate::value::HostValue;
use crate::Result;

/// One compute-module instance and everything the host keeps on its behalf.
///
/// Every boundary operation goes through `&mut Boundary`; there is no global state. Host
/// operations and callback bodies receive the same `&mut Boundary`, which is how nested calls
/// re-enter the bridge.
pub struct Boundary {
    pub(crate) config: BoundaryConfig,
    pub(crate) memory: LinearMemory,
    pub(crate) views: ViewCache,
    pub(crate) alloc: Box<dyn GuestAlloc>,
    pub(crate) handles: HandleTable,
    pub(crate) pending: PendingError,
    pub(crate) ops: HostRegistry,
    pub(crate) functions: FunctionTable,
    pub(crate) closures: ClosureArena,
    pub(crate) objects: ObjectTable,
    pub(crate) scheduler: Scheduler,
}

impl Boundary {
    /// Boundary backed by a [`FreeListAllocator`].
    pub fn new(config: BoundaryConfig) -> Result<Self> {
        let alloc = FreeListAllocator::with_options(config.allocator)?;
        Self::with_allocator(config, Box::new(alloc))
    }

    pub fn with_allocator(config: BoundaryConfig, alloc: Box<dyn GuestAlloc>) -> Result<Self> {
        config.validate()?;
        let handles = HandleTable::try_with_capacity(config.handle_capacity)?;
        let memory = LinearMemory::with_options(config.memory)?;
        tracing::debug!(
            pages = memory.pages(),
            max_pages = memory.max_pages(),
            "boundary created"
        );
        Ok(Self {
            handles,
            config,
            memory,
            views: ViewCache::new(),
            alloc,
            pending: PendingError::default(),
            ops: HostRegistry::default(),
            functions: FunctionTable::new(),
            closures: ClosureArena::default(),
            objects: ObjectTable::default(),
            scheduler: Scheduler::default(),
        })
    }

    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    /// Direct access for compute-side writes. Views are revalidated on their next access.
    pub fn memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.memory
    }

    pub fn views(&self) -> &ViewCache {
        &self.views
    }

    /// Grow linear memory by `delta_pages`, returning the previous page count.
    pub fn grow_memory(&mut self, delta_pages: u32) -> Result<u32> {
        Ok(self.memory.grow(delta_pages)?)
    }

    pub fn view<T: Element>(&mut self) -> TypedView<'_, T> {
        self.views.view(&self.memory)
    }

    pub fn view_mut<T: Element>(&mut self) -> TypedViewMut<'_, T> {
        self.views.view_mut(&mut self.memory)
    }

    pub fn allocate(&mut self, len: u32, align: u32) -> Result<GuestPtr> {
        Ok(self.alloc.allocate(&mut self.memory, len, align)?)
    }

    pub fn reallocate(
        &mut self,
        ptr: GuestPtr,
        old_len: u32,
        new_len: u32,
        align: u32,
    ) -> Result<GuestPtr> {
        Ok(self
            .alloc
            .reallocate(&mut self.memory, ptr, old_len, new_len, align)?)
    }

    pub fn free_guest(&mut self, ptr: GuestPtr, len: u32, align: u32) -> Result<()> {
        Ok(self.alloc.free(&mut self.memory, ptr, len, align)?)
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn alloc_handle(&mut self, value: HostValue) -> Handle {
        self.handles.alloc(value)
    }

    pub fn handle_value(&self, handle: Handle) -> Result<&HostValue> {
        self.handles.get(handle)
    }

    pub fn take_handle(&mut self, handle: Handle) -> Result<HostValue> {
        self.handles.take(handle)
    }

    pub fn release_handle(&mut self, handle: Handle) -> Result<()> {
        self.handles.release(handle)
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn register_callback<F>(&mut self, body: F) -> GuestFnIndex
    where
        F: Fn(&mut Boundary, GuestPtr, &[HostValue]) -> std::result::Result<HostValue, HostValue>
            + 'static,
    {
        self.functions.register_callback(body)
    }

    pub fn register_drop<F>(&mut self, dtor: F) -> GuestFnIndex
    where
        F: Fn(&mut Boundary, GuestPtr) + 'static,
    {
        self.functions.register_drop(dtor)
    }

    pub fn closures(&self) -> &ClosureArena {
        &self.closures
    }

    /// Run the destructors of every closure and exported object still owned by the boundary.
    ///
    /// Returns how many were finalized. Anything reaching this point was leaked by the compute
    /// side, so each one is logged. A closure with a call in progress only loses its creation
    /// reference; its destructor runs when that call returns.
    pub fn finalize(&mut self) -> usize {
        let mut finalized = 0;
        for id in self.closures.live_ids() {
            let creation_ref = u32::from(!self.closures.is_disposal_pending(id));
            let active_calls = self
                .closures
                .ref_count(id)
                .map_or(0, |count| count.saturating_sub(creation_ref));
            if active_calls > 0 {
                tracing::warn!(closure = %id, active_calls, "finalizing closure after its active calls");
                self.dispose_closure(id);
                continue;
            }
            if let Some(state) = self.closures.remove(id) {
                tracing::warn!(closure = %id, refs = state.count, "finalizing leaked closure");
                self.run_closure_dtor(id, state);
                finalized += 1;
            }
        }
        for id in self.objects.live_ids() {
            if let Some(object) = self.objects.take(id) {
                tracing::warn!(object = %id, ptr = object.ptr, "finalizing leaked exported object");
                self.run_object_free(id, object);
                finalized += 1;
            }
        }
        finalized
    }
}

impl Drop for Boundary {
    fn drop(&mut self) {
        if self.config.finalize_on_drop {
            self.finalize();
        }
    }
}

impl std::fmt::Debug for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Boundary")
            .field("pages", &self.memory.pages())
            .field("live_handles", &self.handles.live_count())
            .field("pending_error", &self.pending.peek())
            .field("live_closures", &self.closures.live_count())
            .field("live_objects", &self.objects.live_count())
            .finish_non_exhaustive()
    }
}
