use std::cell::RefCell;
use std::collections::VecDeque;

use ferry_bridge::{HostValue, Resolver};

use crate::{abort_error, FileServices, HostServiceError, OpenedFile, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct PendingPick {
    accept: String,
    resolver: Resolver,
}

/// In-memory [`FileServices`].
///
/// Dialogs stay open until the embedder answers them with [`MemoryFileServices::complete_next`]
/// or [`MemoryFileServices::cancel_next`], oldest first; saves are recorded.
#[derive(Debug, Default)]
pub struct MemoryFileServices {
    picks: RefCell<VecDeque<PendingPick>>,
    saved: RefCell<Vec<SavedFile>>,
}

impl MemoryFileServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_picks(&self) -> usize {
        self.picks.borrow().len()
    }

    /// `accept` filters of the open dialogs, oldest first.
    pub fn pending_accepts(&self) -> Vec<String> {
        self.picks
            .borrow()
            .iter()
            .map(|pick| pick.accept.clone())
            .collect()
    }

    /// Answer the oldest open dialog with `file`.
    pub fn complete_next(&self, file: OpenedFile) -> Result<()> {
        let pick = self.next_pick()?;
        tracing::debug!(name = %file.name, len = file.data.len(), "file picked");
        pick.resolver.resolve(HostValue::object(file));
        Ok(())
    }

    /// Dismiss the oldest open dialog.
    pub fn cancel_next(&self) -> Result<()> {
        let pick = self.next_pick()?;
        pick.resolver.reject(abort_error());
        Ok(())
    }

    pub fn saved(&self) -> Vec<SavedFile> {
        self.saved.borrow().clone()
    }

    pub fn take_saved(&self) -> Vec<SavedFile> {
        self.saved.take()
    }

    fn next_pick(&self) -> Result<PendingPick> {
        self.picks
            .borrow_mut()
            .pop_front()
            .ok_or(HostServiceError::NoPendingPick)
    }
}

impl FileServices for MemoryFileServices {
    fn open_file_dialog(&self, accept: &str, resolver: Resolver) -> Result<()> {
        self.picks.borrow_mut().push_back(PendingPick {
            accept: accept.to_owned(),
            resolver,
        });
        Ok(())
    }

    fn save_file(&self, data: &[u8], filename: &str) -> Result<()> {
        tracing::debug!(filename, len = data.len(), "file saved");
        self.saved.borrow_mut().push(SavedFile {
            filename: filename.to_owned(),
            data: data.to_vec(),
        });
        Ok(())
    }
}
