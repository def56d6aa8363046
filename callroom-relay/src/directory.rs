//! Connection-scoped user directory.
//!
//! Maps each live connection that has announced a display name to its
//! [`Participant`] record. The directory only changes through [`Directory::join`]
//! and [`Directory::leave`]; readers take an insertion-ordered
//! [`Directory::snapshot`].
//!
//! Entries are ephemeral and lost on restart. The set is a single shared room
//! and expected to stay small, so lookups are linear scans over a `Vec` that
//! doubles as the join-order record.

use callroom_proto::participant::{ConnectionId, Participant};

/// Reasons a directory operation was not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The display name was empty or whitespace only.
    #[error("display name is blank")]
    BlankName,
}

/// In-memory roster of joined connections, in join order.
#[derive(Debug, Default)]
pub struct Directory {
    participants: Vec<Participant>,
}

impl Directory {
    /// Creates an empty directory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            participants: Vec::new(),
        }
    }

    /// Records `display_name` for `id`.
    ///
    /// A second join on the same connection overwrites the name but keeps the
    /// entry's original position. The name is stored exactly as given.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::BlankName`] if `display_name` is blank after
    /// trimming; the directory is left untouched.
    pub fn join(&mut self, id: &ConnectionId, display_name: &str) -> Result<(), DirectoryError> {
        if display_name.trim().is_empty() {
            return Err(DirectoryError::BlankName);
        }

        if let Some(existing) = self.participants.iter_mut().find(|p| &p.id == id) {
            display_name.clone_into(&mut existing.name);
        } else {
            self.participants.push(Participant {
                id: id.clone(),
                name: display_name.to_string(),
            });
        }
        Ok(())
    }

    /// Removes the entry for `id`, returning it if it existed.
    pub fn leave(&mut self, id: &ConnectionId) -> Option<Participant> {
        let index = self.participants.iter().position(|p| &p.id == id)?;
        Some(self.participants.remove(index))
    }

    /// Returns every current participant in join order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    /// Returns the entry for `id`, if joined.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// Returns `true` if `id` has joined.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// Number of joined participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Returns `true` if nobody has joined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
