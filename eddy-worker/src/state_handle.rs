use crate::error::StateAccessError;
use eddy_types::Data;

/// The mutation a tracking function has asked for so far in one invocation.
/// Later calls replace earlier ones.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingMutation<S: Data> {
    Unchanged,
    Update(S),
    Remove,
}

/// The view of a key's state handed to the tracking function for the
/// duration of a single invocation.
///
/// Reads reflect the pending mutation rather than the state the key had when
/// the invocation began: after `remove()`, `exists()` is false and `get()`
/// fails; after `update(s)`, `get()` returns `s`.
#[derive(Debug)]
pub struct StateHandle<S: Data> {
    prior: Option<S>,
    pending: PendingMutation<S>,
    timing_out: bool,
}

impl<S: Data> StateHandle<S> {
    pub(crate) fn new(prior: Option<S>, timing_out: bool) -> Self {
        Self {
            prior,
            pending: PendingMutation::Unchanged,
            timing_out,
        }
    }

    pub fn exists(&self) -> bool {
        self.get_option().is_some()
    }

    pub fn get(&self) -> Result<&S, StateAccessError> {
        self.get_option().ok_or(StateAccessError)
    }

    pub fn get_option(&self) -> Option<&S> {
        match &self.pending {
            PendingMutation::Unchanged => self.prior.as_ref(),
            PendingMutation::Update(state) => Some(state),
            PendingMutation::Remove => None,
        }
    }

    pub fn update(&mut self, state: S) {
        self.pending = PendingMutation::Update(state);
    }

    pub fn remove(&mut self) {
        self.pending = PendingMutation::Remove;
    }

    /// True when the key is being visited only because it has been idle for
    /// longer than the configured timeout.
    pub fn is_timing_out(&self) -> bool {
        self.timing_out
    }

    pub fn is_updated(&self) -> bool {
        matches!(self.pending, PendingMutation::Update(_))
    }

    pub fn is_removed(&self) -> bool {
        matches!(self.pending, PendingMutation::Remove)
    }

    pub(crate) fn into_parts(self) -> (Option<S>, PendingMutation<S>) {
        (self.prior, self.pending)
    }
}
