//! Navigation history with back/forward support.

use crate::fs::backend::Location;

/// Immutable navigation history with back/forward stacks.
///
/// Every mutation returns a **new** `History` instance. Entries record the
/// backend as well as the path, because a pane can switch between Local and
/// Remote. Pushing a new location clears the forward stack; moving back and
/// forward does not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    back_stack: Vec<Location>,
    forward_stack: Vec<Location>,
}

impl History {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `from` as the location being left and clears the forward stack.
    ///
    /// A location equal to the most recent back entry is not stored twice.
    pub fn push(&self, from: Location) -> Self {
        let mut back_stack = self.back_stack.clone();
        if back_stack.last() != Some(&from) {
            back_stack.push(from);
        }
        Self {
            back_stack,
            forward_stack: Vec::new(),
        }
    }

    /// Goes back one step from `current`. Returns the new history and the
    /// location to navigate to, or `None` if the back stack is empty.
    pub fn go_back(&self, current: Location) -> Option<(Self, Location)> {
        let mut back_stack = self.back_stack.clone();
        let target = back_stack.pop()?;
        let mut forward_stack = self.forward_stack.clone();
        forward_stack.push(current);
        Some((
            Self {
                back_stack,
                forward_stack,
            },
            target,
        ))
    }

    /// Goes forward one step from `current`. Returns the new history and the
    /// location to navigate to, or `None` if the forward stack is empty.
    pub fn go_forward(&self, current: Location) -> Option<(Self, Location)> {
        let mut forward_stack = self.forward_stack.clone();
        let target = forward_stack.pop()?;
        let mut back_stack = self.back_stack.clone();
        back_stack.push(current);
        Some((
            Self {
                back_stack,
                forward_stack,
            },
            target,
        ))
    }

    pub fn can_go_back(&self) -> bool {
        !self.back_stack.is_empty()
    }

    pub fn can_go_forward(&self) -> bool {
        !self.forward_stack.is_empty()
    }
}
