//! Operator bookmarks in an agent's history.

use serde::{Deserialize, Serialize};

use arbor_core::ids::EventId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub event_id: EventId,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkStack {
    marks: Vec<Mark>,
}

impl MarkStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mark: Mark) {
        self.marks.push(mark);
    }

    /// Rewind to a mark.
    ///
    /// With a label, every mark above the most recent mark carrying that
    /// label is dropped and the labelled mark stays on the stack. Without
    /// one, the top mark is popped. Returns the mark rewound to, or `None`
    /// when nothing matched (the stack is then unchanged).
    pub fn rewind(&mut self, label: Option<&str>) -> Option<Mark> {
        match label {
            Some(label) => {
                let pos = self
                    .marks
                    .iter()
                    .rposition(|m| m.label.as_deref() == Some(label))?;
                self.marks.truncate(pos + 1);
                self.marks.last().cloned()
            }
            None => self.marks.pop(),
        }
    }

    pub fn top(&self) -> Option<&Mark> {
        self.marks.last()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mark> {
        self.marks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(id: EventId, label: Option<&str>) -> Mark {
        Mark {
            event_id: id,
            label: label.map(str::to_owned),
        }
    }

    #[test]
    fn unlabelled_rewind_pops_top() {
        let mut stack = MarkStack::new();
        stack.push(mark(1, Some("a")));
        stack.push(mark(2, None));
        assert_eq!(stack.rewind(None), Some(mark(2, None)));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.rewind(None), Some(mark(1, Some("a"))));
        assert_eq!(stack.rewind(None), None);
    }

    #[test]
    fn labelled_rewind_keeps_target() {
        let mut stack = MarkStack::new();
        stack.push(mark(1, Some("base")));
        stack.push(mark(5, Some("try")));
        stack.push(mark(9, None));
        assert_eq!(stack.rewind(Some("base")), Some(mark(1, Some("base"))));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.top(), Some(&mark(1, Some("base"))));
    }

    #[test]
    fn unknown_label_leaves_stack_alone() {
        let mut stack = MarkStack::new();
        stack.push(mark(3, Some("x")));
        assert_eq!(stack.rewind(Some("nope")), None);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn most_recent_duplicate_label_wins() {
        let mut stack = MarkStack::new();
        stack.push(mark(1, Some("x")));
        stack.push(mark(2, Some("x")));
        stack.push(mark(3, None));
        assert_eq!(stack.rewind(Some("x")), Some(mark(2, Some("x"))));
        assert_eq!(stack.len(), 2);
    }
}
