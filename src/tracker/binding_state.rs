/// Lifecycle of an [`AttachmentBinding`](crate::tracker::AttachmentBinding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingState {
    /// No target matches the binding's tag yet
    #[default]
    Unresolved,
    /// Bound, target currently not visible
    NotVisible,
    /// Bound, target visible
    Visible,
}

impl BindingState {
    pub fn is_bound(self) -> bool {
        self != BindingState::Unresolved
    }
}
