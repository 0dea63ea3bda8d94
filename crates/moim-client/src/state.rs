//! Who is looking at which meeting chat.

use moim_shared::{MeetingId, UserId};

/// Identity of one chat view.
///
/// A change to any field means the current [`MeetingChat`] must be
/// deactivated and a new one activated.
///
/// [`MeetingChat`]: crate::chat::MeetingChat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatContext {
    /// Meeting whose chat is shown.
    pub meeting_id: MeetingId,
    /// The signed-in user.
    pub local_user: UserId,
    /// Whether `local_user` may read and write this chat. Checked by the
    /// caller; the backend's access policy is the real enforcement.
    pub is_participant: bool,
}

impl ChatContext {
    pub fn new(meeting_id: MeetingId, local_user: UserId, is_participant: bool) -> Self {
        Self {
            meeting_id,
            local_user,
            is_participant,
        }
    }
}
