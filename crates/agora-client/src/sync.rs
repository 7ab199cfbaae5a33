//! Client-side view of the message log.
//!
//! The [`Timeline`] holds the last authoritative snapshot plus any
//! provisional entries the user has typed but the server has not yet
//! returned. A provisional entry is shown immediately on submit. Once the
//! server acknowledges it, it stays until the next snapshot is applied, so
//! for at most one polling interval the same text can appear twice. That
//! overlap is expected.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use agora_shared::constants::PROVISIONAL_ID_PREFIX;
use agora_shared::error::ValidationError;
use agora_shared::protocol::MessageDto;
use agora_shared::types::MessageId;
use agora_shared::validation::validate_body;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionalState {
    Pending,
    /// Accepted by the server under this id; waiting for the next poll.
    Acknowledged(MessageId),
}

/// A locally appended message that has not been seen in a snapshot yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisional {
    /// `temp-<uuid>`, never sent to the server.
    pub temp_id: String,
    pub author_display_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub state: ProvisionalState,
}

/// One row as a UI would render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEntry<'a> {
    Confirmed(&'a MessageDto),
    Provisional(&'a Provisional),
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    snapshot: Vec<MessageDto>,
    provisional: Vec<Provisional>,
    max_body_chars: usize,
}

pub fn is_provisional_id(id: &str) -> bool {
    id.starts_with(PROVISIONAL_ID_PREFIX)
}

impl Timeline {
    pub fn new(max_body_chars: usize) -> Self {
        Self {
            snapshot: Vec::new(),
            provisional: Vec::new(),
            max_body_chars,
        }
    }

    /// Validate `body` and append it as a pending provisional entry.
    pub fn begin_send(
        &mut self,
        author_display_name: &str,
        body: &str,
    ) -> Result<Provisional, ValidationError> {
        validate_body(body, self.max_body_chars, false)?;

        let entry = Provisional {
            temp_id: format!("{PROVISIONAL_ID_PREFIX}{}", Uuid::new_v4()),
            author_display_name: author_display_name.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            state: ProvisionalState::Pending,
        };
        self.provisional.push(entry.clone());
        Ok(entry)
    }

    /// Mark a provisional entry as accepted. If a poll already delivered
    /// `id`, the entry is dropped at once. Returns `false` if the entry is
    /// gone.
    pub fn confirm_send(&mut self, temp_id: &str, id: MessageId) -> bool {
        let Some(index) = self.provisional.iter().position(|p| p.temp_id == temp_id) else {
            return false;
        };
        if self.snapshot.iter().any(|m| m.id == id) {
            self.provisional.remove(index);
        } else {
            self.provisional[index].state = ProvisionalState::Acknowledged(id);
        }
        true
    }

    /// Withdraw a provisional entry after the server refused it.
    pub fn fail_send(&mut self, temp_id: &str) -> Option<Provisional> {
        let index = self.provisional.iter().position(|p| p.temp_id == temp_id)?;
        Some(self.provisional.remove(index))
    }

    /// Replace the authoritative snapshot. Acknowledged provisionals are
    /// dropped here; pending ones stay. Returns whether anything visible
    /// changed.
    pub fn apply_snapshot(&mut self, messages: Vec<MessageDto>) -> bool {
        let before = self.provisional.len();
        self.provisional
            .retain(|p| p.state == ProvisionalState::Pending);
        let dropped = self.provisional.len() != before;

        if messages == self.snapshot {
            return dropped;
        }
        self.snapshot = messages;
        true
    }

    pub fn snapshot(&self) -> &[MessageDto] {
        &self.snapshot
    }

    pub fn provisional(&self) -> &[Provisional] {
        &self.provisional
    }

    /// Authoritative messages in log order, followed by provisionals in
    /// submission order.
    pub fn entries(&self) -> Vec<TimelineEntry<'_>> {
        self.snapshot
            .iter()
            .map(TimelineEntry::Confirmed)
            .chain(self.provisional.iter().map(TimelineEntry::Provisional))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.len() + self.provisional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
