//! Reputation points and achievements.
//!
//! Every qualifying event runs inside one savepoint: the activity counter,
//! the base points and any milestone bonuses land together or not at all.
//! Milestones are keyed on the `(user, achievement)` primary key, so a
//! second evaluation of the same threshold inserts nothing and awards
//! nothing.

use agora_shared::types::{Achievement, MessageKind, UserId};
use agora_store::{Database, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualifyingEvent {
    MessageSent,
    FileShared,
}

impl QualifyingEvent {
    /// System messages earn nothing.
    pub fn for_kind(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::Text | MessageKind::Admin => Some(QualifyingEvent::MessageSent),
            MessageKind::File | MessageKind::Voice => Some(QualifyingEvent::FileShared),
            MessageKind::System => None,
        }
    }

    pub fn points(&self) -> u64 {
        match self {
            QualifyingEvent::MessageSent => 1,
            QualifyingEvent::FileShared => 3,
        }
    }
}

/// `(achievement, messages sent, bonus points)`
const MESSAGE_MILESTONES: [(Achievement, u64, u64); 3] = [
    (Achievement::FirstMessage, 1, 5),
    (Achievement::Chatterbox, 10, 10),
    (Achievement::Centurion, 100, 50),
];

const FILE_SHARER_BONUS: u64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementOutcome {
    pub points_awarded: u64,
    pub total_points: u64,
    pub messages_sent: u64,
    pub unlocked: Vec<Achievement>,
}

pub fn record_event(
    db: &Database,
    user: UserId,
    event: QualifyingEvent,
) -> Result<EngagementOutcome, StoreError> {
    db.atomically(|db| {
        let messages_sent = db.record_activity(user)?;
        let mut awarded = event.points();
        let mut unlocked = Vec::new();

        for (achievement, threshold, bonus) in MESSAGE_MILESTONES {
            if messages_sent >= threshold && db.unlock_achievement(user, achievement)? {
                awarded += bonus;
                unlocked.push(achievement);
            }
        }

        if event == QualifyingEvent::FileShared
            && db.unlock_achievement(user, Achievement::FileSharer)?
        {
            awarded += FILE_SHARER_BONUS;
            unlocked.push(Achievement::FileSharer);
        }

        let total_points = db.add_points(user, awarded)?;

        if !unlocked.is_empty() {
            tracing::info!(user = %user, ?unlocked, "achievements unlocked");
        }

        Ok(EngagementOutcome {
            points_awarded: awarded,
            total_points,
            messages_sent,
            unlocked,
        })
    })
}
