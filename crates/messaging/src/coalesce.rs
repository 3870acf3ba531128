//! Folding a chat into alternating conversational turns.

use parley_storage::{MessageRecord, now_millis};

/// Merges consecutive messages from the same side of the conversation.
///
/// `messages` must already be in display order. Messages without text are
/// dropped first. A merged message keeps the identity, chat and sender of the
/// earliest message of its run, joins the texts with a single space, carries no
/// media, and is stamped with the current time.
pub fn coalesce(messages: Vec<MessageRecord>) -> Vec<MessageRecord> {
    coalesce_at(messages, now_millis())
}

/// [`coalesce`] with an explicit stamp for merged messages.
pub fn coalesce_at(messages: Vec<MessageRecord>, stamped_at_ms: i64) -> Vec<MessageRecord> {
    messages
        .into_iter()
        .filter(|message| !message.text.is_empty())
        .fold(Vec::new(), |mut turns, message| {
            match turns.last_mut() {
                Some(last) if last.sender.same_side_as(&message.sender) => {
                    last.text.push(' ');
                    last.text.push_str(&message.text);
                    last.media = None;
                    last.timestamp_ms = stamped_at_ms;
                }
                _ => turns.push(message),
            }
            turns
        })
}
