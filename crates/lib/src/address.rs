//! Card addressing: a reply card is identified by a digest of the triggering message,
//! so the same thread always resolves to the same remote card without local bookkeeping.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `sender_id + "_" + sender_corp_id + "_" + conversation_id + "_" + message_id`.
pub fn card_biz_id(
    sender_id: &str,
    sender_corp_id: &str,
    conversation_id: &str,
    message_id: &str,
) -> String {
    let factor = format!(
        "{}_{}_{}_{}",
        sender_id, sender_corp_id, conversation_id, message_id
    );
    let mut hasher = Sha256::new();
    hasher.update(factor.as_bytes());
    hex::encode(hasher.finalize())
}
