//! WhatsApp JID (Jabber-style address) helpers.
//!
//! A user JID looks like `15551234567@s.whatsapp.net`; the identity JID of a
//! logged-in device may carry a device suffix (`15551234567:7@s.whatsapp.net`).

/// Address suffix for individual WhatsApp users.
pub const USER_SUFFIX: &str = "@s.whatsapp.net";

/// Pseudo-JID used for status broadcast messages.
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Normalize a caller-supplied phone string into a sendable JID.
///
/// Inputs that already carry a domain (`@`) pass through untouched. Anything
/// else is stripped to its digits and given the user-address suffix.
pub fn normalize_recipient(phone: &str) -> String {
    if phone.contains('@') {
        return phone.to_string();
    }
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}{USER_SUFFIX}")
}

/// Extract the bare phone number from an identity JID.
///
/// Drops the device suffix (`:7`) and the domain.
pub fn phone_from_jid(jid: &str) -> String {
    let bare = jid.split('@').next().unwrap_or(jid);
    bare.split(':').next().unwrap_or(bare).to_string()
}

/// Whether a JID addresses the status broadcast channel.
pub fn is_status_broadcast(jid: &str) -> bool {
    jid == STATUS_BROADCAST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_formatting() {
        assert_eq!(
            normalize_recipient("+1 (555) 123-4567"),
            "15551234567@s.whatsapp.net"
        );
    }

    #[test]
    fn normalize_passes_through_addressed_input() {
        assert_eq!(
            normalize_recipient("15551234567@s.whatsapp.net"),
            "15551234567@s.whatsapp.net"
        );
        assert_eq!(normalize_recipient("abc@g.us"), "abc@g.us");
    }

    #[test]
    fn normalize_plain_digits() {
        assert_eq!(normalize_recipient("491701234567"), "491701234567@s.whatsapp.net");
    }

    #[test]
    fn phone_from_identity_jid() {
        assert_eq!(phone_from_jid("1555@s.whatsapp.net"), "1555");
        assert_eq!(phone_from_jid("1555:7@s.whatsapp.net"), "1555");
        assert_eq!(phone_from_jid("1555"), "1555");
    }

    #[test]
    fn status_broadcast_detection() {
        assert!(is_status_broadcast("status@broadcast"));
        assert!(!is_status_broadcast("15551234567@s.whatsapp.net"));
    }
}
