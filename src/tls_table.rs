//! Immutable TLS record type → rule action table.
//!
//! Built once from configuration and never mutated afterwards, the way the
//! rest of this crate avoids shared mutable lookup state: stages hold their
//! own `Arc`-free owned copies rather than reaching into a global.

use crate::mask::record::TlsContentType;

/// What a mask rule should do with a record's payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Preserve every byte of the record unchanged.
    KeepAll,
    /// Preserve the 5-byte header, zero the payload that follows it.
    MaskPayload,
}

/// Maps every known TLS content type to its rule action.
///
/// Unknown content types are not stored here: the analyser treats them as a
/// resync boundary before a descriptor is ever produced, so this table is
/// only ever consulted for the five content types the analyser recognises.
#[derive(Debug, Clone)]
pub struct TlsRecordTypeTable {
    change_cipher_spec: RuleAction,
    alert: RuleAction,
    handshake: RuleAction,
    application_data: RuleAction,
    heartbeat: RuleAction,
}

impl TlsRecordTypeTable {
    /// The table this crate ships: ApplicationData payload is masked, every
    /// other known content type (including Heartbeat) is fully preserved.
    pub fn standard() -> Self {
        Self {
            change_cipher_spec: RuleAction::KeepAll,
            alert: RuleAction::KeepAll,
            handshake: RuleAction::KeepAll,
            application_data: RuleAction::MaskPayload,
            heartbeat: RuleAction::KeepAll,
        }
    }

    pub fn action_for(&self, content_type: TlsContentType) -> RuleAction {
        match content_type {
            TlsContentType::ChangeCipherSpec => self.change_cipher_spec,
            TlsContentType::Alert => self.alert,
            TlsContentType::Handshake => self.handshake,
            TlsContentType::ApplicationData => self.application_data,
            TlsContentType::Heartbeat => self.heartbeat,
            TlsContentType::Unknown(_) => RuleAction::KeepAll,
        }
    }
}

impl Default for TlsRecordTypeTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_data_is_masked_everything_else_kept() {
        let table = TlsRecordTypeTable::standard();
        assert_eq!(
            table.action_for(TlsContentType::ApplicationData),
            RuleAction::MaskPayload
        );
        for ct in [
            TlsContentType::ChangeCipherSpec,
            TlsContentType::Alert,
            TlsContentType::Handshake,
            TlsContentType::Heartbeat,
        ] {
            assert_eq!(table.action_for(ct), RuleAction::KeepAll);
        }
    }
}
