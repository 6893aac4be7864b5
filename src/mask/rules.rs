//! Mask rule generation: turns TLS record descriptors into per-frame byte
//! ranges the rewriter zeroes or leaves alone.

use std::collections::HashMap;

use crate::errors::MaskError;
use crate::tls_table::{RuleAction, TlsRecordTypeTable};

use super::record::{RecordFrameSpan, TlsRecordDescriptor};

/// One instruction for the rewriter: zero (or keep) `byte_range` of frame
/// `frame_index`. `byte_range` is an absolute offset into that frame's raw
/// bytes, already past the 5-byte header span that produced it.
#[derive(Debug, Clone)]
pub struct MaskRule {
    pub frame_index: usize,
    pub byte_range: std::ops::Range<usize>,
    pub action: RuleAction,
}

/// Builds one [`MaskRule`] per frame-span of every descriptor, applying
/// `table`'s policy to the descriptor's content type. A multi-frame
/// ApplicationData record yields one masking rule per frame it spans; the
/// record's header bytes (first 5 bytes of its first span) are always kept.
pub fn generate_rules(
    descriptors: &[TlsRecordDescriptor],
    table: &TlsRecordTypeTable,
) -> Result<Vec<MaskRule>, MaskError> {
    let mut rules = Vec::new();
    let mut seen: HashMap<usize, Vec<std::ops::Range<usize>>> = HashMap::new();

    for descriptor in descriptors {
        // Never mask what hasn't been fully identified: a record the analyser
        // had to flush mid-flow is always kept whole, regardless of the
        // content type it guessed from its leading byte.
        let action = if descriptor.is_complete {
            table.action_for(descriptor.content_type)
        } else {
            RuleAction::KeepAll
        };
        let mut header_remaining = super::record::TlsRecordHeader::WIRE_LEN;

        for span in &descriptor.spans {
            let RecordFrameSpan { frame_index, byte_range } = span;
            let span_len = byte_range.end - byte_range.start;

            let header_here = header_remaining.min(span_len);
            header_remaining -= header_here;
            let payload_start = byte_range.start + header_here;

            if payload_start < byte_range.end {
                let rule_action = if action == RuleAction::MaskPayload {
                    RuleAction::MaskPayload
                } else {
                    RuleAction::KeepAll
                };
                push_rule(&mut rules, &mut seen, *frame_index, payload_start..byte_range.end, rule_action)?;
            }
        }
    }

    Ok(rules)
}

fn push_rule(
    rules: &mut Vec<MaskRule>,
    seen: &mut HashMap<usize, Vec<std::ops::Range<usize>>>,
    frame_index: usize,
    byte_range: std::ops::Range<usize>,
    action: RuleAction,
) -> Result<(), MaskError> {
    let existing = seen.entry(frame_index).or_default();
    for range in existing.iter() {
        if range.start < byte_range.end && byte_range.start < range.end {
            return Err(MaskError::RuleOverlap { frame_index });
        }
    }
    existing.push(byte_range.clone());
    rules.push(MaskRule {
        frame_index,
        byte_range,
        action,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::record::TlsContentType;

    fn descriptor(content_type: TlsContentType, frame_index: usize, range: std::ops::Range<usize>) -> TlsRecordDescriptor {
        descriptor_with_completeness(content_type, frame_index, range, true)
    }

    fn descriptor_with_completeness(
        content_type: TlsContentType,
        frame_index: usize,
        range: std::ops::Range<usize>,
        is_complete: bool,
    ) -> TlsRecordDescriptor {
        TlsRecordDescriptor {
            content_type,
            length: (range.end - range.start) as u16,
            is_complete,
            spans: vec![RecordFrameSpan {
                frame_index,
                byte_range: range,
            }],
        }
    }

    #[test]
    fn application_data_keeps_header_masks_payload() {
        let table = TlsRecordTypeTable::standard();
        let descriptors = vec![descriptor(TlsContentType::ApplicationData, 0, 0..37)];
        let rules = generate_rules(&descriptors, &table).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].byte_range, 5..37);
        assert_eq!(rules[0].action, RuleAction::MaskPayload);
    }

    #[test]
    fn handshake_record_is_kept_whole() {
        let table = TlsRecordTypeTable::standard();
        let descriptors = vec![descriptor(TlsContentType::Handshake, 0, 0..20)];
        let rules = generate_rules(&descriptors, &table).unwrap();
        assert_eq!(rules[0].action, RuleAction::KeepAll);
    }

    #[test]
    fn incomplete_application_data_record_is_kept_whole() {
        let table = TlsRecordTypeTable::standard();
        let descriptors = vec![descriptor_with_completeness(TlsContentType::ApplicationData, 0, 0..37, false)];
        let rules = generate_rules(&descriptors, &table).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, RuleAction::KeepAll);
    }

    #[test]
    fn overlapping_spans_in_same_frame_are_rejected() {
        let table = TlsRecordTypeTable::standard();
        let descriptors = vec![
            descriptor(TlsContentType::ApplicationData, 0, 0..20),
            descriptor(TlsContentType::ApplicationData, 0, 10..30),
        ];
        assert!(generate_rules(&descriptors, &table).is_err());
    }
}
