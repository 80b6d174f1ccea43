use std::collections::HashMap;

use senmux_core::Senblk;

/// Reassembles multi-fragment AIVDM/AIVDO sentence groups so every fragment
/// of one logical AIS message goes out in the same UDP datagram, rather than
/// risking fragments landing in separate packets that could arrive out of
/// order or get dropped independently.
///
/// Fields (after the `!AIVDM,` tag) are `total,fragment,seq_id,channel,...`;
/// a `total` of `1` needs no coalescing and is passed through immediately.
#[derive(Default)]
pub struct AisCoalescer {
    pending: HashMap<(u8, Option<u8>), Vec<Option<Senblk>>>,
}

fn parse_fields(body: &[u8]) -> Option<(u8, u8, Option<u8>)> {
    let text = std::str::from_utf8(body).ok()?;
    let mut fields = text.splitn(6, ',').skip(1);
    let total: u8 = fields.next()?.parse().ok()?;
    let frag: u8 = fields.next()?.parse().ok()?;
    let seq_raw = fields.next()?;
    let seq_id = seq_raw.parse::<u8>().ok();
    Some((total, frag, seq_id))
}

impl AisCoalescer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one sentence. Returns a complete, ordered group once every
    /// fragment has arrived (or immediately, as a single-element group, for
    /// non-fragmented sentences and anything that doesn't parse as AIVDM).
    pub fn push(&mut self, senblk: Senblk) -> Option<Vec<Senblk>> {
        let body = senblk.as_bytes();
        if !(body.starts_with(b"!AIVDM") || body.starts_with(b"!AIVDO")) {
            return Some(vec![senblk]);
        }
        let Some((total, frag, seq_id)) = parse_fields(body) else {
            return Some(vec![senblk]);
        };
        if total <= 1 {
            return Some(vec![senblk]);
        }

        let key = (total, seq_id);
        let slots = self.pending.entry(key).or_insert_with(|| vec![None; total as usize]);
        if frag == 0 || frag as usize > slots.len() {
            return Some(vec![senblk]);
        }
        slots[frag as usize - 1] = Some(senblk);

        if slots.iter().all(Option::is_some) {
            let group = self.pending.remove(&key).unwrap();
            Some(group.into_iter().map(Option::unwrap).collect())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use senmux_utils::InterfaceId;

    fn frag(total: u8, n: u8, seq: u8) -> Senblk {
        let text = format!("!AIVDM,{total},{n},{seq},A,payload,0*00\r\n");
        Senblk::from_bytes(text.as_bytes(), InterfaceId(1))
    }

    #[test]
    fn single_fragment_passes_through_immediately() {
        let mut c = AisCoalescer::new();
        let out = c.push(frag(1, 1, 0)).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn two_fragment_group_waits_for_both() {
        let mut c = AisCoalescer::new();
        assert!(c.push(frag(2, 1, 5)).is_none());
        let out = c.push(frag(2, 2, 5)).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn non_ais_sentence_passes_through() {
        let mut c = AisCoalescer::new();
        let senblk = Senblk::from_bytes(b"$GPGGA,1*2F\r\n", InterfaceId(1));
        let out = c.push(senblk).unwrap();
        assert_eq!(out.len(), 1);
    }
}
