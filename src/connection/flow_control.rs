//! Read throttling based on aggregate outbound/inbound backlog (spec §4.9)

/// Whether the connection should keep requesting reads from the transport.
///
/// `outbound_backlog` is the sum of the three outbound processors'
/// backlogs; `inbound_backlogs` is each inbound PUBLISH processor's current
/// backlog paired with its sending client's configured max.
pub fn read_permitted(
    outbound_backlog: usize,
    max_pending_inbound_acks: usize,
    inbound_backlogs: impl Iterator<Item = (usize, usize)>,
) -> bool {
    if outbound_backlog >= max_pending_inbound_acks {
        return false;
    }
    for (backlog, max_pending) in inbound_backlogs {
        if backlog >= max_pending {
            return false;
        }
    }
    true
}
