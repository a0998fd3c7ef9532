// A poisoned lock means a tracked operation panicked halfway through updating the tracking table,
// so the table can no longer be trusted to reflect the live blocks (we panic).
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - the tracking table may no \
    longer match the set of live blocks, so continued execution cannot report corruption reliably";
