use std::collections::{HashMap, VecDeque};

/// Handle of an entry in the [`OutputBuffer`] arena.
pub type EntryId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEntry {
    pub payload: String,
    /// Serialized byte length for `output` frames, 0 for control frames.
    pub output_bytes: usize,
    pub seq: Option<u64>,
}

#[derive(Debug)]
struct Slot {
    entry: QueuedEntry,
    in_queue: bool,
    in_history: bool,
}

/// Live send queue plus bounded replay history over one shared arena.
///
/// An `output` entry is referenced by both lists through the same handle; it is freed
/// once neither list holds it. Byte totals are maintained incrementally and always equal
/// the sum over the corresponding list.
#[derive(Debug)]
pub struct OutputBuffer {
    slots: HashMap<EntryId, Slot>,
    queue: VecDeque<EntryId>,
    history: VecDeque<EntryId>,
    next_id: EntryId,
    buffered_output_bytes: usize,
    history_output_bytes: usize,
    max_bytes: usize,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            slots: HashMap::new(),
            queue: VecDeque::new(),
            history: VecDeque::new(),
            next_id: 1,
            buffered_output_bytes: 0,
            history_output_bytes: 0,
            max_bytes,
        }
    }

    /// Append an `output` frame to both lists, then evict from the oldest end of history
    /// until it fits the byte budget. Returns how many entries were evicted.
    pub fn push_output(&mut self, payload: String, seq: u64) -> usize {
        let output_bytes = payload.len();
        let id = self.alloc(QueuedEntry {
            payload,
            output_bytes,
            seq: Some(seq),
        });
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.in_queue = true;
            slot.in_history = true;
        }
        self.queue.push_back(id);
        self.history.push_back(id);
        self.buffered_output_bytes += output_bytes;
        self.history_output_bytes += output_bytes;
        self.evict()
    }

    /// Append a control frame to the queue only.
    pub fn push_control(&mut self, payload: String) {
        let id = self.alloc(QueuedEntry {
            payload,
            output_bytes: 0,
            seq: None,
        });
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.in_queue = true;
        }
        self.queue.push_back(id);
    }

    pub fn front(&self) -> Option<(EntryId, &str)> {
        let id = *self.queue.front()?;
        self.slots.get(&id).map(|s| (id, s.entry.payload.as_str()))
    }

    /// Drop `id` from the queue after it was sent. Returns false if it had already left
    /// the queue (evicted or cleared while the send was in flight).
    pub fn complete(&mut self, id: EntryId) -> bool {
        if !self.remove_from_queue(id) {
            return false;
        }
        self.release(id);
        true
    }

    /// Rebuild the queue for a fresh connection: session info, replay bracket around
    /// all of history in its original order, nothing else.
    pub fn begin_replay(&mut self, session_info: String, replay_start: String, replay_end: String) {
        self.clear_queue();
        self.push_control(session_info);
        self.push_control(replay_start);
        for &id in &self.history {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.in_queue = true;
                self.buffered_output_bytes += slot.entry.output_bytes;
                self.queue.push_back(id);
            }
        }
        self.push_control(replay_end);
    }

    pub fn clear_queue(&mut self) {
        let ids: Vec<EntryId> = self.queue.drain(..).collect();
        for id in ids {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.in_queue = false;
                self.buffered_output_bytes -= slot.entry.output_bytes;
            }
            self.release(id);
        }
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn buffered_output_bytes(&self) -> usize {
        self.buffered_output_bytes
    }

    pub fn history_output_bytes(&self) -> usize {
        self.history_output_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Sequence numbers currently retained for replay, oldest first.
    pub fn history_seqs(&self) -> Vec<u64> {
        self.history
            .iter()
            .filter_map(|id| self.slots.get(id).and_then(|s| s.entry.seq))
            .collect()
    }

    /// Payloads waiting to be sent, head first.
    pub fn queued_payloads(&self) -> Vec<&str> {
        self.queue
            .iter()
            .filter_map(|id| self.slots.get(id).map(|s| s.entry.payload.as_str()))
            .collect()
    }

    fn alloc(&mut self, entry: QueuedEntry) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(
            id,
            Slot {
                entry,
                in_queue: false,
                in_history: false,
            },
        );
        id
    }

    fn evict(&mut self) -> usize {
        let mut evicted = 0;
        while self.history_output_bytes > self.max_bytes {
            let Some(id) = self.history.pop_front() else {
                break;
            };
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            slot.in_history = false;
            self.history_output_bytes -= slot.entry.output_bytes;
            self.remove_from_queue(id);
            self.release(id);
            evicted += 1;
        }
        evicted
    }

    fn remove_from_queue(&mut self, id: EntryId) -> bool {
        let Some(slot) = self.slots.get_mut(&id) else {
            return false;
        };
        if !slot.in_queue {
            return false;
        }
        slot.in_queue = false;
        self.buffered_output_bytes -= slot.entry.output_bytes;

        if self.queue.front() == Some(&id) {
            self.queue.pop_front();
        } else if let Some(pos) = self.queue.iter().position(|&q| q == id) {
            self.queue.remove(pos);
        }
        true
    }

    fn release(&mut self, id: EntryId) {
        let orphaned = self
            .slots
            .get(&id)
            .map(|s| !s.in_queue && !s.in_history)
            .unwrap_or(false);
        if orphaned {
            self.slots.remove(&id);
        }
    }

    #[cfg(test)]
    fn scanned_totals(&self) -> (usize, usize) {
        let sum = |list: &VecDeque<EntryId>| -> usize {
            list.iter()
                .filter_map(|id| self.slots.get(id))
                .map(|s| s.entry.output_bytes)
                .sum()
        };
        (sum(&self.queue), sum(&self.history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload(seq: u64, width: usize) -> String {
        let head = format!("{{\"seq\":{seq},\"d\":\"");
        let pad = width.saturating_sub(head.len() + 2);
        format!("{head}{}\"}}", "x".repeat(pad))
    }

    fn assert_accounting(buf: &OutputBuffer) {
        let (queue, history) = buf.scanned_totals();
        assert_eq!(buf.buffered_output_bytes(), queue, "queue byte counter drifted");
        assert_eq!(buf.history_output_bytes(), history, "history byte counter drifted");
        assert!(buf.slots.len() <= buf.queue.len() + buf.history.len());
    }

    #[test]
    fn eviction_keeps_newest_within_budget() {
        let mut buf = OutputBuffer::new(350);
        for seq in 1..=10 {
            buf.push_output(payload(seq, 35), seq);
            assert_accounting(&buf);
        }

        assert!(buf.history_output_bytes() <= 350);
        assert_eq!(buf.history_seqs(), (1..=10).collect::<Vec<_>>());

        buf.push_output(payload(11, 35), 11);
        assert_accounting(&buf);
        assert_eq!(buf.history_seqs(), (2..=11).collect::<Vec<_>>());
        assert_eq!(buf.history_output_bytes(), 350);
    }

    #[test]
    fn burst_over_budget_drops_exactly_the_oldest() {
        let mut buf = OutputBuffer::new(350);
        for seq in 1..=40 {
            buf.push_output(payload(seq, 36), seq);
        }
        assert_accounting(&buf);
        assert!(buf.history_output_bytes() <= 350);
        // 36-byte entries: nine fit.
        assert_eq!(buf.history_seqs(), (32..=40).collect::<Vec<_>>());
        // Evicted entries also left the live queue.
        assert_eq!(buf.queue_len(), 9);
    }

    #[test]
    fn completed_entries_stay_in_history() {
        let mut buf = OutputBuffer::new(1024);
        buf.push_output(payload(1, 40), 1);
        buf.push_output(payload(2, 40), 2);

        let (id, _) = buf.front().unwrap();
        assert!(buf.complete(id));
        assert!(!buf.complete(id));
        assert_accounting(&buf);
        assert_eq!(buf.queue_len(), 1);
        assert_eq!(buf.buffered_output_bytes(), 40);
        assert_eq!(buf.history_output_bytes(), 80);
    }

    #[test]
    fn eviction_removes_pending_queue_entry_by_identity() {
        let mut buf = OutputBuffer::new(100);
        // Identical payloads: only identity tells them apart.
        let same = payload(0, 40);
        buf.push_output(same.clone(), 1);
        buf.push_output(same.clone(), 2);
        let (first, _) = buf.front().unwrap();
        assert!(buf.complete(first));

        // Evicts seq 1 (already sent) then nothing else is over budget.
        buf.push_output(same.clone(), 3);
        assert_accounting(&buf);
        assert_eq!(buf.history_seqs(), vec![2, 3]);
        assert_eq!(buf.queue_len(), 2);

        // Evicts seq 2 which is still queued.
        buf.push_output(same, 4);
        assert_accounting(&buf);
        assert_eq!(buf.history_seqs(), vec![3, 4]);
        assert_eq!(buf.queue_len(), 2);
    }

    #[test]
    fn replay_brackets_history_in_order() {
        let mut buf = OutputBuffer::new(1024);
        for seq in 1..=3 {
            buf.push_output(payload(seq, 30), seq);
        }
        let (id, _) = buf.front().unwrap();
        buf.complete(id);

        buf.begin_replay("S".into(), "[".into(), "]".into());
        assert_accounting(&buf);

        let expected: Vec<String> = vec![
            "S".to_string(),
            "[".to_string(),
            payload(1, 30),
            payload(2, 30),
            payload(3, 30),
            "]".to_string(),
        ];
        let got: Vec<String> = buf.queued_payloads().into_iter().map(String::from).collect();
        assert_eq!(got, expected);
        assert_eq!(buf.buffered_output_bytes(), 90);
    }

    #[test]
    fn control_frames_carry_no_output_bytes() {
        let mut buf = OutputBuffer::new(10);
        buf.push_control("{\"type\":\"replay_start\"}".into());
        assert_eq!(buf.buffered_output_bytes(), 0);
        assert_eq!(buf.history_len(), 0);
        buf.clear_queue();
        assert!(buf.slots.is_empty());
    }

    #[test]
    fn oversized_entry_evicts_itself() {
        let mut buf = OutputBuffer::new(10);
        assert_eq!(buf.push_output(payload(1, 40), 1), 1);
        assert_accounting(&buf);
        assert_eq!(buf.history_len(), 0);
        assert!(buf.is_queue_empty());
        assert!(buf.slots.is_empty());
    }
}
