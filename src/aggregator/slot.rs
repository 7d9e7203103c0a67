use crate::constants::PACKET_MAX;

use super::format::format_g;

/// The family a slot's values have committed to. Assigned on first value;
/// a later value of a different family is rejected (see `set_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Unknown,
    Counter,
    Other,
}

/// One accumulator for a distinct metric name within the currently-filling
/// packet. `buffer` holds `name_bytes` (including the trailing `:`)
/// followed by the concatenated value segments; only the first
/// `total_length` bytes are meaningful.
pub struct Slot {
    buffer: [u8; PACKET_MAX],
    name_length: usize,
    total_length: usize,
    metric_type: MetricType,
    counter_sum: f64,
}

/// Returned when a slot operation would overflow `PACKET_MAX`; the caller
/// is expected to have already checked capacity before calling, so this
/// is a defensive backstop rather than a normal control path.
#[derive(Debug)]
pub struct CapacityError;

impl Slot {
    pub fn empty() -> Self {
        Slot {
            buffer: [0u8; PACKET_MAX],
            name_length: 0,
            total_length: 0,
            metric_type: MetricType::Unknown,
            counter_sum: 0.0,
        }
    }

    /// Reinitializes this slot to hold `name` (including its trailing `:`)
    /// as a fresh, empty accumulator.
    pub fn init(&mut self, name: &[u8]) {
        self.buffer[..name.len()].copy_from_slice(name);
        self.name_length = name.len();
        self.total_length = name.len();
        self.metric_type = MetricType::Unknown;
        self.counter_sum = 0.0;
    }

    pub fn name(&self) -> &[u8] {
        &self.buffer[..self.name_length]
    }

    pub fn name_length(&self) -> usize {
        self.name_length
    }

    /// Bytes to copy into an egress packet: `name:` followed by every
    /// value segment collected so far, each still terminated with `:`.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.total_length]
    }

    /// True when no value has ever been appended (a never-touched slot).
    pub fn is_empty(&self) -> bool {
        self.total_length == self.name_length
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Forces the type of a freshly re-created slot to match the slot it
    /// replaced across a mid-line flush (spec §4.1 step 4: "same name,
    /// preserved type").
    pub fn force_type(&mut self, t: MetricType) {
        self.metric_type = t;
    }

    /// Returns true if `t` is compatible with this slot's committed type
    /// (adopting it if the slot was still `Unknown`).
    pub fn accepts_type(&mut self, t: MetricType) -> bool {
        match self.metric_type {
            MetricType::Unknown => {
                self.metric_type = t;
                true
            }
            existing => existing == t,
        }
    }

    /// Adds a rate-adjusted contribution to the running counter sum and
    /// re-serializes the value segment as `%.15g|c\n`, replacing whatever
    /// counter segment was there before.
    pub fn add_counter(&mut self, contribution: f64) -> Result<(), CapacityError> {
        let candidate_sum = self.counter_sum + contribution;
        let serialized = format!("{}|c\n", format_g(candidate_sum, 15));
        let new_total = self.name_length + serialized.len();
        if new_total > PACKET_MAX {
            return Err(CapacityError);
        }
        self.buffer[self.name_length..new_total].copy_from_slice(serialized.as_bytes());
        self.total_length = new_total;
        self.counter_sum = candidate_sum;
        Ok(())
    }

    /// Appends a raw OTHER segment (`value|type[|@rate]`, without its
    /// original delimiter) followed by a fresh `:`, preserving the
    /// segment for downstream histogram/gauge/timer logic.
    pub fn append_other(&mut self, content: &[u8]) -> Result<(), CapacityError> {
        let added = content.len() + 1;
        if self.total_length + added > PACKET_MAX {
            return Err(CapacityError);
        }
        let start = self.total_length;
        self.buffer[start..start + content.len()].copy_from_slice(content);
        self.buffer[start + content.len()] = b':';
        self.total_length += added;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_slot_is_empty() {
        let mut slot = Slot::empty();
        slot.init(b"foo:");
        assert!(slot.is_empty());
        assert_eq!(slot.payload(), b"foo:");
    }

    #[test]
    fn counter_accumulates_and_reserializes() {
        let mut slot = Slot::empty();
        slot.init(b"foo:");
        slot.accepts_type(MetricType::Counter);
        slot.add_counter(1.0).unwrap();
        slot.add_counter(2.0).unwrap();
        slot.add_counter(3.0).unwrap();
        assert_eq!(slot.payload(), b"foo:6|c\n");
    }

    #[test]
    fn other_segments_concatenate_with_colon_separators() {
        let mut slot = Slot::empty();
        slot.init(b"t:");
        slot.accepts_type(MetricType::Other);
        slot.append_other(b"200|ms").unwrap();
        slot.append_other(b"250|ms").unwrap();
        assert_eq!(slot.payload(), b"t:200|ms:250|ms:");
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut slot = Slot::empty();
        slot.init(b"baz:");
        assert!(slot.accepts_type(MetricType::Counter));
        assert!(!slot.accepts_type(MetricType::Other));
    }
}
