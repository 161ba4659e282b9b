use std::{fmt, ops};

/// The virtual resources bounded by the prover's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CounterKind {
    Steps,
    Arith,
    Binary,
    MemAlign,
    Keccak,
    PoseidonHashes,
    PoseidonPaddings,
    Sha256,
}

impl CounterKind {
    pub const ALL: [CounterKind; 8] = [
        CounterKind::Steps,
        CounterKind::Arith,
        CounterKind::Binary,
        CounterKind::MemAlign,
        CounterKind::Keccak,
        CounterKind::PoseidonHashes,
        CounterKind::PoseidonPaddings,
        CounterKind::Sha256,
    ];

    /// The one-letter names the prover reports counters under.
    pub fn short_name(self) -> &'static str {
        match self {
            CounterKind::Steps => "S",
            CounterKind::Arith => "A",
            CounterKind::Binary => "B",
            CounterKind::MemAlign => "M",
            CounterKind::Keccak => "K",
            CounterKind::PoseidonHashes => "P",
            CounterKind::PoseidonPaddings => "D",
            CounterKind::Sha256 => "SHA",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A used-vector over every counter kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters([u64; 8]);

impl Counters {
    pub fn get(&self, kind: CounterKind) -> u64 {
        self.0[kind as usize]
    }

    pub fn add(&mut self, kind: CounterKind, amount: u64) {
        self.0[kind as usize] = self.0[kind as usize].saturating_add(amount);
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|used| *used == 0)
    }

    /// Kinds where `self` exceeds `limits`.
    pub fn exceeding(&self, limits: &Counters) -> Vec<CounterKind> {
        CounterKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind) > limits.get(*kind))
            .collect()
    }
}

impl ops::AddAssign<&Counters> for Counters {
    fn add_assign(&mut self, other: &Counters) {
        for kind in CounterKind::ALL {
            self.add(kind, other.get(kind));
        }
    }
}

impl FromIterator<(CounterKind, u64)> for Counters {
    fn from_iter<I: IntoIterator<Item = (CounterKind, u64)>>(iter: I) -> Self {
        let mut counters = Counters::default();
        for (kind, amount) in iter {
            counters.add(kind, amount);
        }
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_is_per_kind() {
        let mut used = Counters::default();
        used.add(CounterKind::Steps, 10);
        let mut other = Counters::default();
        other.add(CounterKind::Steps, 5);
        other.add(CounterKind::Keccak, 2);
        used += &other;
        assert_eq!(used.get(CounterKind::Steps), 15);
        assert_eq!(used.get(CounterKind::Keccak), 2);
        assert_eq!(used.get(CounterKind::Arith), 0);
    }

    #[test]
    fn exceeding_reports_offenders() {
        let limits: Counters = [(CounterKind::Steps, 10u64), (CounterKind::Keccak, 1)]
            .into_iter()
            .collect();
        let used: Counters = [(CounterKind::Steps, 11u64), (CounterKind::Keccak, 1)]
            .into_iter()
            .collect();
        assert_eq!(used.exceeding(&limits), vec![CounterKind::Steps]);
    }
}
