//! Inclusive/exclusive frequency analyzer: accumulates per-symbol sample
//! counts keyed by `Rc` pointer identity and reports the top N by each
//! count.

use crate::pipeline::Analyzer;
use crate::symbol::{Sample, SymbolIdentity};
use rustc_hash::FxHashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct FrequencyResult {
    pub top_inclusive: Vec<(Rc<SymbolIdentity>, u64)>,
    pub top_exclusive: Vec<(Rc<SymbolIdentity>, u64)>,
    pub total_inclusive: u64,
    pub total_exclusive: u64,
}

struct Counts {
    symbol: Rc<SymbolIdentity>,
    inclusive: u64,
    exclusive: u64,
}

pub struct FrequencyAnalyzer {
    inclusive_depth: usize,
    counts: FxHashMap<usize, Counts>,
    total_inclusive: u64,
    total_exclusive: u64,
}

fn tiebreak_key(symbol: &Rc<SymbolIdentity>) -> usize {
    Rc::as_ptr(symbol) as usize
}

/// Selects the top `n` entries by descending count, breaking ties by a
/// stable (per-run) pointer-identity order, without fully sorting the tail.
fn top_n(mut entries: Vec<(Rc<SymbolIdentity>, u64)>, n: usize) -> Vec<(Rc<SymbolIdentity>, u64)> {
    let cmp = |a: &(Rc<SymbolIdentity>, u64), b: &(Rc<SymbolIdentity>, u64)| {
        b.1.cmp(&a.1).then_with(|| tiebreak_key(&a.0).cmp(&tiebreak_key(&b.0)))
    };
    let n = n.min(entries.len());
    if n == 0 {
        return Vec::new();
    }
    if n < entries.len() {
        entries.select_nth_unstable_by(n - 1, cmp);
        entries.truncate(n);
    }
    entries.sort_by(cmp);
    entries
}

impl FrequencyAnalyzer {
    pub fn new(inclusive_depth: usize) -> Self {
        FrequencyAnalyzer {
            inclusive_depth,
            counts: FxHashMap::default(),
            total_inclusive: 0,
            total_exclusive: 0,
        }
    }

    fn bump(&mut self, symbol: &Rc<SymbolIdentity>, exclusive: bool, inclusive: bool) {
        let key = tiebreak_key(symbol);
        let entry = self.counts.entry(key).or_insert_with(|| Counts {
            symbol: Rc::clone(symbol),
            inclusive: 0,
            exclusive: 0,
        });
        if exclusive {
            entry.exclusive += 1;
        }
        if inclusive {
            entry.inclusive += 1;
        }
    }

    pub fn get_result(&self, top_inclusive: usize, top_exclusive: usize) -> FrequencyResult {
        let by_inclusive: Vec<(Rc<SymbolIdentity>, u64)> = self
            .counts
            .values()
            .map(|c| (Rc::clone(&c.symbol), c.inclusive))
            .collect();
        let by_exclusive: Vec<(Rc<SymbolIdentity>, u64)> = self
            .counts
            .values()
            .map(|c| (Rc::clone(&c.symbol), c.exclusive))
            .collect();
        FrequencyResult {
            top_inclusive: top_n(by_inclusive, top_inclusive),
            top_exclusive: top_n(by_exclusive, top_exclusive),
            total_inclusive: self.total_inclusive,
            total_exclusive: self.total_exclusive,
        }
    }
}

impl Analyzer for FrequencyAnalyzer {
    /// A sample's primary symbol gets +1 exclusive and +1 inclusive; each
    /// of the first `inclusive_depth` call-chain entries gets +1 inclusive.
    /// An unresolved symbol at either position still contributes to the
    /// running totals, just not to the per-symbol map.
    fn feed(&mut self, batch: &[Sample]) {
        for sample in batch {
            self.total_exclusive += 1;
            self.total_inclusive += 1;
            if let Some(symbol) = &sample.symbol {
                self.bump(symbol, true, true);
            }

            let depth = self.inclusive_depth.min(sample.call_chain_symbols.len());
            for entry in &sample.call_chain_symbols[..depth] {
                self.total_inclusive += 1;
                if let Some(symbol) = entry {
                    self.bump(symbol, false, true);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.counts.clear();
        self.total_inclusive = 0;
        self.total_exclusive = 0;
    }
}
