//! Hot-path (inverted call) tree analyzer.
//!
//! Builds a tree rooted at "all samples", whose direct children are the
//! sampled (leaf) symbols, descending from there through each sample's
//! call chain toward its outermost caller: the same shape as a sampling
//! profiler's "callers" / bottom-up view. Nodes are keyed by `Rc` pointer
//! identity.

use crate::pipeline::Analyzer;
use crate::symbol::{Sample, SymbolIdentity};
use rustc_hash::FxHashMap;
use std::rc::Rc;

pub struct HotPathNode {
    pub count: u64,
    children: FxHashMap<usize, (Rc<SymbolIdentity>, HotPathNode)>,
}

impl HotPathNode {
    fn new() -> Self {
        HotPathNode {
            count: 0,
            children: FxHashMap::default(),
        }
    }

    fn child_mut(&mut self, symbol: &Rc<SymbolIdentity>) -> &mut HotPathNode {
        let key = Rc::as_ptr(symbol) as usize;
        &mut self
            .children
            .entry(key)
            .or_insert_with(|| (Rc::clone(symbol), HotPathNode::new()))
            .1
    }

    pub fn child(&self, symbol: &Rc<SymbolIdentity>) -> Option<&HotPathNode> {
        self.children.get(&(Rc::as_ptr(symbol) as usize)).map(|(_, node)| node)
    }

    pub fn children(&self) -> impl Iterator<Item = (&Rc<SymbolIdentity>, &HotPathNode)> {
        self.children.values().map(|(symbol, node)| (symbol, node))
    }
}

pub struct HotPathAnalyzer {
    root: HotPathNode,
    total_sample_count: u64,
}

impl HotPathAnalyzer {
    pub fn new() -> Self {
        HotPathAnalyzer {
            root: HotPathNode::new(),
            total_sample_count: 0,
        }
    }

    pub fn get_result(&self) -> (&HotPathNode, u64) {
        (&self.root, self.total_sample_count)
    }
}

impl Default for HotPathAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for HotPathAnalyzer {
    /// A sample with no resolved primary symbol is dropped entirely (it
    /// contributes no node anywhere and does not count toward the root).
    /// Otherwise the root count and the leaf-symbol child are incremented,
    /// then the call chain is folded in ascending index order (nearest
    /// caller first, outermost last), skipping unresolved entries without
    /// breaking the fold.
    fn feed(&mut self, batch: &[Sample]) {
        for sample in batch {
            let leaf = match &sample.symbol {
                Some(symbol) => symbol,
                None => continue,
            };
            self.total_sample_count += 1;
            self.root.count += 1;

            let mut current = self.root.child_mut(leaf);
            current.count += 1;

            for entry in &sample.call_chain_symbols {
                if let Some(symbol) = entry {
                    current = current.child_mut(symbol);
                    current.count += 1;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.root = HotPathNode::new();
        self.total_sample_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str) -> Rc<SymbolIdentity> {
        Rc::new(SymbolIdentity::new(name.to_string(), None, Rc::from("/bin/a"), 0, 10))
    }

    fn sample_with(leaf: Rc<SymbolIdentity>, chain: Vec<Option<Rc<SymbolIdentity>>>) -> Sample {
        let mut s = Sample::new();
        s.symbol = Some(leaf);
        s.call_chain_ips = vec![0; chain.len()];
        s.call_chain_symbols = chain;
        s
    }

    #[test]
    fn scenario_5_two_identical_samples() {
        let a = symbol("A");
        let b = symbol("B");
        let c = symbol("C");
        let mut analyzer = HotPathAnalyzer::new();
        let batch = vec![
            sample_with(Rc::clone(&c), vec![Some(Rc::clone(&b)), Some(Rc::clone(&a))]),
            sample_with(Rc::clone(&c), vec![Some(Rc::clone(&b)), Some(Rc::clone(&a))]),
        ];
        analyzer.feed(&batch);
        let (root, total) = analyzer.get_result();
        assert_eq!(total, 2);
        assert_eq!(root.count, 2);
        let node_c = root.child(&c).unwrap();
        assert_eq!(node_c.count, 2);
        let node_c_b = node_c.child(&b).unwrap();
        assert_eq!(node_c_b.count, 2);
        let node_c_b_a = node_c_b.child(&a).unwrap();
        assert_eq!(node_c_b_a.count, 2);
    }

    #[test]
    fn scenario_6_third_sample_with_outermost_unresolved() {
        let a = symbol("A");
        let b = symbol("B");
        let c = symbol("C");
        let mut analyzer = HotPathAnalyzer::new();
        let batch = vec![
            sample_with(Rc::clone(&c), vec![Some(Rc::clone(&b)), Some(Rc::clone(&a))]),
            sample_with(Rc::clone(&c), vec![Some(Rc::clone(&b)), Some(Rc::clone(&a))]),
            sample_with(Rc::clone(&c), vec![Some(Rc::clone(&b)), None]),
        ];
        analyzer.feed(&batch);
        let (root, total) = analyzer.get_result();
        assert_eq!(total, 3);
        assert_eq!(root.count, 3);
        let node_c_b = root.child(&c).unwrap().child(&b).unwrap();
        assert_eq!(node_c_b.count, 3);
        let node_c_b_a = node_c_b.child(&a).unwrap();
        assert_eq!(node_c_b_a.count, 2);
    }

    #[test]
    fn sample_with_unresolved_primary_is_dropped() {
        let mut analyzer = HotPathAnalyzer::new();
        let batch = vec![Sample::new()];
        analyzer.feed(&batch);
        let (root, total) = analyzer.get_result();
        assert_eq!(total, 0);
        assert_eq!(root.count, 0);
    }

    #[test]
    fn reset_clears_the_tree() {
        let mut analyzer = HotPathAnalyzer::new();
        analyzer.feed(&[sample_with(symbol("X"), vec![])]);
        analyzer.reset();
        let (root, total) = analyzer.get_result();
        assert_eq!(total, 0);
        assert_eq!(root.count, 0);
    }
}
