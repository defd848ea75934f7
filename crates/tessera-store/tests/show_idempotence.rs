//! Applying the same snapshot twice leaves the store as applying it once.

use std::sync::Arc;

use proptest::prelude::*;
use tessera_store::{DetailsCache, DocumentState};
use tessera_types::{Block, BlockId, ContextId, EventMessage};

/// A random tree: block `i > 0` hangs under a block with a smaller index.
fn arb_snapshot() -> impl Strategy<Value = Vec<Block>> {
    (1usize..40)
        .prop_flat_map(|n| {
            (
                proptest::collection::vec(any::<prop::sample::Index>(), n),
                proptest::collection::vec("[a-z ]{0,12}", n),
            )
        })
        .prop_map(|(parents, texts)| {
            let mut children: Vec<Vec<String>> = vec![Vec::new(); parents.len() + 1];
            for (i, parent) in parents.iter().enumerate() {
                let child = i + 1;
                children[parent.index(child)].push(format!("b{child}"));
            }
            let mut blocks = vec![Block::smartblock("b0").with_children(children[0].clone())];
            for (i, text) in texts.into_iter().enumerate() {
                let idx = i + 1;
                blocks.push(Block::text(format!("b{idx}"), text).with_children(children[idx].clone()));
            }
            blocks
        })
}

fn show(blocks: Vec<Block>) -> EventMessage {
    EventMessage::BlockShow {
        root_id: BlockId::new("b0"),
        blocks,
        details: vec![],
        relation_links: vec![],
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn show_twice_equals_show_once(blocks in arb_snapshot()) {
        let details = Arc::new(DetailsCache::default());

        let mut once = DocumentState::new(ContextId::new("b0"), Arc::clone(&details));
        once.apply_batch(&[show(blocks.clone())]);

        let mut twice = DocumentState::new(ContextId::new("b0"), details);
        twice.apply_batch(&[show(blocks.clone())]);
        let out = twice.apply_batch(&[show(blocks.clone())]);

        prop_assert!(out.is_clean());
        prop_assert_eq!(once.blocks().snapshot(), twice.blocks().snapshot());
        prop_assert_eq!(once.index(), twice.index());
        prop_assert_eq!(twice.blocks().len(), blocks.len());
    }

    #[test]
    fn show_reaches_every_block(blocks in arb_snapshot()) {
        let mut doc = DocumentState::new(ContextId::new("b0"), Arc::new(DetailsCache::default()));
        let out = doc.apply_batch(&[show(blocks.clone())]);
        prop_assert!(out.skipped.is_empty());
        prop_assert_eq!(doc.index().len(), blocks.len());
    }
}
