use std::collections::BTreeSet;

use image::RgbaImage;
use proptest::prelude::*;
use sheetq_engine::ImageCache;
use sheetq_model::DecodedImage;

#[derive(Debug, Clone)]
enum Op {
    Add(u8),
    Get(u8),
    Sweep,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..24).prop_map(Op::Add),
        3 => (0u8..24).prop_map(Op::Get),
        1 => Just(Op::Sweep),
    ]
}

/// Reference model: keys ordered from least to most recently used.
struct Model {
    order: Vec<u8>,
    capacity: usize,
}

impl Model {
    fn touch(&mut self, key: u8) {
        self.order.retain(|k| *k != key);
        self.order.push(key);
    }

    fn trim(&mut self) {
        if self.order.len() > self.capacity {
            let excess = self.order.len() - self.capacity;
            self.order.drain(..excess);
        }
    }

    fn keys(&self) -> BTreeSet<u8> {
        self.order.iter().copied().collect()
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0),
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn cache_matches_an_lru_model(
        capacity in 1usize..10,
        ops in proptest::collection::vec(op(), 0..200),
    ) {
        let cache = ImageCache::new(capacity);
        let mut model = Model { order: Vec::new(), capacity };
        let mut handed_out = Vec::new();

        for op in ops {
            match op {
                Op::Add(key) => {
                    let image = DecodedImage::new(RgbaImage::new(1, 1));
                    handed_out.push(image.clone());
                    cache.add(format!("S_{key}_1"), image);
                    model.touch(key);
                    if model.order.len() * 5 > capacity * 6 {
                        model.trim();
                    }
                }
                Op::Get(key) => {
                    let hit = cache.try_get(&format!("S_{key}_1")).is_some();
                    prop_assert_eq!(hit, model.order.contains(&key));
                    if hit {
                        model.touch(key);
                    }
                }
                Op::Sweep => {
                    cache.sweep();
                    model.trim();
                    prop_assert!(cache.len() <= capacity);
                }
            }

            prop_assert!(cache.len() * 5 <= capacity * 6, "overshoot bounded by 1.2x");
            let cached: BTreeSet<u8> = (0u8..24)
                .filter(|k| cache.contains(&format!("S_{k}_1")))
                .collect();
            prop_assert_eq!(cached, model.keys());
        }

        cache.dispose();
        prop_assert!(handed_out.iter().all(|image| image.handle_count() == 1));
        let stats = cache.stats();
        prop_assert_eq!(stats.disposed, stats.inserts);
    }
}
