//! A bitwise trie over 64-bit perceptual hashes supporting range queries
//! under the Hamming metric.
//!
//! Keys descend from the most significant bit. A range search walks both
//! children of every branch, charging one unit of distance for the child that
//! disagrees with the query bit and pruning as soon as the accumulated
//! distance exceeds the radius.

use crate::hashing::hamming::{Distance, Hamming};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriePoint {
    pub id: i64,
    pub hash: Hamming,
}

#[derive(Default)]
pub struct HammingTrie {
    root: Option<Node>,
    len: usize,
}

enum Node {
    Branch([Option<Box<Node>>; 2]),
    Leaf { hash: Hamming, ids: Vec<i64> },
}

const DEPTH: u32 = Hamming::BITS;

fn bit_at(hash: Hamming, depth: u32) -> usize {
    ((hash.0 >> (DEPTH - 1 - depth)) & 1) as usize
}

impl HammingTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, point: TriePoint) {
        let mut node = self
            .root
            .get_or_insert_with(|| Node::Branch([None, None]));

        for depth in 0..DEPTH {
            let branch = match node {
                Node::Branch(children) => children,
                Node::Leaf { .. } => unreachable!("leaves only exist at full depth"),
            };

            let bit = bit_at(point.hash, depth);
            let child = branch[bit].get_or_insert_with(|| {
                if depth + 1 == DEPTH {
                    Box::new(Node::Leaf {
                        hash: point.hash,
                        ids: Vec::new(),
                    })
                } else {
                    Box::new(Node::Branch([None, None]))
                }
            });
            node = &mut **child;
        }

        match node {
            Node::Leaf { ids, .. } => ids.push(point.id),
            Node::Branch(_) => unreachable!("full-depth nodes are leaves"),
        }
        self.len += 1;
    }

    /// All stored points within Hamming distance `radius` of `hash`. For a
    /// fixed set of insertions the returned multiset is the same on every
    /// call.
    pub fn range_search(&self, hash: Hamming, radius: Distance) -> Vec<TriePoint> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            search(root, hash, radius, 0, 0, &mut out);
        }
        out
    }
}

fn search(
    node: &Node,
    query: Hamming,
    radius: Distance,
    depth: u32,
    spent: Distance,
    out: &mut Vec<TriePoint>,
) {
    match node {
        Node::Leaf { hash, ids } => {
            out.extend(ids.iter().map(|&id| TriePoint { id, hash: *hash }));
        }
        Node::Branch(children) => {
            let bit = bit_at(query, depth);
            if let Some(same) = &children[bit] {
                search(same, query, radius, depth + 1, spent, out);
            }
            if spent < radius {
                if let Some(other) = &children[1 - bit] {
                    search(other, query, radius, depth + 1, spent + 1, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn brute_force(
        points: &[TriePoint],
        query: Hamming,
        radius: Distance,
    ) -> Vec<TriePoint> {
        points
            .iter()
            .copied()
            .filter(|p| p.hash.distance_to(query) <= radius)
            .collect()
    }

    fn sorted(mut points: Vec<TriePoint>) -> Vec<(i64, u64)> {
        points.sort_by_key(|p| (p.hash.0, p.id));
        points.into_iter().map(|p| (p.id, p.hash.0)).collect()
    }

    #[test]
    fn empty_trie() {
        let trie = HammingTrie::new();
        assert!(trie.is_empty());
        assert!(trie.range_search(Hamming(42), 64).is_empty());
    }

    #[test]
    fn exact_lookup() {
        let mut trie = HammingTrie::new();
        trie.insert(TriePoint {
            id: 1,
            hash: Hamming(0xabcd),
        });
        trie.insert(TriePoint {
            id: 2,
            hash: Hamming(0xabce),
        });

        let hits = trie.range_search(Hamming(0xabcd), 0);
        assert_eq!(1, hits.len());
        assert_eq!(1, hits[0].id);
    }

    #[test]
    fn duplicate_points_are_a_multiset() {
        let mut trie = HammingTrie::new();
        for _ in 0..3 {
            trie.insert(TriePoint {
                id: 7,
                hash: Hamming(123),
            });
        }
        trie.insert(TriePoint {
            id: 8,
            hash: Hamming(123),
        });

        assert_eq!(4, trie.len());
        let hits = trie.range_search(Hamming(123), 0);
        assert_eq!(4, hits.len());
        assert_eq!(3, hits.iter().filter(|p| p.id == 7).count());
    }

    #[test]
    fn radius_counts_differing_bits() {
        let mut trie = HammingTrie::new();
        trie.insert(TriePoint {
            id: 1,
            hash: Hamming(0b0000),
        });
        trie.insert(TriePoint {
            id: 2,
            hash: Hamming(0b0111),
        });

        assert_eq!(1, trie.range_search(Hamming(0b0000), 2).len());
        assert_eq!(2, trie.range_search(Hamming(0b0000), 3).len());
        assert_eq!(2, trie.range_search(Hamming(0b0011), 4).len());
    }

    #[test]
    fn agrees_with_brute_force() {
        let mut rng = SmallRng::seed_from_u64(0xdeadbeef);

        let points: Vec<TriePoint> = (0..500)
            .map(|i| TriePoint {
                id: i % 50,
                hash: Hamming(rng.gen()),
            })
            .collect();

        let mut trie = HammingTrie::new();
        for p in &points {
            trie.insert(*p);
        }
        assert_eq!(points.len(), trie.len());

        for _ in 0..50 {
            // near an existing point, so small radii actually hit something
            let mut query = points[rng.gen_range(0..points.len())].hash.0;
            for _ in 0..rng.gen_range(0..6) {
                query ^= 1 << rng.gen_range(0..64);
            }
            let query = Hamming(query);

            for radius in [0, 1, 4, 10, 64] {
                assert_eq!(
                    sorted(brute_force(&points, query, radius)),
                    sorted(trie.range_search(query, radius)),
                    "query {query} radius {radius}"
                );
            }
        }
    }

    #[test]
    fn deterministic_result_order() {
        let mut rng = SmallRng::seed_from_u64(99);
        let points: Vec<TriePoint> = (0..200)
            .map(|i| TriePoint {
                id: i,
                hash: Hamming(rng.gen::<u64>() & 0xff),
            })
            .collect();

        let mut trie = HammingTrie::new();
        for p in &points {
            trie.insert(*p);
        }

        let a = trie.range_search(Hamming(0x0f), 4);
        let b = trie.range_search(Hamming(0x0f), 4);
        assert_eq!(a, b);
    }
}
