//! The duplicate engine: indexes every stored hash in a Hamming trie, counts
//! per-video near matches for each query video, and glues the resulting edges
//! into groups with union-find.

use std::collections::{HashMap, HashSet};

use neardup_common::search::trie::{HammingTrie, TriePoint};
use neardup_common::search::unionfind::UnionFind;
use neardup_common::utils::math::ceil_percent_of;

use crate::settings::SearchSettings;
use crate::video_info::{HashGroup, VideoInfo};

/// Partitions the videos into groups of perceptual duplicates. Two videos end
/// up in the same group when a chain of pairwise matches connects them; only
/// groups with at least two members are returned.
pub fn find_duplicates(
    videos: &[VideoInfo],
    hash_groups: &[HashGroup],
    settings: &SearchSettings,
) -> Vec<Vec<VideoInfo>> {
    let mut trie = HammingTrie::new();
    for group in hash_groups {
        for hash in &group.hashes {
            trie.insert(TriePoint {
                id: group.video_id,
                hash: *hash,
            });
        }
    }
    log::debug!(
        "Indexed {} hashes of {} videos",
        trie.len(),
        hash_groups.len()
    );

    let index_of: HashMap<i64, usize> = videos
        .iter()
        .enumerate()
        .map(|(index, v)| (v.id, index))
        .collect();

    let mut uf = UnionFind::new(videos.len());
    for group in hash_groups {
        let Some(&query_index) = index_of.get(&group.video_id) else {
            log::warn!("Hashes of unknown video id {}", group.video_id);
            continue;
        };

        let mut matches: HashMap<i64, usize> = HashMap::new();
        for hash in &group.hashes {
            for hit in trie.range_search(*hash, settings.hamming_threshold) {
                *matches.entry(hit.id).or_insert(0) += 1;
            }
        }

        let threshold = if settings.use_percent_threshold {
            ceil_percent_of(settings.matching_threshold_percent, group.hashes.len())
        } else {
            settings.matching_threshold_number as usize
        };

        let likely: HashSet<i64> = matches
            .into_iter()
            .filter(|&(id, count)| id != group.video_id && count >= threshold)
            .map(|(id, _)| id)
            .collect();

        for id in likely {
            if let Some(&other_index) = index_of.get(&id) {
                uf.unite(query_index, other_index);
            }
        }
    }

    uf.groups()
        .into_iter()
        .filter(|members| members.len() >= 2)
        .map(|members| {
            members
                .into_iter()
                .map(|index| videos[index].clone())
                .collect()
        })
        .collect()
}
