//! Per-chunk BVH construction over Morton-sorted particles.
//!
//! Each chunk gets a binary radix tree: nodes are split at the first
//! Morton bit (from the MSB) that flips within their particle range,
//! found by binary search in the sorted codes. The tree is grown one
//! level at a time, nodes stored in level order, then a bottom-up pass
//! fills the internal nodes' AABBs from their children.

use rayon::prelude::*;

use perigee_types::{PerigeeError, PerigeeResult};

use crate::aabb::AabbArrays;

const DEFAULT_LB: [f32; 4] = [f32::INFINITY; 4];
const DEFAULT_UB: [f32; 4] = [f32::NEG_INFINITY; 4];

const OVERFLOW_MSG: &str = "Overflow detected during the construction of a BVH tree";

/// One node of a per-chunk BVH, stored in level order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    /// First particle of the node's half-open range into the sorted
    /// arrays.
    pub begin: u32,
    /// One past the last particle of the range.
    pub end: u32,
    /// Left child index; -1 marks a leaf.
    pub left: i32,
    /// Right child index; -1 marks a leaf.
    pub right: i32,
    /// Parent index; -1 only for the root.
    pub parent: i32,
    /// Node AABB lower bounds (x, y, z, r).
    pub lb: [f32; 4],
    /// Node AABB upper bounds.
    pub ub: [f32; 4],
    /// Number of nodes at this node's tree level.
    pub nn_level: u32,
    /// Morton bit index (from the MSB) at which this node was split.
    /// The root starts at 0; a value above 63 marks a leaf created
    /// from duplicate codes.
    pub split_idx: u32,
}

/// Per-chunk BVH storage plus construction scratch buffers, reused
/// across supersteps.
#[derive(Debug, Default)]
pub struct BvhTree {
    /// Nodes in level (breadth-first) order.
    pub nodes: Vec<BvhNode>,
    /// Children count per node of the current level (0 or 2).
    nc_buf: Vec<u32>,
    /// Inclusive prefix sum of `nc_buf`.
    ps_buf: Vec<u32>,
    /// Particle count of the left child, per internal node.
    nplc_buf: Vec<u32>,
}

/// Builds one BVH per chunk over the sorted AABB and Morton arrays.
pub fn build_bvh_trees(
    trees: &mut [BvhTree],
    srt_aabbs: &AabbArrays,
    srt_mcodes: &[u64],
    nparts: usize,
) -> PerigeeResult<()> {
    let nparts_u32 =
        u32::try_from(nparts).map_err(|_| PerigeeError::Overflow(OVERFLOW_MSG.into()))?;

    trees
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(chunk_idx, tree)| {
            let base = chunk_idx * nparts;
            build_chunk_tree(
                tree,
                chunk_idx,
                &srt_aabbs.lb[base..base + nparts],
                &srt_aabbs.ub[base..base + nparts],
                &srt_mcodes[base..base + nparts],
                nparts_u32,
            )
        })
}

/// Classifies one node, returning 1 for a leaf and 0 for an internal
/// node. Internal nodes get their split bit and left-child size
/// recorded; leaves get their AABB computed from the sorted arrays.
fn classify_node(
    node: &mut BvhNode,
    nc: &mut u32,
    nplc: &mut u32,
    srt_lb: &[[f32; 4]],
    srt_ub: &[[f32; 4]],
    srt_mcodes: &[u64],
) -> u32 {
    let begin = node.begin as usize;
    let end = node.end as usize;
    let codes = &srt_mcodes[begin..end];

    let mut is_leaf_node = false;
    let mut split_pos = 0usize;

    if end - begin > 1 {
        // Find where the bit at split_idx (counted from the MSB) flips
        // from 0 to 1 within the node's sorted codes. All-zero or
        // all-one means no flip at this bit: descend to the next bit
        // index and retry, until the index saturates past the last bit.
        loop {
            if node.split_idx > 63 {
                // No bit indices left: every code in the range is
                // identical and the node is a leaf with more than one
                // particle. A split_idx above 63 can also be inherited
                // from a parent split at the least significant bit.
                is_leaf_node = true;
                break;
            }
            let mask = 1u64 << (63 - node.split_idx);
            split_pos = codes.partition_point(|&c| c & mask == 0);
            if split_pos != 0 && split_pos != codes.len() {
                break;
            }
            node.split_idx += 1;
        }
    } else {
        // A single particle cannot split further.
        is_leaf_node = true;
    }

    if is_leaf_node {
        *nc = 0;
        *nplc = 0;

        debug_assert_eq!(node.lb, DEFAULT_LB);
        debug_assert_eq!(node.ub, DEFAULT_UB);

        for pidx in begin..end {
            for d in 0..4 {
                node.lb[d] = node.lb[d].min(srt_lb[pidx][d]);
                node.ub[d] = node.ub[d].max(srt_ub[pidx][d]);
            }
        }

        1
    } else {
        *nc = 2;
        *nplc = split_pos as u32;
        0
    }
}

/// Parallel inclusive prefix sum (two-pass chunked scan).
fn inclusive_scan(input: &[u32], out: &mut [u32]) {
    const BLOCK: usize = 4096;

    if input.len() <= BLOCK {
        let mut sum = 0u32;
        for (o, &v) in out.iter_mut().zip(input) {
            sum += v;
            *o = sum;
        }
        return;
    }

    let block_sums: Vec<u32> = input.par_chunks(BLOCK).map(|c| c.iter().sum()).collect();

    let mut offsets = Vec::with_capacity(block_sums.len());
    let mut total = 0u32;
    for s in &block_sums {
        offsets.push(total);
        total += s;
    }

    out.par_chunks_mut(BLOCK)
        .zip(input.par_chunks(BLOCK))
        .zip(offsets.par_iter())
        .for_each(|((oc, ic), &off)| {
            let mut sum = off;
            for (o, &v) in oc.iter_mut().zip(ic) {
                sum += v;
                *o = sum;
            }
        });
}

fn build_chunk_tree(
    tree: &mut BvhTree,
    chunk_idx: usize,
    srt_lb: &[[f32; 4]],
    srt_ub: &[[f32; 4]],
    srt_mcodes: &[u64],
    nparts: u32,
) -> PerigeeResult<()> {
    tree.nodes.clear();
    tree.nc_buf.clear();
    tree.ps_buf.clear();
    tree.nplc_buf.clear();

    if nparts == 0 {
        return Ok(());
    }

    // Insert the root node. nn_level starts at zero even though it is
    // known to be 1; the level loop fills it like any other node's.
    tree.nodes.push(BvhNode {
        begin: 0,
        end: nparts,
        left: -1,
        right: -1,
        parent: -1,
        lb: DEFAULT_LB,
        ub: DEFAULT_UB,
        nn_level: 0,
        split_idx: 0,
    });

    // Number of nodes at the current tree level.
    let mut cur_n_nodes: u32 = 1;

    let mut n_levels: u32 = 0;

    while cur_n_nodes != 0 {
        let cur_tree_size = tree.nodes.len();

        // The node index range of the current level.
        let n_begin = cur_tree_size - cur_n_nodes as usize;

        // Maximum possible number of nodes at the next level.
        if cur_n_nodes > u32::MAX / 2 {
            return Err(PerigeeError::Overflow(OVERFLOW_MSG.into()));
        }
        let mut nn_next_level = cur_n_nodes * 2;

        tree.nc_buf.resize(cur_n_nodes as usize, 0);
        tree.ps_buf.resize(cur_n_nodes as usize, 0);
        tree.nplc_buf.resize(cur_n_nodes as usize, 0);

        // Step 1: determine, for each node in the range, whether it is
        // a leaf, and for internal nodes the particle count of the left
        // child. Leaf count accumulates via the parallel reduce.
        let n_leaf_nodes: u32 = tree.nodes[n_begin..]
            .par_iter_mut()
            .zip(tree.nc_buf.par_iter_mut())
            .zip(tree.nplc_buf.par_iter_mut())
            .map(|((node, nc), nplc)| classify_node(node, nc, nplc, srt_lb, srt_ub, srt_mcodes))
            .sum();

        debug_assert!(n_leaf_nodes * 2 <= nn_next_level);
        nn_next_level -= n_leaf_nodes * 2;

        // Overflow checks before the tree grows: the new size must be
        // addressable by the i32 child indices.
        let new_tree_size = cur_tree_size
            .checked_add(nn_next_level as usize)
            .ok_or_else(|| PerigeeError::Overflow(OVERFLOW_MSG.into()))?;
        if new_tree_size > i32::MAX as usize {
            return Err(PerigeeError::Overflow(OVERFLOW_MSG.into()));
        }

        // Step 2: prefix sum over the children counts assigns each
        // internal node its pair of child slots.
        inclusive_scan(&tree.nc_buf, &mut tree.ps_buf);

        // Step 3: finalise the nodes in the range with nn_level and the
        // children indices.
        let nc_buf = &tree.nc_buf;
        let ps_buf = &tree.ps_buf;
        let nplc_buf = &tree.nplc_buf;

        tree.nodes[n_begin..]
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, node)| {
                node.nn_level = cur_n_nodes;

                if nc_buf[i] != 0 {
                    let lc_idx = cur_tree_size + ps_buf[i] as usize - 2;
                    node.left = lc_idx as i32;
                    node.right = (lc_idx + 1) as i32;
                }
            });

        // Step 4: materialise the next level. Children are produced
        // fully initialised, in child-offset order (the order the
        // prefix sum assigned), and appended in one shot.
        let children: Vec<BvhNode> = tree.nodes[n_begin..]
            .par_iter()
            .enumerate()
            .filter(|(i, _)| nc_buf[*i] != 0)
            .flat_map_iter(|(i, node)| {
                let lsize = nplc_buf[i];
                let parent = (n_begin + i) as i32;

                let template = BvhNode {
                    begin: node.begin,
                    end: node.begin + lsize,
                    left: -1,
                    right: -1,
                    parent,
                    lb: DEFAULT_LB,
                    ub: DEFAULT_UB,
                    nn_level: 0,
                    split_idx: node.split_idx + 1,
                };
                let rc = BvhNode {
                    begin: node.begin + lsize,
                    end: node.end,
                    ..template
                };

                [template, rc]
            })
            .collect();

        debug_assert_eq!(children.len(), nn_next_level as usize);
        tree.nodes.extend(children);

        // If nn_next_level is zero every node in this iteration was a
        // leaf, which ends the construction.
        cur_n_nodes = nn_next_level;
        n_levels += 1;
    }

    backward_aabb_pass(&mut tree.nodes);

    tracing::debug!(
        "tree levels/nodes for chunk {}: {}/{}",
        chunk_idx,
        n_levels,
        tree.nodes.len()
    );

    Ok(())
}

/// Bottom-up pass filling the internal nodes' AABBs from their
/// children. Leaf AABBs were computed during classification.
fn backward_aabb_pass(nodes: &mut [BvhNode]) {
    // Node index range of the last level, which consists of leaves
    // only.
    let last_nn = nodes[nodes.len() - 1].nn_level as usize;
    let mut n_begin = nodes.len() - last_nn;

    if n_begin == 0 {
        // The tree is just the root, itself a leaf.
        debug_assert_eq!(nodes.len(), 1);
        return;
    }

    loop {
        // Range of the previous level.
        let n_end = n_begin;
        n_begin -= nodes[n_begin - 1].nn_level as usize;

        // Children of this level's nodes all live at indices >= n_end.
        let (head, tail) = nodes.split_at_mut(n_end);
        head[n_begin..].par_iter_mut().for_each(|node| {
            if node.left != -1 {
                let lc = &tail[node.left as usize - n_end];
                let rc = &tail[node.right as usize - n_end];

                for d in 0..4 {
                    node.lb[d] = lc.lb[d].min(rc.lb[d]);
                    node.ub[d] = lc.ub[d].max(rc.ub[d]);
                }
            }
        });

        if n_begin == 0 {
            debug_assert_eq!(n_end, 1);
            break;
        }
    }
}
