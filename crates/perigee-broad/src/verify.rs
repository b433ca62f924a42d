//! BVH invariant verification.
//!
//! Walks each chunk's tree and checks every structural invariant:
//! range partitioning, child/parent consistency, split correctness
//! against the sorted Morton codes, and AABB envelopes. Violations are
//! returned as errors rather than asserted, so tests can exercise the
//! checks in any build profile; the pipeline runs this in debug builds
//! only.

use rayon::prelude::*;

use perigee_types::{PerigeeError, PerigeeResult};

use crate::aabb::AabbArrays;
use crate::bvh::BvhTree;

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(PerigeeError::InvariantViolation(format!($($arg)+)));
        }
    };
}

/// Index of the first different bit between two codes, counted from
/// the MSB; 64 when the codes are equal.
#[inline]
fn first_diff_bit(n1: u64, n2: u64) -> u32 {
    (n1 ^ n2).leading_zeros()
}

/// Verifies every chunk's tree against the sorted and unsorted arrays.
#[allow(clippy::too_many_arguments)]
pub fn verify_bvh_trees(
    trees: &[BvhTree],
    aabbs: &AabbArrays,
    srt_aabbs: &AabbArrays,
    mcodes: &[u64],
    srt_mcodes: &[u64],
    vidx: &[u32],
    nparts: usize,
) -> PerigeeResult<()> {
    trees
        .par_iter()
        .enumerate()
        .try_for_each(|(chunk_idx, tree)| {
            verify_chunk(
                chunk_idx, tree, aabbs, srt_aabbs, mcodes, srt_mcodes, vidx, nparts,
            )
        })
}

#[allow(clippy::too_many_arguments)]
fn verify_chunk(
    chunk_idx: usize,
    tree: &BvhTree,
    aabbs: &AabbArrays,
    srt_aabbs: &AabbArrays,
    mcodes: &[u64],
    srt_mcodes: &[u64],
    vidx: &[u32],
    nparts: usize,
) -> PerigeeResult<()> {
    let base = chunk_idx * nparts;
    let lb = &aabbs.lb[base..base + nparts];
    let ub = &aabbs.ub[base..base + nparts];
    let srt_lb = &srt_aabbs.lb[base..base + nparts];
    let srt_ub = &srt_aabbs.ub[base..base + nparts];
    let mc = &mcodes[base..base + nparts];
    let srt_mc = &srt_mcodes[base..base + nparts];
    let vidx_c = &vidx[base..base + nparts];

    // The sorted codes must be a non-decreasing gather of the unsorted
    // codes through the permutation.
    for i in 0..nparts {
        ensure!(
            srt_mc[i] == mc[vidx_c[i] as usize],
            "chunk {}: sorted code {} does not match the permutation",
            chunk_idx,
            i
        );
        if i > 0 {
            ensure!(
                srt_mc[i - 1] <= srt_mc[i],
                "chunk {}: sorted codes decrease at position {}",
                chunk_idx,
                i
            );
        }
    }

    // Tracks which particles have been claimed by a leaf.
    let mut seen = vec![false; nparts];
    let mut claim = |pos: usize| -> PerigeeResult<()> {
        if seen[pos] {
            return Err(PerigeeError::InvariantViolation(format!(
                "chunk {}: sorted position {} appears in more than one leaf",
                chunk_idx, pos
            )));
        }
        seen[pos] = true;
        Ok(())
    };

    for (i, node) in tree.nodes.iter().enumerate() {
        // The node must contain one or more particles.
        ensure!(
            node.end > node.begin,
            "chunk {}: node {} has an empty particle range",
            chunk_idx,
            i
        );

        // The node must have either zero or two children.
        if node.left == -1 {
            ensure!(
                node.right == -1,
                "chunk {}: node {} has only a right child",
                chunk_idx,
                i
            );
        } else {
            ensure!(
                node.left > 0 && node.right > 0,
                "chunk {}: node {} has invalid child indices",
                chunk_idx,
                i
            );
        }

        if node.end - node.begin == 1 {
            // Single-particle nodes are always leaves.
            ensure!(
                node.left == -1 && node.right == -1,
                "chunk {}: single-particle node {} has children",
                chunk_idx,
                i
            );
            claim(node.begin as usize)?;
        } else if node.left == -1 {
            // A leaf with multiple particles: all codes must be equal.
            let code = srt_mc[node.begin as usize];
            claim(node.begin as usize)?;
            for j in (node.begin + 1)..node.end {
                ensure!(
                    srt_mc[j as usize] == code,
                    "chunk {}: multi-particle leaf {} mixes Morton codes",
                    chunk_idx,
                    i
                );
                claim(j as usize)?;
            }
        }

        if node.left != -1 {
            let left = node.left as usize;
            let right = node.right as usize;

            // Children always live after their parent, within the tree.
            ensure!(
                left > i && left < tree.nodes.len(),
                "chunk {}: node {} left child out of range",
                chunk_idx,
                i
            );
            ensure!(
                right > i && right < tree.nodes.len(),
                "chunk {}: node {} right child out of range",
                chunk_idx,
                i
            );

            // The children partition the parent's range.
            ensure!(
                tree.nodes[left].begin == node.begin,
                "chunk {}: node {} left child begin mismatch",
                chunk_idx,
                i
            );
            ensure!(
                tree.nodes[left].end < node.end,
                "chunk {}: node {} left child end out of range",
                chunk_idx,
                i
            );
            ensure!(
                tree.nodes[right].begin == tree.nodes[left].end,
                "chunk {}: node {} children ranges are not contiguous",
                chunk_idx,
                i
            );
            ensure!(
                tree.nodes[right].end == node.end,
                "chunk {}: node {} right child end mismatch",
                chunk_idx,
                i
            );

            // An internal node's split bit fits a 64-bit code.
            ensure!(
                node.split_idx <= 63,
                "chunk {}: internal node {} has split_idx {}",
                chunk_idx,
                i,
                node.split_idx
            );

            // The split bit must be the highest differing bit at the
            // child boundary.
            let split = tree.nodes[left].end as usize - 1;
            ensure!(
                first_diff_bit(srt_mc[split], srt_mc[split + 1]) == node.split_idx,
                "chunk {}: node {} split bit does not match the code boundary",
                chunk_idx,
                i
            );
        } else {
            // Leaves created from duplicate codes can saturate at 64.
            ensure!(
                node.split_idx <= 64,
                "chunk {}: leaf {} has split_idx {}",
                chunk_idx,
                i,
                node.split_idx
            );
        }

        // Parent link consistency.
        if i == 0 {
            ensure!(
                node.parent == -1,
                "chunk {}: root node has a parent",
                chunk_idx
            );
        } else {
            ensure!(
                node.parent >= 0,
                "chunk {}: node {} has no parent",
                chunk_idx,
                i
            );
            let par = node.parent as usize;
            ensure!(par < i, "chunk {}: node {} parent not above it", chunk_idx, i);
            ensure!(
                node.begin >= tree.nodes[par].begin && node.end <= tree.nodes[par].end,
                "chunk {}: node {} range escapes its parent",
                chunk_idx,
                i
            );
            ensure!(
                node.begin == tree.nodes[par].begin || node.end == tree.nodes[par].end,
                "chunk {}: node {} is not flush with its parent range",
                chunk_idx,
                i
            );
        }

        // nn_level must always be nonzero after construction.
        ensure!(
            node.nn_level > 0,
            "chunk {}: node {} has nn_level 0",
            chunk_idx,
            i
        );

        // The node AABB must be the envelope of its particle range, and
        // the sorted arrays must agree with the unsorted ones through
        // the permutation.
        let mut elb = [f32::INFINITY; 4];
        let mut eub = [f32::NEG_INFINITY; 4];
        for j in node.begin..node.end {
            let j = j as usize;
            let src = vidx_c[j] as usize;
            for d in 0..4 {
                ensure!(
                    srt_lb[j][d] == lb[src][d] && srt_ub[j][d] == ub[src][d],
                    "chunk {}: sorted AABB {} does not match the permutation",
                    chunk_idx,
                    j
                );
                elb[d] = elb[d].min(srt_lb[j][d]);
                eub[d] = eub[d].max(srt_ub[j][d]);
            }
        }
        ensure!(
            elb == node.lb && eub == node.ub,
            "chunk {}: node {} AABB is not the envelope of its range",
            chunk_idx,
            i
        );
    }

    // Every particle must appear in exactly one leaf.
    ensure!(
        seen.iter().all(|&s| s),
        "chunk {}: leaves do not cover every particle",
        chunk_idx
    );

    Ok(())
}
