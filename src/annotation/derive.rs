//! Interval arithmetic used to synthesize intron and intergenic features.

use super::feature::{Feature, Strand, labels};
use super::tree::IntervalTree;
use crate::{Error, Result};
use std::sync::Arc;

/// Merge overlapping or touching intervals in a single left-to-right sweep.
///
/// Input must already be sorted by start; a decreasing start is reported as
/// [`Error::UnsortedInput`]. Each merged run keeps the identity (label, tags)
/// of its first feature; the strand is dropped when the run mixes strands.
pub fn merge_overlapping(features: Vec<Feature>) -> Result<Vec<Feature>> {
    let mut out: Vec<Feature> = Vec::with_capacity(features.len());
    let mut iter = features.into_iter();
    let Some(mut current) = iter.next() else {
        return Ok(out);
    };
    let mut last_start = current.start();

    for next in iter {
        if next.start() < last_start {
            return Err(Error::UnsortedInput {
                chrom: next.chrom().to_string(),
                start: next.start(),
                previous: last_start,
            });
        }
        last_start = next.start();

        if next.start() <= current.end() {
            let end = current.end().max(next.end());
            current.set_bounds(current.start(), end);
            if current.strand() != next.strand() {
                current.set_strand(Strand::Unknown);
            }
        } else {
            out.push(std::mem::replace(&mut current, next));
        }
    }
    out.push(current);
    Ok(out)
}

/// Sort by start, then merge.
pub fn merge_unsorted(mut features: Vec<Feature>) -> Vec<Feature> {
    features.sort_by_key(|f| (f.start(), f.end()));
    // sorted just above, so the sortedness check cannot fail
    merge_overlapping(features).unwrap_or_default()
}

/// Emit one `derived_label` feature for each gap between consecutive
/// `source_label` features of `merged`.
///
/// With `include_boundaries`, the gaps between `range_start` and the first
/// feature and between the last feature and `range_end` are emitted too; an
/// empty input then yields the whole range. Zero-width and inverted gaps are
/// dropped.
pub fn interleave(
    chrom: &Arc<str>,
    merged: &[Feature],
    range_start: u64,
    range_end: u64,
    source_label: &str,
    derived_label: &str,
    include_boundaries: bool,
) -> Vec<Feature> {
    let derived_label: Arc<str> = Arc::from(derived_label);
    let mut out = Vec::new();
    let mut push = |start: u64, end: u64, strand: Strand| {
        if end > start {
            out.push(
                Feature::new(Arc::clone(chrom), Arc::clone(&derived_label), start, end)
                    .with_strand(strand),
            );
        }
    };

    let mut previous_end: Option<u64> = None;
    for feature in merged.iter().filter(|f| f.element() == source_label) {
        match previous_end {
            Some(end) => push(end, feature.start(), Strand::Unknown),
            None if include_boundaries => push(range_start, feature.start(), Strand::Unknown),
            None => {}
        }
        previous_end = Some(match previous_end {
            Some(end) => end.max(feature.end()),
            None => feature.end(),
        });
    }

    if include_boundaries {
        push(previous_end.unwrap_or(range_start), range_end, Strand::Unknown);
    }
    out
}

/// Intergenic features covering everything in `[0, chrom_len)` outside
/// `genes`. Without a known length the last gene end closes the range.
pub fn derive_intergenic(chrom: &Arc<str>, genes: &[Feature], chrom_len: Option<u64>) -> Vec<Feature> {
    let end = chrom_len.unwrap_or_else(|| genes.iter().map(Feature::end).max().unwrap_or(0));
    interleave(chrom, genes, 0, end, labels::GENE, labels::INTERGENIC, true)
}

/// Intron features for the gaps between exons inside each merged gene span.
///
/// Exons are looked up in `raw`, clipped to the gene span and merged before
/// the gaps are taken. Introns inherit the strand of their gene.
pub fn derive_introns(chrom: &Arc<str>, genes: &[Feature], raw: &IntervalTree) -> Vec<Feature> {
    let mut out = Vec::new();
    for gene in genes {
        let mut exons: Vec<Feature> = raw
            .range_query_by_element(gene.start(), gene.end(), labels::EXON)
            .into_iter()
            .map(|exon| {
                let mut clipped = exon.clone();
                clipped.set_bounds(exon.start().max(gene.start()), exon.end().min(gene.end()));
                clipped
            })
            .collect();
        if exons.len() < 2 {
            continue;
        }
        exons = merge_unsorted(exons);
        out.extend(
            interleave(chrom, &exons, gene.start(), gene.end(), labels::EXON, labels::INTRON, false)
                .into_iter()
                .map(|intron| intron.with_strand(gene.strand())),
        );
    }
    out
}
