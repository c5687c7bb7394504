use crate::model::JobSpec;
use crate::options::{ChunkMetadata, ChunkingOptions, ChunkingStrategy};

/// A sub-job ready to hand to the executor, with its bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub job: JobSpec,
    pub metadata: ChunkMetadata,
}

/// Split `job` into contiguous, order-preserving groups of sources.
///
/// `sources_per_chunk = ceil(N / max_parallel)`, so there are never more chunks than
/// `max_parallel`. Each sub-job copies every scalar and global field of `job` and gets
/// ` (chunk i/total)` appended to its name. No I/O happens here.
pub fn plan(job: &JobSpec, options: &ChunkingOptions) -> Vec<PlannedChunk> {
    let sources = &job.sources;
    if sources.is_empty() {
        log::warn!("No sources to chunk");
        return Vec::new();
    }

    if options.strategy == ChunkingStrategy::ByLineCount {
        log::warn!(
            "{} strategy is not implemented, falling back to {}",
            ChunkingStrategy::ByLineCount.as_str(),
            ChunkingStrategy::BySource.as_str()
        );
    }

    let sources_per_chunk = sources.len().div_ceil(options.effective_parallel()).max(1);
    let total = sources.len().div_ceil(sources_per_chunk);
    log::info!("Creating {total} chunks with ~{sources_per_chunk} sources each");

    sources
        .chunks(sources_per_chunk)
        .enumerate()
        .map(|(index, group)| {
            let name = format!("{} (chunk {}/{total})", job.name, index + 1);
            PlannedChunk {
                job: job.derive_with_sources(name, group.to_vec()),
                metadata: ChunkMetadata::new(index, total, group.to_vec()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceRef;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn job_with(n: usize) -> JobSpec {
        (0..n).fold(
            JobSpec::new("List")
                .with_description("desc")
                .with_homepage("https://example.com")
                .with_license("GPL-3.0")
                .with_version("2.1.0")
                .with_transformation("Deduplicate")
                .with_inclusion("*.example.com")
                .with_exclusion("/ads/"),
            |job, i| job.with_source(SourceRef::new(format!("s{i}"), format!("list-{i}.txt"))),
        )
    }

    fn options(max_parallel: usize) -> ChunkingOptions {
        ChunkingOptions::default()
            .with_enabled(true)
            .with_max_parallel(max_parallel)
    }

    #[test]
    fn empty_job_plans_nothing() {
        assert!(plan(&JobSpec::new("x"), &options(4)).is_empty());
    }

    #[test]
    fn four_sources_two_parallel() {
        let chunks = plan(&job_with(4), &options(2));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.index(), 0);
        assert_eq!(chunks[0].metadata.total(), 2);
        assert_eq!(chunks[1].metadata.index(), 1);
        assert_eq!(chunks[1].metadata.total(), 2);
        assert_eq!(chunks[0].job.sources.len(), 2);
        assert_eq!(chunks[1].job.sources.len(), 2);
        assert_eq!(chunks[0].job.name, "List (chunk 1/2)");
        assert_eq!(chunks[1].job.name, "List (chunk 2/2)");
    }

    #[test]
    fn line_count_strategy_falls_back() {
        let job = job_with(5);
        let by_source = plan(&job, &options(2));
        let by_lines = plan(&job, &options(2).with_strategy(ChunkingStrategy::ByLineCount));
        assert_eq!(by_source, by_lines);
    }

    #[test]
    fn sub_jobs_copy_scalar_and_global_fields() {
        let job = job_with(7);
        for chunk in plan(&job, &options(3)) {
            assert_eq!(chunk.job.description, job.description);
            assert_eq!(chunk.job.homepage, job.homepage);
            assert_eq!(chunk.job.license, job.license);
            assert_eq!(chunk.job.version, job.version);
            assert_eq!(chunk.job.transformations, job.transformations);
            assert_eq!(chunk.job.inclusions, job.inclusions);
            assert_eq!(chunk.job.exclusions, job.exclusions);
            assert_eq!(chunk.job.sources, chunk.metadata.sources());
        }
    }

    proptest! {
        #[test]
        fn plan_partitions_sources_in_order(n in 1usize..60, p in 1usize..20) {
            let job = job_with(n);
            let chunks = plan(&job, &options(p));

            let per_chunk = n.div_ceil(p);
            let expected_total = n.div_ceil(per_chunk);
            prop_assert_eq!(chunks.len(), expected_total);

            let size = n.div_ceil(expected_total);
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.metadata.index(), i);
                prop_assert_eq!(chunk.metadata.total(), expected_total);
                if i + 1 < chunks.len() {
                    prop_assert_eq!(chunk.job.sources.len(), size);
                } else {
                    prop_assert!(chunk.job.sources.len() <= size);
                    prop_assert!(!chunk.job.sources.is_empty());
                }
            }

            let rejoined: Vec<SourceRef> = chunks
                .iter()
                .flat_map(|c| c.job.sources.iter().cloned())
                .collect();
            prop_assert_eq!(rejoined, job.sources);
        }
    }
}
