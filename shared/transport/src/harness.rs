use weft_core::RankId;

/// Runs one closure per rank on its own thread and returns the results in
/// rank-argument order. This is how multi-rank programs run against the
/// in-process fabric: every thread plays one rank of the process group and
/// blocks on the same collectives a real rank would.
///
/// Panics if any rank's thread panics.
pub fn run_ranks<T, F>(world: &[RankId], per_rank: F) -> Vec<T>
where
    T: Send,
    F: Fn(RankId) -> T + Send + Sync,
{
    std::thread::scope(|scope| {
        let per_rank = &per_rank;
        let handles: Vec<_> = world
            .iter()
            .map(|&rank| scope.spawn(move || per_rank(rank)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("rank thread panicked"))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_in_rank_order() {
        let results = run_ranks(&[3, 1, 2], |rank| rank * 10);
        assert_eq!(results, vec![30, 10, 20]);
    }
}
